use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// レコードストアのエラー
///
/// 「見つからない」系の状態はエラーではなく通常の結果として扱うため、
/// ここには含まれない。
#[derive(Debug, Error)]
pub enum StoreError {
    /// データフォルダ外を指すファイル名
    #[error("不正なファイル名です: {0:?}")]
    InvalidFileName(String),

    /// 移動元とゴミ箱が同じファイル
    #[error("移動元とゴミ箱が同じファイルです: {0:?}")]
    SameFile(String),

    /// ファイルI/Oの失敗
    #[error("ファイルI/Oに失敗: {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// 呼び出し側の入力に起因するエラーかどうか
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidFileName(_) | StoreError::SameFile(_)
        )
    }
}

/// 分かち書きのエラー
///
/// 呼び出し側には伝播せず、空のトークン列に縮退させる。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    #[error("入力が長すぎます: {len} 文字 (上限 {max} 文字)")]
    InputTooLong { len: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(StoreError::InvalidFileName("../x".to_string()).is_client_error());
        assert!(StoreError::SameFile("trash.tsv".to_string()).is_client_error());

        let io_err = StoreError::io("a.tsv", io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(!io_err.is_client_error());
        assert!(io_err.to_string().contains("a.tsv"));
    }

    #[test]
    fn test_segment_error_message() {
        let err = SegmentError::InputTooLong { len: 10, max: 5 };
        assert!(err.to_string().contains("10"));
        assert!(err.to_string().contains("5"));
    }
}
