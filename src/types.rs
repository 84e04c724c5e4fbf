use serde::{Deserialize, Serialize};

/// 分かち書きの最小単位
///
/// 空白のみのトークンも含む。全トークンを連結すると元のテキストに戻る。
pub type Token = String;

/// レコードファイルの列区切り文字
pub const FIELD_DELIMITER: char = '\t';

/// レコードファイル（Correct.tsv, fail.tsv など）のヘッダー行
pub const RECORD_HEADER: &str = "filename\ttext";

/// 修正履歴ファイル（ListOfChange.tsv）のヘッダー行
pub const CHANGE_LOG_HEADER: &str = "original\tchanged";

/// キー付きレコード
///
/// `key` は音声ファイル名などの一意な識別子、`value` はアノテーションテキスト。
///
/// # Examples
///
/// ```
/// # use annotation_backend::types::Record;
/// let record = Record::new("clip1.wav", "hello");
/// assert_eq!(record.key, "clip1.wav");
/// assert_eq!(record.value, "hello");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// レコードキー（1列目）
    pub key: String,

    /// 値（2列目以降をタブで再結合したもの）
    pub value: String,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// バッチ分かち書きで要素が失敗した場合の扱い
///
/// # Examples
///
/// ```
/// # use annotation_backend::types::BatchPolicy;
/// let policy = BatchPolicy::AllOrNothing; // 1件でも失敗したら全件空
/// ```
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// 1件でも失敗したらバッチ全体を空の結果にする
    ///
    /// 既存クライアントとの互換のためのデフォルト
    #[default]
    AllOrNothing,

    /// 失敗した要素だけを空にし、他の要素は結果を返す
    PerItem,
}

/// ゴミ箱への移動結果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveOutcome {
    /// 移動元から削除し、ゴミ箱に追加した
    Moved,

    /// キーが見つからない、または移動元ファイルが存在しない
    NotFound,
}

impl MoveOutcome {
    /// APIレスポンスの status 文字列
    pub fn status(self) -> &'static str {
        match self {
            MoveOutcome::Moved => "moved to trash",
            MoveOutcome::NotFound => "item not found or source file missing",
        }
    }
}

/// 変更検知トークン
///
/// ファイルの最終更新時刻（UNIX_EPOCHからの秒数）。
/// ファイルが存在しない場合は 0。
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize)]
pub struct ChangeToken {
    pub mtime: f64,
}

impl ChangeToken {
    /// ファイルが存在しない場合の値
    pub const ABSENT: ChangeToken = ChangeToken { mtime: 0.0 };

    pub fn is_absent(&self) -> bool {
        self.mtime == 0.0
    }
}
