use crate::config::SegmenterConfig;
use crate::error::SegmentError;
use crate::lexicon::{Lexicon, LexiconStore};
use crate::types::{BatchPolicy, Token};
use rayon::prelude::*;
use std::sync::Arc;

/// 辞書ベースの分かち書きエンジン
///
/// 最長一致法でテキストをトークン列に分割する。呼び出しのたびに
/// [`LexiconStore`] から現在の辞書を取得するため、辞書の更新は
/// 次の呼び出しから反映される。
///
/// # アルゴリズム
///
/// 各位置で以下の順に判定する。
///
/// 1. 空白文字の連続は1トークン
/// 2. 辞書語の最長一致
/// 3. タイ文字以外の英数字の連続（英単語・数字）は1トークン。
///    ただし、より長い辞書語があればそちらを優先
/// 4. 未知のタイ文字列は、次に辞書語が始まる位置かタイ文字以外が現れるまで
/// 5. それ以外（記号など）は1文字
///
/// 全トークンを連結すると元のテキストに一致する。
///
/// # エラー時の挙動
///
/// 分かち書きに失敗した入力は空のトークン列になり、呼び出し側にエラーは返さない。
pub struct Segmenter {
    store: Arc<LexiconStore>,
    batch_policy: BatchPolicy,
    max_input_chars: usize,
}

impl Segmenter {
    pub fn new(store: Arc<LexiconStore>, config: &SegmenterConfig) -> Self {
        Self {
            store,
            batch_policy: config.batch_policy,
            max_input_chars: config.max_input_chars,
        }
    }

    pub fn lexicon_store(&self) -> &Arc<LexiconStore> {
        &self.store
    }

    /// テキストを分かち書き
    ///
    /// 空文字列は空のトークン列を返す。失敗時も空のトークン列を返す。
    ///
    /// # Examples
    ///
    /// ```
    /// # use annotation_backend::config::SegmenterConfig;
    /// # use annotation_backend::lexicon::LexiconStore;
    /// # use annotation_backend::segmenter::Segmenter;
    /// # use std::collections::HashSet;
    /// # use std::sync::Arc;
    /// let base: HashSet<String> = ["ตัด", "คำ"].iter().map(|w| w.to_string()).collect();
    /// let store = Arc::new(LexiconStore::new(base, "custom_words.txt"));
    /// let segmenter = Segmenter::new(store, &SegmenterConfig::default());
    ///
    /// assert_eq!(segmenter.segment("ตัดคำ ok"), vec!["ตัด", "คำ", " ", "ok"]);
    /// assert!(segmenter.segment("").is_empty());
    /// ```
    pub fn segment(&self, text: &str) -> Vec<Token> {
        if text.is_empty() {
            return Vec::new();
        }

        let lexicon = self.store.current();
        match self.try_segment(&lexicon, text) {
            Ok(tokens) => tokens,
            Err(e) => {
                log::warn!("分かち書きに失敗したため空の結果を返します: {}", e);
                Vec::new()
            }
        }
    }

    /// 複数のテキストをまとめて分かち書き
    ///
    /// 入力と同じ順序・同じ件数の結果を返す。バッチ全体で同じ辞書の
    /// スナップショットを使う。要素が失敗した場合の扱いは [`BatchPolicy`] に従う。
    pub fn segment_batch<S>(&self, texts: &[S]) -> Vec<Vec<Token>>
    where
        S: AsRef<str> + Sync,
    {
        let lexicon = self.store.current();

        let results: Vec<Result<Vec<Token>, SegmentError>> = texts
            .par_iter()
            .map(|text| {
                let text = text.as_ref();
                if text.is_empty() {
                    Ok(Vec::new())
                } else {
                    self.try_segment(&lexicon, text)
                }
            })
            .collect();

        match self.batch_policy {
            BatchPolicy::AllOrNothing => {
                if let Some(e) = results.iter().find_map(|r| r.as_ref().err()) {
                    log::error!(
                        "バッチ分かち書きエラー ({}件すべてを空にします): {}",
                        texts.len(),
                        e
                    );
                    return vec![Vec::new(); texts.len()];
                }
                results.into_iter().map(Result::unwrap_or_default).collect()
            }
            BatchPolicy::PerItem => results
                .into_iter()
                .enumerate()
                .map(|(index, result)| {
                    result.unwrap_or_else(|e| {
                        log::warn!("バッチ分かち書き: {}件目を空にします: {}", index, e);
                        Vec::new()
                    })
                })
                .collect(),
        }
    }

    fn try_segment(&self, lexicon: &Lexicon, text: &str) -> Result<Vec<Token>, SegmentError> {
        let len = text.chars().count();
        if len > self.max_input_chars {
            return Err(SegmentError::InputTooLong {
                len,
                max: self.max_input_chars,
            });
        }
        Ok(segment_with(lexicon, text))
    }
}

/// 指定した辞書でテキストを分かち書き
pub fn segment_with(lexicon: &Lexicon, text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < text.len() {
        let rest = &text[pos..];
        let len = next_token_len(lexicon, rest);
        tokens.push(rest[..len].to_string());
        pos += len;
    }

    tokens
}

/// 文字種
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CharClass {
    Space,
    Thai,
    /// タイ文字以外の英数字
    Alnum,
    Symbol,
}

impl CharClass {
    fn of(c: char) -> Self {
        if c.is_whitespace() {
            CharClass::Space
        } else if is_thai(c) {
            CharClass::Thai
        } else if c.is_alphanumeric() {
            CharClass::Alnum
        } else {
            CharClass::Symbol
        }
    }
}

fn is_thai(c: char) -> bool {
    ('\u{0E00}'..='\u{0E7F}').contains(&c)
}

/// `rest` の先頭から切り出すトークンのバイト長（常に1文字以上）
fn next_token_len(lexicon: &Lexicon, rest: &str) -> usize {
    let first = match rest.chars().next() {
        Some(c) => c,
        None => return 0,
    };

    let class = CharClass::of(first);
    if class == CharClass::Space {
        return run_len(rest, CharClass::Space);
    }

    let dict_len = lexicon.longest_prefix(rest).unwrap_or(0);
    match class {
        CharClass::Alnum => dict_len.max(run_len(rest, CharClass::Alnum)),
        CharClass::Thai if dict_len == 0 => unknown_thai_len(lexicon, rest),
        CharClass::Symbol if dict_len == 0 => first.len_utf8(),
        _ => dict_len,
    }
}

/// 同じ文字種が続く長さ
fn run_len(rest: &str, class: CharClass) -> usize {
    rest.char_indices()
        .find(|&(_, c)| CharClass::of(c) != class)
        .map_or(rest.len(), |(i, _)| i)
}

/// 辞書にないタイ文字列の長さ
fn unknown_thai_len(lexicon: &Lexicon, rest: &str) -> usize {
    rest.char_indices()
        .skip(1)
        .find(|&(i, c)| !is_thai(c) || lexicon.longest_prefix(&rest[i..]).is_some())
        .map_or(rest.len(), |(i, _)| i)
}
