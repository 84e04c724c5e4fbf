use crate::config::DictionaryConfig;
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// バイナリに組み込まれたベース語彙
const BUILTIN_BASE_WORDS: &str = include_str!("../data/base_words.txt");

/// 分かち書き辞書のスナップショット
///
/// 生成後は変更されない。辞書の更新は新しい `Lexicon` を作って
/// [`LexiconStore`] の現在値を差し替えることで行う。
///
/// # Examples
///
/// ```
/// # use annotation_backend::lexicon::Lexicon;
/// let lexicon = Lexicon::new(1, ["ตัด", "คำ", "ตัดคำ"].map(String::from));
/// assert_eq!(lexicon.longest_prefix("ตัดคำไทย"), Some("ตัดคำ".len()));
/// assert_eq!(lexicon.longest_prefix("ไทย"), None);
/// ```
#[derive(Debug)]
pub struct Lexicon {
    version: u64,
    words: HashSet<String>,
    /// 先頭文字ごとの最長語の文字数
    max_chars_by_first: HashMap<char, usize>,
}

impl Lexicon {
    pub fn new<I>(version: u64, words: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let words: HashSet<String> = words.into_iter().filter(|w| !w.is_empty()).collect();

        let mut max_chars_by_first: HashMap<char, usize> = HashMap::new();
        for word in &words {
            if let Some(first) = word.chars().next() {
                let len = word.chars().count();
                let entry = max_chars_by_first.entry(first).or_insert(0);
                if len > *entry {
                    *entry = len;
                }
            }
        }

        Self {
            version,
            words,
            max_chars_by_first,
        }
    }

    /// 辞書のバージョン（再構築のたびに増加）
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    /// `text` の先頭に一致する最長の辞書語のバイト長
    ///
    /// 一致する語がなければ `None`。
    pub fn longest_prefix(&self, text: &str) -> Option<usize> {
        let first = text.chars().next()?;
        let max_chars = *self.max_chars_by_first.get(&first)?;

        let ends: Vec<usize> = text
            .char_indices()
            .skip(1)
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .take(max_chars)
            .collect();

        ends.into_iter()
            .rev()
            .find(|&end| self.words.contains(&text[..end]))
    }
}

/// 語彙ファイルの内容をパース
///
/// 1行1語。前後の空白は除去し、空行と `#` で始まる行は無視する。
pub fn parse_word_list(content: &str) -> impl Iterator<Item = String> + '_ {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
}

/// 組み込みベース語彙
pub fn builtin_base_words() -> HashSet<String> {
    parse_word_list(BUILTIN_BASE_WORDS).collect()
}

/// 語彙ファイルを読み込み
///
/// ファイルが存在しない場合は `Ok(None)`。
///
/// # Errors
///
/// 読み込みに失敗した場合、またはUTF-8として不正な場合にエラーを返す。
pub fn read_word_file(path: &Path) -> Result<Option<Vec<String>>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(parse_word_list(&content).collect())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("語彙ファイルの読み込みに失敗: {:?}", path)),
    }
}

/// 現在の辞書を保持するストア
///
/// 読み出しはポインタ（`Arc`）の複製のみで、分かち書き中にロックを保持しない。
/// 再構築は新しいスナップショットを作ってから一度に差し替える。
pub struct LexiconStore {
    base: HashSet<String>,
    custom_path: PathBuf,
    current: RwLock<Arc<Lexicon>>,
    next_version: AtomicU64,
}

impl LexiconStore {
    /// ベース語彙のみの辞書で初期化
    pub fn new<P: AsRef<Path>>(base: HashSet<String>, custom_path: P) -> Self {
        let initial = Lexicon::new(1, base.iter().cloned());
        Self {
            base,
            custom_path: custom_path.as_ref().to_path_buf(),
            current: RwLock::new(Arc::new(initial)),
            next_version: AtomicU64::new(2),
        }
    }

    /// 設定からストアを作成
    ///
    /// 組み込み語彙と `base_words_file`（指定時）をベース語彙とする。
    ///
    /// # Errors
    ///
    /// 指定されたベース語彙ファイルが読み込めない場合にエラーを返す。
    pub fn from_config(config: &DictionaryConfig) -> Result<Self> {
        let mut base = builtin_base_words();

        if let Some(path) = &config.base_words_file {
            match read_word_file(Path::new(path))? {
                Some(words) => {
                    log::info!("ベース語彙ファイルを読み込みました: {} ({}語)", path, words.len());
                    base.extend(words);
                }
                None => log::warn!("ベース語彙ファイルが見つかりません: {}", path),
            }
        }

        Ok(Self::new(base, &config.custom_words_file))
    }

    /// ユーザー辞書ファイルのパス
    pub fn custom_path(&self) -> &Path {
        &self.custom_path
    }

    /// 現在の辞書を取得
    pub fn current(&self) -> Arc<Lexicon> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    /// ベース語彙とユーザー辞書から辞書を再構築して差し替える
    ///
    /// ユーザー辞書ファイルが存在しない場合はベース語彙のみで構築する。
    ///
    /// # Errors
    ///
    /// ユーザー辞書の読み込みに失敗した場合にエラーを返す。
    /// この場合、現在の辞書はそのまま維持される。
    pub fn rebuild(&self) -> Result<Arc<Lexicon>> {
        let custom = read_word_file(&self.custom_path)?;

        let custom_count = custom.as_ref().map_or(0, Vec::len);
        let words = self.base.iter().cloned().chain(custom.into_iter().flatten());

        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let lexicon = Arc::new(Lexicon::new(version, words));

        {
            let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
            *guard = Arc::clone(&lexicon);
        }

        log::info!(
            "辞書を再構築しました: バージョン {}, {}語 (ユーザー辞書 {}語)",
            lexicon.version(),
            lexicon.len(),
            custom_count
        );

        Ok(lexicon)
    }
}
