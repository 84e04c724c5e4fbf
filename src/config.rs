use crate::types::BatchPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// データフォルダを上書きする環境変数
pub const DATA_FOLDER_ENV: &str = "DATA_FOLDER";

/// 待ち受けポートを上書きする環境変数
pub const PORT_ENV: &str = "PORT";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dictionary: DictionaryConfig,
    #[serde(default)]
    pub segmenter: SegmenterConfig,
}

/// HTTPサーバー設定
///
/// # デフォルト値
///
/// - `host`: "0.0.0.0"
/// - `port`: 3003
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// レコードファイルの保存先設定
///
/// ファイル名はすべて `data_dir` からの相対パスとして解決される。
///
/// # デフォルト値
///
/// - `data_dir`: "./data"
/// - `trash_file`: "trash.tsv"
/// - `change_log_file`: "ListOfChange.tsv"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_trash_file")]
    pub trash_file: String,
    #[serde(default = "default_change_log_file")]
    pub change_log_file: String,
}

/// 辞書設定
///
/// `custom_words_file` は外部エディタから編集されるユーザー辞書（1行1語）。
/// 変更は `poll_interval_ms` ごとの更新時刻チェックで検出される。
///
/// # デフォルト値
///
/// - `custom_words_file`: "./data/custom_words.txt"
/// - `base_words_file`: なし（組み込み語彙のみ）
/// - `poll_interval_ms`: 2000 ms
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DictionaryConfig {
    #[serde(default = "default_custom_words_file")]
    pub custom_words_file: String,
    /// 組み込み語彙に追加するベース語彙ファイル
    pub base_words_file: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// 分かち書き設定
///
/// # デフォルト値
///
/// - `batch_policy`: "all_or_nothing"
/// - `max_input_chars`: 100000
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SegmenterConfig {
    #[serde(default)]
    pub batch_policy: BatchPolicy,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

// Default functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3003
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_trash_file() -> String {
    "trash.tsv".to_string()
}

fn default_change_log_file() -> String {
    "ListOfChange.tsv".to_string()
}

fn default_custom_words_file() -> String {
    "./data/custom_words.txt".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_input_chars() -> usize {
    100_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            trash_file: default_trash_file(),
            change_log_file: default_change_log_file(),
        }
    }
}

impl Default for DictionaryConfig {
    fn default() -> Self {
        Self {
            custom_words_file: default_custom_words_file(),
            base_words_file: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            batch_policy: BatchPolicy::default(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

impl ServerConfig {
    /// バインドアドレス ("host:port")
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl StorageConfig {
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }
}

impl DictionaryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// TOML形式の設定ファイルをパースしてConfig構造体を生成する。
    ///
    /// # Errors
    ///
    /// ファイルの読み込みまたはパースに失敗した場合にエラーを返す。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use annotation_backend::config::Config;
    /// let config = Config::from_file("config.toml").unwrap();
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "設定ファイルのパースに失敗")?;
        Ok(config)
    }

    /// デフォルト設定をファイルに書き出し
    ///
    /// 既存のファイルは上書きされる。
    ///
    /// # Errors
    ///
    /// ファイルの書き込みに失敗した場合にエラーを返す。
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).with_context(|| "設定のシリアライズに失敗")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルの書き込みに失敗: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを使用
    ///
    /// # Errors
    ///
    /// ファイルが存在するがパースに失敗した場合にエラーを返す。
    /// ファイルが存在しない場合はエラーにならず、デフォルト設定を返す。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use annotation_backend::config::Config;
    /// let config = Config::load_or_default("config.toml").unwrap();
    /// ```
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            log::warn!(
                "設定ファイルが見つかりません。デフォルト設定を使用します: {:?}",
                path.as_ref()
            );
            Ok(Config::default())
        }
    }

    /// 環境変数による上書きを適用
    ///
    /// `DATA_FOLDER` はデータフォルダ、`PORT` は待ち受けポートを上書きする。
    /// 数値として解釈できない `PORT` は無視する。
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var(DATA_FOLDER_ENV).ok(),
            std::env::var(PORT_ENV).ok(),
        );
    }

    fn apply_overrides(&mut self, data_folder: Option<String>, port: Option<String>) {
        if let Some(dir) = data_folder.filter(|d| !d.trim().is_empty()) {
            log::info!("{} によりデータフォルダを上書き: {}", DATA_FOLDER_ENV, dir);
            self.storage.data_dir = dir;
        }
        if let Some(port) = port {
            match port.trim().parse::<u16>() {
                Ok(p) => self.server.port = p,
                Err(_) => log::warn!("{} の値が不正なため無視します: {:?}", PORT_ENV, port),
            }
        }
    }
}
