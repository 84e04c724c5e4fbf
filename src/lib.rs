//! annotation-backend - 音声アノテーション作業用のバックエンド
//!
//! このクレートは、音声クリップの書き起こしを確認・修正する作業を支えるため、
//! 辞書ベースのタイ語分かち書きと、TSVファイルを使ったレコードストアを提供します。
//!
//! # 主な機能
//!
//! - **分かち書き**: 最長一致による単語分割。空白や記号も含めたトークン列を返す
//! - **辞書のホットリロード**: ユーザー辞書ファイルの更新を検出し、再起動なしで反映
//! - **レコードストア**: TSVファイルをキー付きレコード集合として追加・更新・削除・ゴミ箱移動
//! - **変更検知**: ファイルの更新時刻によるクライアント側の再読み込み判定
//! - **HTTP API**: 上記をJSON APIとして公開（音声ファイルの走査・配信を含む）
//!
//! # アーキテクチャ
//!
//! ```text
//! [custom_words.txt] ← (ポーリング) ← [DictionaryWatcher]
//!                                           ↓ rebuild
//!                                    [LexiconStore] ─ Arc<Lexicon> ─→ [Segmenter]
//!                                                                         ↑
//! [Client] → [server (axum)] ─────────────────────────────────────────────┤
//!                  │                                                      │
//!                  ├──→ [RecordStore] → [record_file] → [*.tsv]
//!                  └──→ [media] → [音声ファイル]
//! ```
//!
//! # 使用例
//!
//! ```no_run
//! use annotation_backend::config::Config;
//!
//! // 設定ファイルを読み込み
//! let config = Config::load_or_default("config.toml").unwrap();
//!
//! // またはデフォルト設定を生成
//! Config::write_default("config.toml").unwrap();
//! ```

pub mod change_token;
pub mod config;
pub mod dictionary_watcher;
pub mod error;
pub mod lexicon;
pub mod media;
pub mod record_file;
pub mod record_store;
pub mod segmenter;
pub mod server;
pub mod types;
