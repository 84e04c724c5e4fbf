//! HTTP API
//!
//! 分かち書きとレコードストアをJSON APIとして公開する。
//! ファイルI/Oはすべて `spawn_blocking` 上で実行し、非同期ランタイムを止めない。
//!
//! ```text
//! [Client] → [Router + CORS] → handler ─┬→ [Segmenter]   (語彙スナップショット)
//!                                       ├→ [RecordStore] (TSVファイル)
//!                                       └→ [media]       (音声の走査・配信)
//! ```

use crate::error::StoreError;
use crate::media;
use crate::record_store::RecordStore;
use crate::segmenter::Segmenter;
use crate::types::{ChangeToken, Token};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tower::ServiceExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeFile;

/// リクエストボディの上限（ファイル全体の上書きを想定）
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// `sourceFile` 省略時の移動元
pub const DEFAULT_SOURCE_FILE: &str = "Correct.tsv";

/// ハンドラ間で共有する状態
#[derive(Clone)]
pub struct AppState {
    pub segmenter: Arc<Segmenter>,
    pub store: Arc<RecordStore>,
}

/// ルーターを作成
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/api/tokenize", post(tokenize))
        .route("/api/tokenize-batch", post(tokenize_batch))
        .route("/api/load-file", get(load_file))
        .route("/api/save-file", post(save_file))
        .route("/api/append-change", post(append_change))
        .route("/api/scan-audio", post(scan_audio))
        .route("/api/audio", get(audio))
        .route("/api/append-tsv", post(append_tsv))
        .route("/api/delete-tsv-entry", post(delete_tsv_entry))
        .route("/api/move-to-trash", post(move_to_trash))
        .route("/api/check-mtime", get(check_mtime))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

// ---- リクエスト / レスポンス ----

#[derive(Debug, Deserialize)]
pub struct TokenizeRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenizeBatchRequest {
    pub texts: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveFileRequest {
    pub filename: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct AppendChangeRequest {
    pub original: String,
    pub changed: String,
}

#[derive(Debug, Deserialize)]
pub struct ScanAudioRequest {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct AudioQuery {
    pub path: String,
}

/// アノテーション1件（`filename` がレコードキー）
#[derive(Debug, Deserialize)]
pub struct AudioItem {
    pub filename: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct AppendTsvRequest {
    pub filename: String,
    pub item: AudioItem,
}

#[derive(Debug, Deserialize)]
pub struct DeleteTsvEntryRequest {
    pub filename: String,
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveToTrashRequest {
    /// 移動するレコードのキー
    pub filename: String,

    #[serde(rename = "sourceFile", default = "default_source_file")]
    pub source_file: String,
}

fn default_source_file() -> String {
    DEFAULT_SOURCE_FILE.to_string()
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    fn new(status: &str) -> Json<Self> {
        Json(Self {
            status: status.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// ハンドラのエラー
///
/// 入力起因のエラーは 400、それ以外は 500 として `{error}` を返す。
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("バックグラウンド処理に失敗: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Store(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("リクエストの処理に失敗しました: {}", self);
        } else {
            log::warn!("不正なリクエスト: {}", self);
        }
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// ブロッキング処理をスレッドプールで実行
async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

// ---- ハンドラ ----

async fn health() -> Json<StatusResponse> {
    StatusResponse::new("Audio Annotation Backend is running")
}

async fn tokenize(
    State(state): State<AppState>,
    Json(req): Json<TokenizeRequest>,
) -> Result<Json<Vec<Token>>, ApiError> {
    let segmenter = Arc::clone(&state.segmenter);
    let tokens = tokio::task::spawn_blocking(move || segmenter.segment(&req.text)).await?;
    Ok(Json(tokens))
}

async fn tokenize_batch(
    State(state): State<AppState>,
    Json(req): Json<TokenizeBatchRequest>,
) -> Result<Json<Vec<Vec<Token>>>, ApiError> {
    let segmenter = Arc::clone(&state.segmenter);
    let results = tokio::task::spawn_blocking(move || segmenter.segment_batch(&req.texts)).await?;
    Ok(Json(results))
}

async fn load_file(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> Result<String, ApiError> {
    let store = Arc::clone(&state.store);
    run_blocking(move || store.load(&query.filename)).await
}

async fn save_file(
    State(state): State<AppState>,
    Json(req): Json<SaveFileRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let store = Arc::clone(&state.store);
    run_blocking(move || store.save(&req.filename, &req.content)).await?;
    Ok(StatusResponse::new("saved"))
}

async fn append_change(
    State(state): State<AppState>,
    Json(req): Json<AppendChangeRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let store = Arc::clone(&state.store);
    run_blocking(move || store.append_change(&req.original, &req.changed)).await?;
    Ok(StatusResponse::new("appended"))
}

async fn scan_audio(
    State(state): State<AppState>,
    Json(req): Json<ScanAudioRequest>,
) -> Result<Json<Vec<String>>, ApiError> {
    let store = Arc::clone(&state.store);
    let files = run_blocking(move || Ok(media::scan_audio(&req.path, store.root()))).await?;
    Ok(Json(files))
}

/// 音声ファイルを配信（Rangeリクエスト対応）
async fn audio(
    State(state): State<AppState>,
    Query(query): Query<AudioQuery>,
    request: Request,
) -> Response {
    let path = match media::resolve_scan_root(&query.path, state.store.root()) {
        Some(path) if path.is_file() => path,
        _ => {
            log::debug!("音声ファイルが見つかりません: {}", query.path);
            let body = ErrorResponse {
                error: "File not found".to_string(),
            };
            return (StatusCode::NOT_FOUND, Json(body)).into_response();
        }
    };

    match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => response.map(Body::new).into_response(),
        Err(never) => match never {},
    }
}

async fn append_tsv(
    State(state): State<AppState>,
    Json(req): Json<AppendTsvRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let store = Arc::clone(&state.store);
    run_blocking(move || store.upsert(&req.filename, &req.item.filename, &req.item.text)).await?;
    Ok(StatusResponse::new("saved (upsert)"))
}

async fn delete_tsv_entry(
    State(state): State<AppState>,
    Json(req): Json<DeleteTsvEntryRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let store = Arc::clone(&state.store);
    run_blocking(move || store.delete(&req.filename, &req.key)).await?;
    Ok(StatusResponse::new("deleted"))
}

async fn move_to_trash(
    State(state): State<AppState>,
    Json(req): Json<MoveToTrashRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let store = Arc::clone(&state.store);
    let outcome = run_blocking(move || store.move_to_trash(&req.source_file, &req.filename)).await?;
    Ok(StatusResponse::new(outcome.status()))
}

async fn check_mtime(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> Result<Json<ChangeToken>, ApiError> {
    let store = Arc::clone(&state.store);
    let token = run_blocking(move || store.mtime(&query.filename)).await?;
    Ok(Json(token))
}
