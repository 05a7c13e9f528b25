//! HTTP handlers for the file resource.
//!
//! Route map (registered in main.rs):
//!
//!   PUT    /file          — upload; raw body, filename in the `filename` header
//!   GET    /file/info     — metadata by uploadFileId or fileId
//!   GET    /file/key      — mint a 30-minute download key
//!   GET    /file/raw      — whole-file download by key
//!   GET    /file/stream   — byte-range streaming by key (206)
//!   GET    /file/direct   — internal whole-file download by fileId
//!   DELETE /file          — logical delete
//!   POST   /file/unzip    — trigger the asynchronous unzip pipeline
//!
//! Handlers parse and validate arguments, then delegate to the service
//! layer; no storage logic lives here.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, Response},
    Json,
};
use futures::TryStreamExt;
use serde::Deserialize;
use tokio_util::io::StreamReader;

use crate::api::{ok, ok_empty, Resp};
use crate::db::models::FileInfo;
use crate::error::{AppError, AppResult};
use crate::events::UnzipFileEvent;
use crate::services::{deletion, files, transfer, unzip};
use crate::AppState;

// ─── Request types ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoQuery {
    pub upload_file_id: Option<String>,
    pub file_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyQuery {
    pub file_id: Option<String>,
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileIdQuery {
    pub file_id: Option<String>,
}

// ─── Handlers ─────────────────────────────────────────────────────────────────

/// `PUT /file`
///
/// Streams the request body into storage. Responds with an opaque
/// upload-file-id (valid 6 h) rather than the real file_id; clients exchange
/// it via `GET /file/info?uploadFileId=…`. That indirection keeps real ids
/// unguessable across tenants.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> AppResult<Json<Resp<String>>> {
    let filename = headers
        .get("filename")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("");
    if filename.is_empty() {
        return Err(AppError::BadRequest("filename is required".into()));
    }

    let reader = StreamReader::new(body.into_data_stream().map_err(std::io::Error::other));
    let file_id =
        files::upload(&state.db, &state.layout, &state.locks, reader, filename).await?;

    let token = files::mint_upload_file_id(&state.caches, &file_id).await;
    tracing::info!(%file_id, "upload complete, handing out upload-file-id");
    Ok(ok(token))
}

/// `GET /file/info?uploadFileId=…` or `?fileId=…`
pub async fn info(
    State(state): State<AppState>,
    Query(q): Query<InfoQuery>,
) -> AppResult<Json<Resp<FileInfo>>> {
    let info = files::file_info(
        &state.db,
        &state.caches,
        q.upload_file_id.as_deref(),
        q.file_id.as_deref(),
    )
    .await?;
    Ok(ok(info))
}

/// `GET /file/key?fileId=…&filename=…`
///
/// Mints a short-lived download key. The optional filename overrides
/// Content-Disposition on download and arrives percent-encoded.
pub async fn gen_key(
    State(state): State<AppState>,
    Query(q): Query<KeyQuery>,
) -> AppResult<Json<Resp<String>>> {
    let file_id = q.file_id.as_deref().unwrap_or("").trim();
    if file_id.is_empty() {
        return Err(AppError::FileNotFound);
    }

    let raw_name = q.filename.unwrap_or_default();
    let filename = match urlencoding::decode(&raw_name) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw_name,
    };

    let key =
        files::mint_download_key(&state.db, &state.caches, file_id, filename.trim()).await?;
    Ok(ok(key))
}

/// `GET /file/raw?key=…` — whole-file download.
pub async fn raw(
    State(state): State<AppState>,
    Query(q): Query<StreamQuery>,
) -> AppResult<Response<Body>> {
    let key = q.key.as_deref().unwrap_or("").trim();
    if key.is_empty() {
        return Err(AppError::FileNotFound);
    }
    transfer::download_by_key(&state.db, &state.caches, &state.layout, key).await
}

/// `GET /file/stream?key=…` — media streaming with byte ranges.
pub async fn stream(
    State(state): State<AppState>,
    Query(q): Query<StreamQuery>,
    headers: HeaderMap,
) -> AppResult<Response<Body>> {
    let key = q.key.as_deref().unwrap_or("").trim();
    if key.is_empty() {
        return Err(AppError::FileNotFound);
    }
    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    transfer::stream_by_key(&state.db, &state.caches, &state.layout, key, range).await
}

/// `GET /file/direct?fileId=…` — internal download by real id, no key.
pub async fn direct(
    State(state): State<AppState>,
    Query(q): Query<FileIdQuery>,
) -> AppResult<Response<Body>> {
    let file_id = q.file_id.as_deref().unwrap_or("").trim();
    transfer::download_by_id(&state.db, &state.layout, file_id).await
}

/// `DELETE /file?fileId=…` — logical delete; the physical sweep follows
/// after the grace window.
pub async fn delete(
    State(state): State<AppState>,
    Query(q): Query<FileIdQuery>,
) -> AppResult<Json<Resp<()>>> {
    let file_id = q.file_id.as_deref().unwrap_or("");
    deletion::ldelete(&state.db, &state.locks, file_id).await?;
    Ok(ok_empty())
}

/// `POST /file/unzip` — validates the zip and enqueues extraction; the
/// reply arrives on the event bus named in the request.
pub async fn unzip_trigger(
    State(state): State<AppState>,
    Json(req): Json<UnzipFileEvent>,
) -> AppResult<Json<Resp<()>>> {
    if req.file_id.trim().is_empty() {
        return Err(AppError::BadRequest("FileId is required".into()));
    }
    if req.reply_to_event_bus.trim().is_empty() {
        return Err(AppError::BadRequest("ReplyToEventBus is required".into()));
    }
    unzip::trigger_unzip(&state.db, &state.bus, req).await?;
    Ok(ok_empty())
}
