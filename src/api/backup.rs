//! HTTP handlers for the backup surface.
//!
//! Registered only when backup is enabled and a secret is configured; every
//! route sits behind the `require_backup_auth` middleware (see `auth.rs`).
//!
//! Route map (registered in main.rs):
//!
//!   POST /backup/file/list — catalog projection, keyset-paginated
//!   GET  /backup/file/raw  — whole-file download by real fileId

use axum::{
    body::Body,
    extract::{Query, State},
    http::Response,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::{ok, Resp};
use crate::db::models::BackupFileInfo;
use crate::error::AppResult;
use crate::services::{backup, transfer};
use crate::AppState;

use super::files::FileIdQuery;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListBackupFilesRequest {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub id_offset: i64,
}

fn default_limit() -> i64 {
    500
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListBackupFilesResponse {
    pub files: Vec<BackupFileInfo>,
}

/// `POST /backup/file/list`
pub async fn list(
    State(state): State<AppState>,
    Json(req): Json<ListBackupFilesRequest>,
) -> AppResult<Json<Resp<ListBackupFilesResponse>>> {
    tracing::info!(id_offset = req.id_offset, limit = req.limit, "backup tool listing files");
    let files = backup::list_backup_files(&state.db, req.id_offset, req.limit).await?;
    Ok(ok(ListBackupFilesResponse { files }))
}

/// `GET /backup/file/raw?fileId=…`
pub async fn raw(
    State(state): State<AppState>,
    Query(q): Query<FileIdQuery>,
) -> AppResult<Response<Body>> {
    let file_id = q.file_id.as_deref().unwrap_or("").trim();
    tracing::info!(%file_id, "backup tool downloading file");
    transfer::download_by_id(&state.db, &state.layout, file_id).await
}
