//! Manual maintenance endpoints.
//!
//! The same sweeps run on the background scheduler; these handlers exist so
//! operators can force a cycle, e.g.
//! `curl -X POST http://localhost:8084/maintenance/remove-deleted`.
//!
//! Route map (registered in main.rs):
//!
//!   POST /maintenance/remove-deleted    — physical delete sweep
//!   POST /maintenance/sanitize-storage  — orphan blob sweep

use axum::{extract::State, Json};

use crate::api::{ok_empty, Resp};
use crate::error::AppResult;
use crate::services::{deletion, sanitize};
use crate::AppState;

/// `POST /maintenance/remove-deleted`
pub async fn remove_deleted(State(state): State<AppState>) -> AppResult<Json<Resp<()>>> {
    let strategy = deletion::PdeleteStrategy::from_config(&state.config.pdelete_strategy);
    deletion::remove_deleted(&state.db, &state.layout, &state.locks, strategy).await?;
    Ok(ok_empty())
}

/// `POST /maintenance/sanitize-storage`
pub async fn sanitize_storage(State(state): State<AppState>) -> AppResult<Json<Resp<()>>> {
    sanitize::sanitize_storage(&state.db, &state.layout, state.config.sanitize_dry_run).await?;
    Ok(ok_empty())
}
