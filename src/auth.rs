//! Axum middleware for the backup surface.
//!
//! The backup endpoints are guarded by a single pre-shared secret carried in
//! the `Authorization` header. On failure the request short-circuits with
//! the `INVALID_AUTHORIZATION` envelope (403); nothing downstream runs.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::services::backup;
use crate::AppState;

/// Middleware requiring the backup secret. Applied at router level to every
/// `/backup` route.
pub async fn require_backup_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    backup::check_backup_auth(auth, &state.config.backup_secret)?;

    Ok(next.run(request).await)
}
