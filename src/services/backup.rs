//! Read-only catalog projection for the fleet backup tool.
//!
//! The backup client walks the catalog in id order (keyset pagination) and
//! pulls raw blobs through `/backup/file/raw`; both endpoints sit behind the
//! pre-shared secret checked here.

use sqlx::SqlitePool;

use crate::db::models::BackupFileInfo;
use crate::error::{AppError, AppResult};

/// Hard cap on one backup listing page.
const MAX_PAGE_SIZE: i64 = 1000;

/// Catalog rows with `id > id_offset`, ascending, at most `limit` (clamped).
pub async fn list_backup_files(
    pool: &SqlitePool,
    id_offset: i64,
    limit: i64,
) -> AppResult<Vec<BackupFileInfo>> {
    let limit = limit.clamp(1, MAX_PAGE_SIZE);
    let files = sqlx::query_as::<_, BackupFileInfo>(
        "SELECT id, file_id, name, status, size, md5 FROM file \
         WHERE id > ? ORDER BY id ASC LIMIT ?",
    )
    .bind(id_offset)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(files)
}

/// Compares the presented Authorization header against the configured
/// secret. An unset secret rejects everything.
pub fn check_backup_auth(auth: &str, secret: &str) -> AppResult<()> {
    if secret.is_empty() || auth.is_empty() || auth != secret {
        return Err(AppError::InvalidAuthorization);
    }
    Ok(())
}
