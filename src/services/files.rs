//! Upload pipeline and catalog access.
//!
//! Upload streams the request body straight to `storage/<file_id>` while
//! accumulating an MD5, then takes the dedup lock for the resulting
//! `(name, size, md5)` fingerprint and decides between owner row and
//! symbolic row. Identical concurrent uploads all land on the same owner:
//! the lock serializes the find-duplicate/insert window, and losers unlink
//! their freshly written blob.

use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::SqlitePool;
use tokio::io::AsyncRead;

use crate::cache::{CachedFile, Caches};
use crate::db::models::{CreateFile, DFile, FileInfo, FileRecord, FILE_ID_PREFIX, STATUS_NORMAL};
use crate::error::{AppError, AppResult};
use crate::lock::{upload_lock_key, NamedLocks};
use crate::storage::checksum::copy_checksum;
use crate::storage::paths::PathLayout;

/// Length of the random suffix after `file_`.
const FILE_ID_SUFFIX_LEN: usize = 26;
/// Length of a download key.
pub const DOWNLOAD_KEY_LEN: usize = 30;
/// Length of an upload-file-id handed back to upload callers.
pub const UPLOAD_FILE_ID_LEN: usize = 40;

/// Random alphanumeric token of the given length.
pub fn rand_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generates a fresh opaque file identifier, e.g. `file_8fQ…`.
pub fn gen_file_id() -> String {
    format!("{}{}", FILE_ID_PREFIX, rand_token(FILE_ID_SUFFIX_LEN))
}

/// Stores the stream as a new logical file and returns its `file_id`.
///
/// If the insert fails after the blob hit disk, the blob is an orphan; the
/// sanitize sweep reclaims it after the grace window.
pub async fn upload<R>(
    pool: &SqlitePool,
    layout: &PathLayout,
    locks: &NamedLocks,
    mut reader: R,
    filename: &str,
) -> AppResult<String>
where
    R: AsyncRead + Unpin,
{
    let file_id = gen_file_id();
    let target = layout.storage_path(&file_id);
    tracing::info!(%file_id, path = %target.display(), "storing upload");

    let mut out = tokio::fs::File::create(&target).await?;
    let (size, md5) = copy_checksum(&mut reader, &mut out).await?;
    drop(out);

    // Serialize the dedup decision for this fingerprint across concurrent
    // uploaders. Exactly one of them commits the owner row.
    let _dedup = locks.acquire(&upload_lock_key(filename, size, &md5)).await;

    let link = match find_duplicate(pool, filename, size, &md5).await? {
        Some(owner_file_id) => {
            // Same content already owned: drop the temp blob, reference the
            // owner instead. A leftover blob is reclaimed by sanitize.
            if let Err(e) = tokio::fs::remove_file(&target).await {
                tracing::warn!(%file_id, "failed to remove duplicate temp blob: {e}");
            }
            tracing::info!(%file_id, owner = %owner_file_id, "duplicate upload, linking");
            owner_file_id
        }
        None => String::new(),
    };

    create_file_rec(
        pool,
        CreateFile {
            file_id: file_id.clone(),
            name: filename.to_string(),
            size,
            md5,
            link,
        },
    )
    .await?;

    Ok(file_id)
}

/// Inserts a catalog row with status NORMAL and the current upload time.
pub async fn create_file_rec(pool: &SqlitePool, c: CreateFile) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO file (file_id, name, status, size, md5, link, upl_time) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&c.file_id)
    .bind(&c.name)
    .bind(STATUS_NORMAL)
    .bind(c.size)
    .bind(&c.md5)
    .bind(&c.link)
    .bind(chrono::Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// First NORMAL owner row (`link = ''`) matching the fingerprint, or None.
pub async fn find_duplicate(
    pool: &SqlitePool,
    name: &str,
    size: i64,
    md5: &str,
) -> AppResult<Option<String>> {
    let file_id = sqlx::query_scalar::<_, String>(
        "SELECT file_id FROM file \
         WHERE name = ? AND size = ? AND md5 = ? AND status = ? AND link = '' \
         LIMIT 1",
    )
    .bind(name)
    .bind(size)
    .bind(md5)
    .bind(STATUS_NORMAL)
    .fetch_optional(pool)
    .await?;
    Ok(file_id)
}

/// Full catalog row, or None when the id is unknown.
pub async fn find_file(pool: &SqlitePool, file_id: &str) -> AppResult<Option<FileRecord>> {
    let f = sqlx::query_as::<_, FileRecord>("SELECT * FROM file WHERE file_id = ?")
        .bind(file_id)
        .fetch_optional(pool)
        .await?;
    Ok(f)
}

/// Transfer projection; `FileNotFound` when the id is unknown.
pub async fn find_dfile(pool: &SqlitePool, file_id: &str) -> AppResult<DFile> {
    sqlx::query_as::<_, DFile>(
        "SELECT file_id, link, size, status, name FROM file WHERE file_id = ?",
    )
    .bind(file_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::FileNotFound)
}

/// Uncached existence check: a NORMAL row for this id.
pub async fn check_file_exists(pool: &SqlitePool, file_id: &str) -> AppResult<bool> {
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM file WHERE file_id = ? AND status = ? LIMIT 1",
    )
    .bind(file_id)
    .bind(STATUS_NORMAL)
    .fetch_optional(pool)
    .await?;
    Ok(id.is_some())
}

/// Existence check through the 10-minute positive/negative cache. Used only
/// when minting download keys; key *resolution* re-queries the catalog so a
/// stale positive here can never resurrect a deleted file.
pub async fn fast_check_file_exists(
    pool: &SqlitePool,
    caches: &Caches,
    file_id: &str,
) -> AppResult<()> {
    let exists = caches
        .file_exists
        .try_get_with(file_id.to_string(), check_file_exists(pool, file_id))
        .await
        .map_err(|e| AppError::Internal(format!("existence check failed: {e}")))?;
    if !exists {
        return Err(AppError::FileNotFound);
    }
    Ok(())
}

/// Mints a 30-character download key for `file_id`, valid for 30 minutes.
/// `override_name` replaces the catalog name in Content-Disposition when
/// non-empty.
pub async fn mint_download_key(
    pool: &SqlitePool,
    caches: &Caches,
    file_id: &str,
    override_name: &str,
) -> AppResult<String> {
    fast_check_file_exists(pool, caches, file_id).await?;

    let key = rand_token(DOWNLOAD_KEY_LEN);
    caches
        .download_keys
        .insert(
            key.clone(),
            CachedFile {
                file_id: file_id.to_string(),
                name: override_name.to_string(),
            },
        )
        .await;
    tracing::info!(%file_id, %key, "minted download key");
    Ok(key)
}

/// Resolves a download key without touching its TTL.
pub async fn resolve_download_key(caches: &Caches, key: &str) -> Option<CachedFile> {
    caches.download_keys.get(key).await
}

/// Re-inserts the entry, restarting its 30-minute TTL. Called on every
/// stream access so playback sessions outlive the initial window.
pub async fn refresh_download_key(caches: &Caches, key: &str, cached: &CachedFile) {
    caches
        .download_keys
        .insert(key.to_string(), cached.clone())
        .await;
}

/// Mints the opaque token returned to upload callers instead of the real
/// file_id, cached for 6 hours.
pub async fn mint_upload_file_id(caches: &Caches, file_id: &str) -> String {
    let token = rand_token(UPLOAD_FILE_ID_LEN);
    caches
        .upload_file_ids
        .insert(token.clone(), file_id.to_string())
        .await;
    token
}

/// Resolves file metadata by `uploadFileId` or by `fileId`.
///
/// The upload-file-id exchange is one-shot: a successful resolution
/// invalidates the cache entry.
pub async fn file_info(
    pool: &SqlitePool,
    caches: &Caches,
    upload_file_id: Option<&str>,
    file_id: Option<&str>,
) -> AppResult<FileInfo> {
    let resolved;
    let file_id = match upload_file_id.filter(|s| !s.is_empty()) {
        Some(token) => {
            resolved = caches
                .upload_file_ids
                .get(token)
                .await
                .ok_or(AppError::FileNotFound)?;
            caches.upload_file_ids.invalidate(token).await;
            resolved.as_str()
        }
        None => file_id.unwrap_or("").trim(),
    };
    if file_id.is_empty() {
        return Err(AppError::FileNotFound);
    }

    let f = find_file(pool, file_id)
        .await?
        .ok_or(AppError::FileNotFound)?;
    Ok(FileInfo::from(f))
}
