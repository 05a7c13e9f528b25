//! Asynchronous ZIP expansion.
//!
//! The HTTP trigger validates the zip row and publishes an event onto the
//! pipeline topic; a single consumer task per process extracts entries into
//! a scratch directory and feeds each one through the same dedup discipline
//! as a regular upload. The reply (with every stored entry) goes to the bus
//! named in the trigger. A 15-minute result cache keyed by zip file id makes
//! redelivery idempotent: replays publish the same reply without
//! re-extracting, and `extra` is copied through verbatim either way.
//!
//! Per-entry failure aborts the whole attempt — a partial reply is harder
//! for callers to reason about than a retry. Failed attempts are not
//! cached, so the next delivery retries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::mpsc;

use crate::cache::Caches;
use crate::db::models::CreateFile;
use crate::error::{AppError, AppResult};
use crate::events::{self, EventBus, UnzipFileEvent, UnzipFileReplyEvent, ZipEntry};
use crate::lock::{upload_lock_key, NamedLocks};
use crate::services::files;
use crate::storage::checksum::copy_checksum_blocking;
use crate::storage::paths::PathLayout;

/// One extracted-but-not-yet-saved zip entry sitting in the scratch dir.
#[derive(Debug)]
struct UnpackedEntry {
    name: String,
    md5: String,
    size: i64,
    path: PathBuf,
}

/// Validates the zip row and hands the job to the pipeline consumer.
///
/// Fast-fails with not-found / deleted / illegal-format so the caller gets
/// an immediate verdict; the heavy lifting happens on the consumer task.
pub async fn trigger_unzip(
    pool: &SqlitePool,
    bus: &EventBus,
    evt: UnzipFileEvent,
) -> AppResult<()> {
    let f = files::find_file(pool, &evt.file_id)
        .await?
        .ok_or(AppError::FileNotFound)?;
    if f.is_deleted() {
        return Err(AppError::FileDeleted);
    }
    if !f.name.to_lowercase().ends_with(".zip") {
        return Err(AppError::IllegalFormat("not a zip file".into()));
    }

    bus.publish(events::UNZIP_PIPELINE_TOPIC, &evt)
}

/// Spawns the single pipeline consumer. Parallelism is deliberately 1 per
/// process: extraction is memory- and disk-heavy.
pub fn spawn_consumer(
    pool: SqlitePool,
    layout: PathLayout,
    locks: Arc<NamedLocks>,
    caches: Arc<Caches>,
    bus: Arc<EventBus>,
    mut rx: mpsc::UnboundedReceiver<serde_json::Value>,
) {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let evt = match events::decode::<UnzipFileEvent>(msg) {
                Ok(evt) => evt,
                Err(e) => {
                    tracing::error!("dropping malformed unzip event: {e}");
                    continue;
                }
            };
            let zip_file_id = evt.file_id.clone();
            if let Err(e) = handle_event(&pool, &layout, &locks, &caches, &bus, evt).await {
                tracing::error!(%zip_file_id, "unzip attempt failed: {e}");
            }
        }
    });
}

/// Processes one trigger event, consulting the result cache first.
pub async fn handle_event(
    pool: &SqlitePool,
    layout: &PathLayout,
    locks: &NamedLocks,
    caches: &Caches,
    bus: &EventBus,
    evt: UnzipFileEvent,
) -> AppResult<()> {
    let mut reply = caches
        .unzip_results
        .try_get_with(
            evt.file_id.clone(),
            unzip_file(pool, layout, locks, &evt),
        )
        .await
        .map_err(|e| AppError::Internal(format!("unzip failed: {e}")))?;

    // The requester's correlation payload rides along verbatim, including on
    // cache hits from an earlier delivery.
    reply.extra = evt.extra;
    bus.publish(&evt.reply_to_event_bus, &reply)
}

/// The full extract-and-save attempt for one zip file.
async fn unzip_file(
    pool: &SqlitePool,
    layout: &PathLayout,
    locks: &NamedLocks,
    evt: &UnzipFileEvent,
) -> AppResult<UnzipFileReplyEvent> {
    let empty = UnzipFileReplyEvent {
        zip_file_id: evt.file_id.clone(),
        zip_entries: Vec::new(),
        extra: String::new(),
    };

    // The row may have changed since the trigger was validated; a vanished
    // or deleted zip yields an empty reply rather than an error.
    let Some(f) = files::find_file(pool, &evt.file_id).await? else {
        tracing::warn!(file_id = %evt.file_id, "zip file not found, replying empty");
        return Ok(empty);
    };
    if f.is_deleted() {
        tracing::warn!(file_id = %evt.file_id, "zip file deleted, replying empty");
        return Ok(empty);
    }
    if !f.name.to_lowercase().ends_with(".zip") {
        tracing::warn!(file_id = %evt.file_id, name = %f.name, "not a zip file, replying empty");
        return Ok(empty);
    }

    let effective = if f.link.is_empty() { &f.file_id } else { &f.link };
    let zip_path = layout.storage_path(effective);
    let scratch = layout.scratch_dir(&evt.file_id);
    tokio::fs::create_dir_all(&scratch).await?;
    tracing::info!(file_id = %evt.file_id, scratch = %scratch.display(), "unpacking zip");

    let result = unpack_and_save(pool, layout, locks, &zip_path, &scratch).await;

    if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
        tracing::warn!(scratch = %scratch.display(), "failed to remove scratch dir: {e}");
    }

    let entries = result?;
    tracing::info!(file_id = %evt.file_id, entries = entries.len(), "zip ingested");
    Ok(UnzipFileReplyEvent {
        zip_file_id: evt.file_id.clone(),
        zip_entries: entries,
        extra: String::new(),
    })
}

async fn unpack_and_save(
    pool: &SqlitePool,
    layout: &PathLayout,
    locks: &NamedLocks,
    zip_path: &Path,
    scratch: &Path,
) -> AppResult<Vec<ZipEntry>> {
    let unpacked = {
        let zip_path = zip_path.to_path_buf();
        let scratch = scratch.to_path_buf();
        // ZIP decoding is CPU-bound and the zip crate is synchronous; keep it
        // off the async workers.
        tokio::task::spawn_blocking(move || unpack_zip(&zip_path, &scratch))
            .await
            .map_err(|e| AppError::Internal(format!("unzip task panicked: {e}")))??
    };

    let mut saved = Vec::with_capacity(unpacked.len());
    for entry in unpacked {
        saved.push(save_entry(pool, layout, locks, entry).await?);
    }
    Ok(saved)
}

/// Streams every regular entry of the archive into its own scratch file,
/// hashing on the way.
fn unpack_zip(zip_path: &Path, scratch: &Path) -> AppResult<Vec<UnpackedEntry>> {
    let file = std::fs::File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| AppError::Internal(format!("failed to open zip: {e}")))?;

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| AppError::Internal(format!("failed to read zip entry: {e}")))?;
        if entry.is_dir() {
            continue;
        }

        let temp_path = scratch.join(format!("entry_{}", uuid::Uuid::new_v4().simple()));
        let mut out = std::fs::File::create(&temp_path)?;
        let (size, md5) = copy_checksum_blocking(&mut entry, &mut out)?;

        entries.push(UnpackedEntry {
            name: entry.name().to_string(),
            md5,
            size,
            path: temp_path,
        });
    }
    Ok(entries)
}

/// Stores one extracted entry under the same dedup discipline as an upload:
/// an existing owner turns the entry into a symbolic row (the scratch file
/// is discarded with the scratch dir), otherwise the scratch file is renamed
/// into place as a new owner blob.
async fn save_entry(
    pool: &SqlitePool,
    layout: &PathLayout,
    locks: &NamedLocks,
    entry: UnpackedEntry,
) -> AppResult<ZipEntry> {
    let _dedup = locks
        .acquire(&upload_lock_key(&entry.name, entry.size, &entry.md5))
        .await;

    let file_id = files::gen_file_id();
    let link = match files::find_duplicate(pool, &entry.name, entry.size, &entry.md5).await? {
        Some(owner_file_id) => {
            tracing::info!(name = %entry.name, owner = %owner_file_id,
                "duplicate zip entry, linking");
            owner_file_id
        }
        None => {
            tokio::fs::rename(&entry.path, layout.storage_path(&file_id)).await?;
            String::new()
        }
    };

    files::create_file_rec(
        pool,
        CreateFile {
            file_id: file_id.clone(),
            name: entry.name.clone(),
            size: entry.size,
            md5: entry.md5.clone(),
            link,
        },
    )
    .await?;

    Ok(ZipEntry {
        file_id,
        md5: entry.md5,
        name: entry.name,
        size: entry.size,
    })
}
