//! Storage sanitation.
//!
//! Walks the storage directory and moves files without a catalog row into
//! the trash directory. Only entries whose mtime is older than the grace
//! window are considered, so a blob mid-upload (written before its row is
//! inserted) is never touched. Orphans appear when the process dies between
//! blob write and row insert, or when an upload loses the dedup race.

use std::time::{Duration, SystemTime};

use sqlx::SqlitePool;

use crate::error::AppResult;
use crate::services::files;
use crate::storage::paths::PathLayout;

/// Files modified within this window are ignored.
const SANITIZE_GRACE: Duration = Duration::from_secs(6 * 60 * 60);

/// Sweeps the storage directory. In dry-run mode the intended moves are
/// logged and nothing is touched.
pub async fn sanitize_storage(
    pool: &SqlitePool,
    layout: &PathLayout,
    dry_run: bool,
) -> AppResult<()> {
    let threshold = SystemTime::now() - SANITIZE_GRACE;
    sanitize_older_than(pool, layout, dry_run, threshold).await
}

/// The sweep proper, parameterized over the cutoff so tests can move it.
async fn sanitize_older_than(
    pool: &SqlitePool,
    layout: &PathLayout,
    dry_run: bool,
    threshold: SystemTime,
) -> AppResult<()> {
    let mut entries = match tokio::fs::read_dir(layout.storage_dir()).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut scanned = 0u64;
    let mut moved = 0u64;
    while let Some(entry) = entries.next_entry().await? {
        scanned += 1;
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        // Recently written files may still be waiting on their row insert.
        if meta.modified()? > threshold {
            continue;
        }

        let file_id = entry.file_name().to_string_lossy().into_owned();
        if files::find_file(pool, &file_id).await?.is_some() {
            continue;
        }

        let from = entry.path();
        let to = layout.trash_path(&file_id);
        if dry_run {
            tracing::info!(%file_id, from = %from.display(), to = %to.display(),
                "sanitize dry-run, would move orphan");
            continue;
        }
        match tokio::fs::rename(&from, &to).await {
            Ok(()) => {
                moved += 1;
                tracing::info!(%file_id, to = %to.display(), "moved orphan to trash");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                // Leave it for the next sweep.
                tracing::error!(%file_id, "failed to move orphan: {e}");
            }
        }
    }

    tracing::info!(scanned, moved, "sanitize sweep finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::files::upload;
    use crate::testutil;

    fn future_cutoff() -> SystemTime {
        SystemTime::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn orphans_past_the_window_move_to_trash() {
        let ctx = testutil::ctx().await;
        std::fs::write(ctx.layout.storage_path("file_orphan"), b"lost").unwrap();

        sanitize_older_than(&ctx.pool, &ctx.layout, false, future_cutoff())
            .await
            .unwrap();

        assert!(!ctx.layout.storage_path("file_orphan").exists());
        assert_eq!(
            std::fs::read(ctx.layout.trash_path("file_orphan")).unwrap(),
            b"lost"
        );
    }

    #[tokio::test]
    async fn cataloged_blobs_are_left_alone() {
        let ctx = testutil::ctx().await;
        let id = upload(&ctx.pool, &ctx.layout, &ctx.locks, &b"kept"[..], "kept.txt")
            .await
            .unwrap();

        sanitize_older_than(&ctx.pool, &ctx.layout, false, future_cutoff())
            .await
            .unwrap();

        assert!(ctx.layout.storage_path(&id).exists());
    }

    #[tokio::test]
    async fn recent_files_are_never_touched() {
        let ctx = testutil::ctx().await;
        std::fs::write(ctx.layout.storage_path("file_fresh"), b"uploading").unwrap();

        // Real cutoff: the file was written milliseconds ago.
        sanitize_storage(&ctx.pool, &ctx.layout, false).await.unwrap();

        assert!(ctx.layout.storage_path("file_fresh").exists());
    }

    #[tokio::test]
    async fn dry_run_only_logs() {
        let ctx = testutil::ctx().await;
        std::fs::write(ctx.layout.storage_path("file_orphan"), b"lost").unwrap();

        sanitize_older_than(&ctx.pool, &ctx.layout, true, future_cutoff())
            .await
            .unwrap();

        assert!(ctx.layout.storage_path("file_orphan").exists());
        assert!(!ctx.layout.trash_path("file_orphan").exists());
    }

    #[tokio::test]
    async fn missing_storage_dir_is_a_no_op() {
        let ctx = testutil::ctx().await;
        std::fs::remove_dir_all(ctx.layout.storage_dir()).unwrap();
        sanitize_storage(&ctx.pool, &ctx.layout, false).await.unwrap();
    }
}
