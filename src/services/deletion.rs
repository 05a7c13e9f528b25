//! Two-phase deletion.
//!
//! Logical delete flips a row to LOG_DEL under its per-file lock. The
//! physical sweep later walks LOG_DEL rows past the grace window in keyset
//! pages, re-checks state under the same lock, refuses to touch any blob
//! still referenced by a NORMAL symbolic row, and applies the configured
//! physical strategy. Symbolic rows own no blob, so for them the strategy
//! call lands on an absent path and is a no-op by contract.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use crate::db::models::{PendingPhysicalDelete, STATUS_LOG_DEL, STATUS_NORMAL, STATUS_PHY_DEL};
use crate::error::{AppError, AppResult};
use crate::lock::{file_lock_key, NamedLocks};
use crate::services::files;
use crate::storage::paths::PathLayout;

/// Minimum age of a LOG_DEL row before the sweep will touch it.
pub fn pdelete_grace() -> Duration {
    Duration::hours(1)
}

/// Page size of the sweep's keyset scan.
const SWEEP_PAGE_SIZE: i64 = 500;

/// How a blob leaves the storage directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdeleteStrategy {
    /// Unlink in place.
    Direct,
    /// Rename into the trash directory (the default).
    Trash,
}

impl PdeleteStrategy {
    /// Unknown strategy names fall back to `Trash`.
    pub fn from_config(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "direct" => PdeleteStrategy::Direct,
            _ => PdeleteStrategy::Trash,
        }
    }

    /// Removes the blob for `file_id`. An already-absent file is success for
    /// both variants; that covers symbolic rows and lost races with manual
    /// cleanup.
    pub async fn delete(&self, layout: &PathLayout, file_id: &str) -> AppResult<()> {
        let from = layout.storage_path(file_id);
        let result = match self {
            PdeleteStrategy::Direct => tokio::fs::remove_file(&from).await,
            PdeleteStrategy::Trash => {
                tokio::fs::rename(&from, layout.trash_path(file_id)).await
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(%file_id, "blob already absent, nothing to remove");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Logically deletes a file: NORMAL → LOG_DEL under the per-file lock.
pub async fn ldelete(pool: &SqlitePool, locks: &NamedLocks, file_id: &str) -> AppResult<()> {
    let file_id = file_id.trim();
    if file_id.is_empty() {
        return Err(AppError::BadRequest("fileId is required".into()));
    }

    let _lock = locks.acquire(&file_lock_key(file_id)).await;

    let f = files::find_file(pool, file_id)
        .await?
        .ok_or(AppError::FileNotFound)?;
    if f.is_deleted() {
        return Err(AppError::FileDeleted);
    }

    sqlx::query("UPDATE file SET status = ?, log_del_time = ? WHERE file_id = ?")
        .bind(STATUS_LOG_DEL)
        .bind(Utc::now())
        .bind(file_id)
        .execute(pool)
        .await?;
    tracing::info!(%file_id, "logically deleted");
    Ok(())
}

/// True when at least one NORMAL row still links to `file_id`.
pub async fn any_normal_link_to(pool: &SqlitePool, file_id: &str) -> AppResult<bool> {
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM file WHERE link = ? AND status = ? LIMIT 1",
    )
    .bind(file_id)
    .bind(STATUS_NORMAL)
    .fetch_optional(pool)
    .await?;
    Ok(id.is_some())
}

/// LOG_DEL rows older than `before`, keyset-ordered by `id`.
pub async fn list_pending_physical(
    pool: &SqlitePool,
    before: DateTime<Utc>,
    id_offset: i64,
    limit: i64,
) -> AppResult<Vec<PendingPhysicalDelete>> {
    let l = sqlx::query_as::<_, PendingPhysicalDelete>(
        "SELECT id, file_id FROM file \
         WHERE id > ? AND status = ? AND log_del_time <= ? \
         ORDER BY id ASC LIMIT ?",
    )
    .bind(id_offset)
    .bind(STATUS_LOG_DEL)
    .bind(before)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(l)
}

/// One physical delete attempt: LOG_DEL → PHY_DEL.
///
/// Re-validates state under the per-file lock and skips (without error)
/// when the row has moved on or is still referenced.
pub async fn phy_del_file(
    pool: &SqlitePool,
    layout: &PathLayout,
    locks: &NamedLocks,
    file_id: &str,
    strategy: PdeleteStrategy,
) -> AppResult<()> {
    let file_id = file_id.trim();
    if file_id.is_empty() {
        return Err(AppError::BadRequest("fileId is required".into()));
    }

    let _lock = locks.acquire(&file_lock_key(file_id)).await;

    let Some(f) = files::find_file(pool, file_id).await? else {
        return Ok(());
    };
    if !f.is_logically_deleted() {
        return Ok(());
    }

    // The blob may still back NORMAL symbolic rows; leave it for a later
    // sweep once those are gone.
    if any_normal_link_to(pool, file_id).await? {
        tracing::info!(%file_id, "still symbolically linked, skipping physical delete");
        return Ok(());
    }

    strategy.delete(layout, file_id).await?;

    sqlx::query("UPDATE file SET status = ?, phy_del_time = ? WHERE file_id = ?")
        .bind(STATUS_PHY_DEL)
        .bind(Utc::now())
        .bind(file_id)
        .execute(pool)
        .await?;
    tracing::info!(%file_id, "physically deleted");
    Ok(())
}

/// The physical delete sweep. Pages through eligible rows and attempts each
/// one; per-file failures are logged and left for the next cycle.
pub async fn remove_deleted(
    pool: &SqlitePool,
    layout: &PathLayout,
    locks: &NamedLocks,
    strategy: PdeleteStrategy,
) -> AppResult<()> {
    let before = Utc::now() - pdelete_grace();
    let mut min_id: i64 = 0;

    loop {
        let page = list_pending_physical(pool, before, min_id, SWEEP_PAGE_SIZE).await?;
        let Some(last) = page.last() else {
            return Ok(());
        };
        min_id = last.id;

        for f in &page {
            if let Err(e) = phy_del_file(pool, layout, locks, &f.file_id, strategy).await {
                tracing::error!(file_id = %f.file_id, ?strategy, "physical delete failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::files::upload;
    use crate::testutil;

    async fn backdate_log_del(pool: &SqlitePool, file_id: &str, hours: i64) {
        sqlx::query("UPDATE file SET log_del_time = ? WHERE file_id = ?")
            .bind(Utc::now() - Duration::hours(hours))
            .bind(file_id)
            .execute(pool)
            .await
            .unwrap();
    }

    async fn status_of(pool: &SqlitePool, file_id: &str) -> String {
        sqlx::query_scalar("SELECT status FROM file WHERE file_id = ?")
            .bind(file_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[test]
    fn unknown_strategy_falls_back_to_trash() {
        assert_eq!(PdeleteStrategy::from_config("direct"), PdeleteStrategy::Direct);
        assert_eq!(PdeleteStrategy::from_config("TRASH"), PdeleteStrategy::Trash);
        assert_eq!(PdeleteStrategy::from_config("wat"), PdeleteStrategy::Trash);
        assert_eq!(PdeleteStrategy::from_config(""), PdeleteStrategy::Trash);
    }

    #[tokio::test]
    async fn ldelete_marks_and_stamps() {
        let ctx = testutil::ctx().await;
        let id = upload(&ctx.pool, &ctx.layout, &ctx.locks, &b"x"[..], "x.txt")
            .await
            .unwrap();

        ldelete(&ctx.pool, &ctx.locks, &id).await.unwrap();

        let f = files::find_file(&ctx.pool, &id).await.unwrap().unwrap();
        assert_eq!(f.status, STATUS_LOG_DEL);
        assert!(f.log_del_time.is_some());
        assert!(f.phy_del_time.is_none());
    }

    #[tokio::test]
    async fn ldelete_is_not_repeatable_and_requires_an_id() {
        let ctx = testutil::ctx().await;
        let id = upload(&ctx.pool, &ctx.layout, &ctx.locks, &b"x"[..], "x.txt")
            .await
            .unwrap();

        ldelete(&ctx.pool, &ctx.locks, &id).await.unwrap();
        assert!(matches!(
            ldelete(&ctx.pool, &ctx.locks, &id).await,
            Err(AppError::FileDeleted)
        ));
        assert!(matches!(
            ldelete(&ctx.pool, &ctx.locks, "file_missing").await,
            Err(AppError::FileNotFound)
        ));
        assert!(matches!(
            ldelete(&ctx.pool, &ctx.locks, "  ").await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn sweep_respects_the_grace_window() {
        let ctx = testutil::ctx().await;
        let id = upload(&ctx.pool, &ctx.layout, &ctx.locks, &b"x"[..], "x.txt")
            .await
            .unwrap();
        ldelete(&ctx.pool, &ctx.locks, &id).await.unwrap();

        // Freshly deleted: too young for the sweep.
        remove_deleted(&ctx.pool, &ctx.layout, &ctx.locks, PdeleteStrategy::Trash)
            .await
            .unwrap();
        assert_eq!(status_of(&ctx.pool, &id).await, STATUS_LOG_DEL);
        assert!(ctx.layout.storage_path(&id).exists());
    }

    #[tokio::test]
    async fn sweep_spares_owners_still_referenced() {
        let ctx = testutil::ctx().await;
        let owner = upload(&ctx.pool, &ctx.layout, &ctx.locks, &b"shared"[..], "s.txt")
            .await
            .unwrap();
        let twin = upload(&ctx.pool, &ctx.layout, &ctx.locks, &b"shared"[..], "s.txt")
            .await
            .unwrap();

        ldelete(&ctx.pool, &ctx.locks, &owner).await.unwrap();
        backdate_log_del(&ctx.pool, &owner, 2).await;

        remove_deleted(&ctx.pool, &ctx.layout, &ctx.locks, PdeleteStrategy::Trash)
            .await
            .unwrap();

        // The twin still reads through the owner's blob.
        assert_eq!(status_of(&ctx.pool, &owner).await, STATUS_LOG_DEL);
        assert!(ctx.layout.storage_path(&owner).exists());
        assert_eq!(status_of(&ctx.pool, &twin).await, STATUS_NORMAL);
    }

    #[tokio::test]
    async fn symbolic_then_owner_deletion_moves_blob_to_trash() {
        let ctx = testutil::ctx().await;
        let owner = upload(&ctx.pool, &ctx.layout, &ctx.locks, &b"shared"[..], "s.txt")
            .await
            .unwrap();
        let twin = upload(&ctx.pool, &ctx.layout, &ctx.locks, &b"shared"[..], "s.txt")
            .await
            .unwrap();

        // Phase 1: drop the symbolic row. No filesystem action — it owns no
        // blob, and the strategy call is a no-op on the absent path.
        ldelete(&ctx.pool, &ctx.locks, &twin).await.unwrap();
        backdate_log_del(&ctx.pool, &twin, 2).await;
        remove_deleted(&ctx.pool, &ctx.layout, &ctx.locks, PdeleteStrategy::Trash)
            .await
            .unwrap();

        assert_eq!(status_of(&ctx.pool, &twin).await, STATUS_PHY_DEL);
        assert!(ctx.layout.storage_path(&owner).exists());
        assert_eq!(status_of(&ctx.pool, &owner).await, STATUS_NORMAL);

        // Phase 2: now the owner is unreferenced; its blob moves to trash.
        ldelete(&ctx.pool, &ctx.locks, &owner).await.unwrap();
        backdate_log_del(&ctx.pool, &owner, 2).await;
        remove_deleted(&ctx.pool, &ctx.layout, &ctx.locks, PdeleteStrategy::Trash)
            .await
            .unwrap();

        assert_eq!(status_of(&ctx.pool, &owner).await, STATUS_PHY_DEL);
        assert!(!ctx.layout.storage_path(&owner).exists());
        assert!(ctx.layout.trash_path(&owner).exists());
        assert_eq!(
            std::fs::read(ctx.layout.trash_path(&owner)).unwrap(),
            b"shared"
        );
    }

    #[tokio::test]
    async fn direct_strategy_unlinks_in_place() {
        let ctx = testutil::ctx().await;
        let id = upload(&ctx.pool, &ctx.layout, &ctx.locks, &b"x"[..], "x.txt")
            .await
            .unwrap();
        ldelete(&ctx.pool, &ctx.locks, &id).await.unwrap();
        backdate_log_del(&ctx.pool, &id, 2).await;

        remove_deleted(&ctx.pool, &ctx.layout, &ctx.locks, PdeleteStrategy::Direct)
            .await
            .unwrap();

        assert_eq!(status_of(&ctx.pool, &id).await, STATUS_PHY_DEL);
        assert!(!ctx.layout.storage_path(&id).exists());
        assert!(!ctx.layout.trash_path(&id).exists());
    }

    #[tokio::test]
    async fn phy_del_skips_rows_that_moved_on() {
        let ctx = testutil::ctx().await;
        let id = upload(&ctx.pool, &ctx.layout, &ctx.locks, &b"x"[..], "x.txt")
            .await
            .unwrap();

        // Still NORMAL: nothing happens.
        phy_del_file(&ctx.pool, &ctx.layout, &ctx.locks, &id, PdeleteStrategy::Trash)
            .await
            .unwrap();
        assert_eq!(status_of(&ctx.pool, &id).await, STATUS_NORMAL);
        assert!(ctx.layout.storage_path(&id).exists());

        // Unknown row: also a no-op.
        phy_del_file(
            &ctx.pool,
            &ctx.layout,
            &ctx.locks,
            "file_missing",
            PdeleteStrategy::Trash,
        )
        .await
        .unwrap();
    }
}
