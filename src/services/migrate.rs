//! One-shot migration from a legacy file-server catalog.
//!
//! Runs before the server starts accepting requests, when enabled. Each
//! un-stamped legacy row is opened from the configured base path
//! (`<base>/<uploader_id>/<uuid>`), pushed through the regular upload
//! pipeline (so dedup and catalog invariants apply unchanged), and stamped
//! with the resulting file_id. Re-running resumes where it left off: stamped
//! rows are excluded from the scan.

use std::path::{Path, PathBuf};

use sqlx::SqlitePool;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::lock::NamedLocks;
use crate::services::files;
use crate::storage::paths::PathLayout;

const PAGE_SIZE: i64 = 1000;

/// An un-migrated row of the legacy `file_info` table.
#[derive(Debug, sqlx::FromRow)]
struct LegacyFileInfo {
    id: i64,
    uuid: String,
    name: String,
    uploader_id: i64,
}

/// Entry point called from `main`. No-op unless enabled in config.
pub async fn try_migrate(
    config: &Config,
    pool: &SqlitePool,
    layout: &PathLayout,
    locks: &NamedLocks,
) -> AppResult<()> {
    if !config.migration_enabled {
        return Ok(());
    }
    if config.migration_database_url.is_empty() {
        return Err(AppError::Internal(
            "MIGRATION_DATABASE_URL is required when migration is enabled".into(),
        ));
    }
    if config.migration_storage.is_empty() {
        return Err(AppError::Internal(
            "MIGRATION_STORAGE is required when migration is enabled".into(),
        ));
    }

    tracing::info!(dry_run = config.migration_dry_run, "starting legacy catalog migration");
    let legacy = SqlitePool::connect(&config.migration_database_url).await?;
    let result = migrate_catalog(
        pool,
        layout,
        locks,
        &legacy,
        Path::new(&config.migration_storage),
        config.migration_dry_run,
    )
    .await;
    legacy.close().await;
    result
}

/// Walks the legacy catalog in keyset pages and migrates each row.
async fn migrate_catalog(
    pool: &SqlitePool,
    layout: &PathLayout,
    locks: &NamedLocks,
    legacy: &SqlitePool,
    base_path: &Path,
    dry_run: bool,
) -> AppResult<()> {
    ensure_stamp_column(legacy).await?;

    let mut id_offset: i64 = 0;
    let mut migrated = 0u64;
    loop {
        let rows = sqlx::query_as::<_, LegacyFileInfo>(
            "SELECT id, uuid, name, uploader_id FROM file_info \
             WHERE fstore_file_id = '' AND id > ? ORDER BY id ASC LIMIT ?",
        )
        .bind(id_offset)
        .bind(PAGE_SIZE)
        .fetch_all(legacy)
        .await?;

        let Some(last) = rows.last() else {
            tracing::info!(migrated, "legacy catalog migration finished");
            return Ok(());
        };
        id_offset = last.id;

        for row in &rows {
            if migrate_row(pool, layout, locks, legacy, base_path, row, dry_run).await? {
                migrated += 1;
            }
        }
    }
}

/// Migrates one legacy row. Returns false when the source file is missing
/// (skipped with a warning) or in dry-run mode.
async fn migrate_row(
    pool: &SqlitePool,
    layout: &PathLayout,
    locks: &NamedLocks,
    legacy: &SqlitePool,
    base_path: &Path,
    row: &LegacyFileInfo,
    dry_run: bool,
) -> AppResult<bool> {
    let path = legacy_path(base_path, row);

    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(uuid = %row.uuid, path = %path.display(), "legacy file missing, skipped");
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };

    if dry_run {
        tracing::info!(uuid = %row.uuid, path = %path.display(), "dry-run, would migrate");
        return Ok(false);
    }

    let file_id = files::upload(pool, layout, locks, file, &row.name).await?;
    sqlx::query("UPDATE file_info SET fstore_file_id = ? WHERE id = ?")
        .bind(&file_id)
        .bind(row.id)
        .execute(legacy)
        .await?;
    tracing::info!(uuid = %row.uuid, %file_id, "migrated legacy file");
    Ok(true)
}

fn legacy_path(base_path: &Path, row: &LegacyFileInfo) -> PathBuf {
    base_path.join(row.uploader_id.to_string()).join(&row.uuid)
}

/// The stamp column must exist before migration; it is owned by the legacy
/// schema, so we refuse to add it ourselves.
async fn ensure_stamp_column(legacy: &SqlitePool) -> AppResult<()> {
    let present = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM pragma_table_info('file_info') WHERE name = 'fstore_file_id'",
    )
    .fetch_one(legacy)
    .await?;
    if present == 0 {
        return Err(AppError::Internal(
            "legacy table file_info lacks the fstore_file_id column; \
             run: ALTER TABLE file_info ADD COLUMN fstore_file_id TEXT NOT NULL DEFAULT ''"
                .into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn legacy_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE file_info (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 uuid TEXT NOT NULL,
                 name TEXT NOT NULL,
                 uploader_id INTEGER NOT NULL,
                 fstore_file_id TEXT NOT NULL DEFAULT ''
             )",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    async fn seed_legacy(legacy: &SqlitePool, base: &Path, uploader: i64, uuid: &str, name: &str, content: &[u8]) {
        sqlx::query("INSERT INTO file_info (uuid, name, uploader_id) VALUES (?, ?, ?)")
            .bind(uuid)
            .bind(name)
            .bind(uploader)
            .execute(legacy)
            .await
            .unwrap();
        let dir = base.join(uploader.to_string());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(uuid), content).unwrap();
    }

    #[tokio::test]
    async fn migrates_and_stamps_legacy_rows() {
        let ctx = testutil::ctx().await;
        let legacy = legacy_pool().await;
        let base = tempfile::tempdir().unwrap();

        seed_legacy(&legacy, base.path(), 7, "uuid-1", "doc.txt", b"legacy doc").await;
        // Missing source file: skipped, not fatal.
        sqlx::query("INSERT INTO file_info (uuid, name, uploader_id) VALUES ('uuid-2', 'gone.txt', 7)")
            .execute(&legacy)
            .await
            .unwrap();

        migrate_catalog(&ctx.pool, &ctx.layout, &ctx.locks, &legacy, base.path(), false)
            .await
            .unwrap();

        let stamp: String =
            sqlx::query_scalar("SELECT fstore_file_id FROM file_info WHERE uuid = 'uuid-1'")
                .fetch_one(&legacy)
                .await
                .unwrap();
        assert!(stamp.starts_with("file_"));

        let f = files::find_file(&ctx.pool, &stamp).await.unwrap().unwrap();
        assert_eq!(f.name, "doc.txt");
        assert_eq!(f.size, 10);
        assert!(ctx.layout.storage_path(&stamp).exists());

        let unstamped: String =
            sqlx::query_scalar("SELECT fstore_file_id FROM file_info WHERE uuid = 'uuid-2'")
                .fetch_one(&legacy)
                .await
                .unwrap();
        assert_eq!(unstamped, "");
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let ctx = testutil::ctx().await;
        let legacy = legacy_pool().await;
        let base = tempfile::tempdir().unwrap();
        seed_legacy(&legacy, base.path(), 1, "uuid-1", "doc.txt", b"x").await;

        migrate_catalog(&ctx.pool, &ctx.layout, &ctx.locks, &legacy, base.path(), true)
            .await
            .unwrap();

        let stamp: String =
            sqlx::query_scalar("SELECT fstore_file_id FROM file_info WHERE uuid = 'uuid-1'")
                .fetch_one(&legacy)
                .await
                .unwrap();
        assert_eq!(stamp, "");
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM file")
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn refuses_a_legacy_table_without_the_stamp_column() {
        let ctx = testutil::ctx().await;
        let legacy = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE file_info (id INTEGER PRIMARY KEY, uuid TEXT, name TEXT, uploader_id INTEGER)")
            .execute(&legacy)
            .await
            .unwrap();
        let base = tempfile::tempdir().unwrap();

        let err = migrate_catalog(&ctx.pool, &ctx.layout, &ctx.locks, &legacy, base.path(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }
}
