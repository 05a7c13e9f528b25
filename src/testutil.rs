//! Shared fixtures for module tests: an in-memory catalog plus a throwaway
//! on-disk layout (storage/trash/tmp under one temp directory).

use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::cache::Caches;
use crate::db;
use crate::events::EventBus;
use crate::lock::NamedLocks;
use crate::storage::paths::PathLayout;

pub struct TestCtx {
    pub pool: SqlitePool,
    pub layout: PathLayout,
    pub locks: NamedLocks,
    pub caches: Caches,
    pub bus: EventBus,
    // Held so the directories outlive the test body.
    _root: TempDir,
}

pub async fn ctx() -> TestCtx {
    let root = tempfile::tempdir().expect("failed to create temp dir");
    let storage = root.path().join("storage");
    let trash = root.path().join("trash");
    let tmp = root.path().join("tmp");
    std::fs::create_dir_all(&tmp).unwrap();

    let layout = PathLayout::new(
        storage.to_str().unwrap(),
        trash.to_str().unwrap(),
        tmp.to_str().unwrap(),
    );
    layout.init().unwrap();

    TestCtx {
        pool: db::create_test_pool().await,
        layout,
        locks: NamedLocks::new(),
        caches: Caches::new(),
        bus: EventBus::new(),
        _root: root,
    }
}
