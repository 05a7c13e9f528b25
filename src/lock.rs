//! Named async mutexes.
//!
//! Two disciplines hang off these locks: per-file state transitions
//! (`file:<file_id>`) and dedup decisions (`upload:<name>:<size>:<md5>`).
//! The registry hands out keyed `tokio::sync::Mutex` guards; entries are
//! dropped from the map once the last holder releases, so the key space
//! never grows unbounded.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock key serializing all state transitions of one file.
pub fn file_lock_key(file_id: &str) -> String {
    format!("file:{file_id}")
}

/// Lock key serializing dedup decisions for one (name, size, md5)
/// fingerprint. Name-sensitive: the same bytes under a different name are a
/// distinct logical file.
pub fn upload_lock_key(name: &str, size: i64, md5: &str) -> String {
    format!("upload:{name}:{size}:{md5}")
}

#[derive(Default)]
pub struct NamedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NamedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the mutex registered under `key`, waiting if another task
    /// holds it. The lock is released when the returned guard drops.
    pub async fn acquire(&self, key: &str) -> NamedLockGuard<'_> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.clone().lock_owned().await;
        NamedLockGuard {
            locks: &self.locks,
            key: key.to_string(),
            mutex,
            guard: Some(guard),
        }
    }
}

pub struct NamedLockGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    mutex: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for NamedLockGuard<'_> {
    fn drop(&mut self) {
        // Release first, then retire the map entry if nobody else holds a
        // clone. remove_if holds the shard lock during the predicate, so a
        // concurrent acquire either sees the entry (count > 2) or re-creates
        // it after removal; mutual exclusion is preserved either way.
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, _| Arc::strong_count(&self.mutex) <= 2);
    }
}
