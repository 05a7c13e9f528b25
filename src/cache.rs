//! Short-TTL caches.
//!
//! Everything here is ephemeral: the catalog is the only authority. Four
//! stores live side by side:
//!
//! * download keys  — 30 min, refreshed on each stream access
//! * upload-file-ids — 6 h, one-shot exchange for the real file_id
//! * file existence — 10 min, consulted only when minting download keys
//! * unzip results  — 15 min, makes event redelivery idempotent

use std::time::Duration;

use moka::future::Cache;
use serde::{Deserialize, Serialize};

use crate::events::UnzipFileReplyEvent;

/// Value stored behind a download key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedFile {
    pub file_id: String,
    /// Override filename for Content-Disposition; empty means "use the
    /// catalog name".
    pub name: String,
}

pub struct Caches {
    /// `key → {file_id, override_name}`.
    pub download_keys: Cache<String, CachedFile>,
    /// `upload-file-id → real file_id`.
    pub upload_file_ids: Cache<String, String>,
    /// Positive/negative existence checks, keyed by file_id.
    pub file_exists: Cache<String, bool>,
    /// `zip_file_id → reply event` for the unzip pipeline.
    pub unzip_results: Cache<String, UnzipFileReplyEvent>,
}

impl Caches {
    pub fn new() -> Self {
        Caches {
            download_keys: Cache::builder()
                .time_to_live(Duration::from_secs(30 * 60))
                .build(),
            upload_file_ids: Cache::builder()
                .time_to_live(Duration::from_secs(6 * 60 * 60))
                .build(),
            file_exists: Cache::builder()
                .time_to_live(Duration::from_secs(10 * 60))
                .build(),
            unzip_results: Cache::builder()
                .time_to_live(Duration::from_secs(15 * 60))
                .build(),
        }
    }
}

impl Default for Caches {
    fn default() -> Self {
        Self::new()
    }
}
