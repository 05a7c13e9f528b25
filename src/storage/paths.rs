//! Resolution of file identifiers to on-disk paths.
//!
//! The layout is flat: `storage_dir/<file_id>` for live blobs,
//! `trash_dir/<file_id>` for trashed ones, and a per-job scratch directory
//! under `tmp_dir` for the unzip pipeline. Paths are never constructed from
//! caller-supplied names, only from generated file ids.

use std::path::{Path, PathBuf};

use crate::error::AppResult;

/// Resolves file ids to storage, trash, and scratch paths.
///
/// Cheap to clone; carried inside `AppState`.
#[derive(Debug, Clone)]
pub struct PathLayout {
    storage_dir: PathBuf,
    trash_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl PathLayout {
    /// Builds a layout from the configured directory roots. Trailing slashes
    /// are normalized away so joined paths never contain doubled separators.
    pub fn new(storage_dir: &str, trash_dir: &str, tmp_dir: &str) -> Self {
        PathLayout {
            storage_dir: PathBuf::from(storage_dir.trim_end_matches('/')),
            trash_dir: PathBuf::from(trash_dir.trim_end_matches('/')),
            tmp_dir: PathBuf::from(tmp_dir.trim_end_matches('/')),
        }
    }

    /// Creates the storage and trash directories (mkdir -p). Called once at
    /// startup; repeated calls are harmless.
    pub fn init(&self) -> AppResult<()> {
        std::fs::create_dir_all(&self.storage_dir)?;
        std::fs::create_dir_all(&self.trash_dir)?;
        Ok(())
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn storage_path(&self, file_id: &str) -> PathBuf {
        self.storage_dir.join(file_id)
    }

    pub fn trash_path(&self, file_id: &str) -> PathBuf {
        self.trash_dir.join(file_id)
    }

    /// A unique scratch directory for one unzip attempt. The random suffix
    /// keeps redelivered events from colliding on the same path.
    pub fn scratch_dir(&self, file_id: &str) -> PathBuf {
        self.tmp_dir
            .join(format!("{}_{}", file_id, uuid::Uuid::new_v4().simple()))
    }
}
