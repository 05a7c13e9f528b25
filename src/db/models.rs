use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Status values ────────────────────────────────────────────────────────────
//
// Transitions are monotone: NORMAL → LOG_DEL → PHY_DEL. Rows are never
// hard-deleted from the table.

pub const STATUS_NORMAL: &str = "NORMAL";
pub const STATUS_LOG_DEL: &str = "LOG_DEL";
pub const STATUS_PHY_DEL: &str = "PHY_DEL";

/// Prefix of every generated file_id.
pub const FILE_ID_PREFIX: &str = "file_";

// ─── Read models (database rows) ─────────────────────────────────────────────
//
// Each struct maps 1-to-1 to a `file` table projection. `sqlx::FromRow` is
// derived so sqlx can hydrate them directly from query results. Timestamp
// columns are stored as TEXT in SQLite and mapped to DateTime<Utc> by sqlx
// via the chrono integration.

/// A full row of the `file` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileRecord {
    pub id: i64,
    pub file_id: String,
    pub name: String,
    pub status: String,
    pub size: i64,
    pub md5: String,
    pub link: String,
    pub upl_time: DateTime<Utc>,
    pub log_del_time: Option<DateTime<Utc>>,
    pub phy_del_time: Option<DateTime<Utc>>,
}

impl FileRecord {
    pub fn is_deleted(&self) -> bool {
        self.status != STATUS_NORMAL
    }

    pub fn is_logically_deleted(&self) -> bool {
        self.status == STATUS_LOG_DEL
    }
}

/// Minimal projection used by the transfer pipeline.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DFile {
    pub file_id: String,
    pub link: String,
    pub size: i64,
    pub status: String,
    pub name: String,
}

impl DFile {
    pub fn is_deleted(&self) -> bool {
        self.status != STATUS_NORMAL
    }

    /// The file_id that names the on-disk blob. A symbolic row reads through
    /// its link target. Never use the resulting path for deletion.
    pub fn effective_file_id(&self) -> &str {
        if self.link.is_empty() {
            &self.file_id
        } else {
            &self.link
        }
    }
}

/// Keyset-scan item for the physical delete sweep.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingPhysicalDelete {
    pub id: i64,
    pub file_id: String,
}

/// Read-only projection served to the backup tool.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "PascalCase")]
pub struct BackupFileInfo {
    pub id: i64,
    pub file_id: String,
    pub name: String,
    pub status: String,
    pub size: i64,
    pub md5: String,
}

// ─── Write / input models ─────────────────────────────────────────────────────

/// Arguments for inserting a catalog row. `status` is always NORMAL and
/// `upl_time` is stamped at insert.
#[derive(Debug, Clone)]
pub struct CreateFile {
    pub file_id: String,
    pub name: String,
    pub size: i64,
    pub md5: String,
    pub link: String,
}

// ─── Response models ──────────────────────────────────────────────────────────

/// Catalog metadata returned by `GET /file/info`.
///
/// `link` is deliberately not exposed; symbolic references are an internal
/// storage detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub id: i64,
    pub file_id: String,
    pub name: String,
    pub status: String,
    pub size: i64,
    pub md5: String,
    pub upl_time: DateTime<Utc>,
    pub log_del_time: Option<DateTime<Utc>>,
    pub phy_del_time: Option<DateTime<Utc>>,
}

impl From<FileRecord> for FileInfo {
    fn from(f: FileRecord) -> Self {
        FileInfo {
            id: f.id,
            file_id: f.file_id,
            name: f.name,
            status: f.status,
            size: f.size,
            md5: f.md5,
            upl_time: f.upl_time,
            log_del_time: f.log_del_time,
            phy_del_time: f.phy_del_time,
        }
    }
}
