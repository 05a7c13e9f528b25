use serde::Deserialize;

/// Application configuration loaded from environment variables via `envy`.
///
/// All fields map directly to environment variable names (uppercased by envy).
/// Provide defaults via `.env` for local development; override via real env
/// vars in production / Docker.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// TCP port the HTTP server listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// SQLite connection string, e.g. `sqlite:data/fstore.db?mode=rwc`.
    pub database_url: String,

    /// Directory where file blobs are stored, flat, one file per file_id.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,

    /// Directory where blobs are moved when physically deleted with the
    /// `trash` strategy, and where the sanitize sweep dumps orphans.
    #[serde(default = "default_trash_dir")]
    pub trash_dir: String,

    /// Scratch directory for the unzip pipeline.
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: String,

    /// Physical delete strategy: `direct` (unlink) or `trash` (rename into
    /// the trash directory). Unknown values fall back to `trash`.
    #[serde(default = "default_pdelete_strategy")]
    pub pdelete_strategy: String,

    /// When true the sanitize sweep only logs what it would move.
    #[serde(default)]
    pub sanitize_dry_run: bool,

    /// Enables the `/backup` endpoints. They are only registered when this is
    /// true AND `backup_secret` is non-empty.
    #[serde(default)]
    pub backup_enabled: bool,

    /// Pre-shared secret required in the Authorization header of every
    /// backup request.
    #[serde(default)]
    pub backup_secret: String,

    /// Enables the one-shot legacy catalog migration on startup.
    #[serde(default)]
    pub migration_enabled: bool,

    /// When true (the default) the migration only logs what it would upload.
    #[serde(default = "default_true")]
    pub migration_dry_run: bool,

    /// SQLite connection string of the legacy catalog to migrate from.
    #[serde(default)]
    pub migration_database_url: String,

    /// Base path holding the legacy store's files, laid out as
    /// `<base>/<uploader_id>/<uuid>`.
    #[serde(default)]
    pub migration_storage: String,
}

fn default_port() -> u16 {
    8084
}

fn default_storage_dir() -> String {
    "./storage".into()
}

fn default_trash_dir() -> String {
    "./trash".into()
}

fn default_tmp_dir() -> String {
    "/tmp".into()
}

fn default_pdelete_strategy() -> String {
    "trash".into()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from the current process environment.
    ///
    /// Panics with a clear message if any required variable is missing.
    pub fn from_env() -> Self {
        envy::from_env::<Config>().unwrap_or_else(|err| {
            panic!("configuration error: {err}\nCheck that all required environment variables are set (see .env.example).");
        })
    }
}
