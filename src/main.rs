mod api;
mod auth;
mod cache;
mod config;
mod db;
mod error;
mod events;
mod lock;
mod services;
mod storage;
mod tasks;
#[cfg(test)]
mod testutil;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Json, Router,
};
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cache::Caches;
use events::EventBus;
use lock::NamedLocks;
use storage::paths::PathLayout;

/// Shared application state passed to every handler via Axum's `State`
/// extractor. Must be `Clone` — Axum clones it once per request.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: config::Config,
    pub layout: PathLayout,
    pub caches: Arc<Caches>,
    pub locks: Arc<NamedLocks>,
    pub bus: Arc<EventBus>,
}

#[tokio::main]
async fn main() {
    // Load .env before anything else so variables are available to both the
    // tracing filter and Config::from_env().
    dotenvy::dotenv().ok(); // .ok() — missing file is fine in production

    // Structured tracing. Level controlled via RUST_LOG env var; defaults to
    // "info" if unset.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env();

    // Ensure the directory that will contain the SQLite file exists.
    // The database_url looks like "sqlite:data/fstore.db?mode=rwc"; we strip
    // the scheme prefix and any query string to get the bare file path.
    let db_path = config
        .database_url
        .strip_prefix("sqlite:")
        .unwrap_or(&config.database_url)
        .split('?')
        .next()
        .unwrap_or("data/fstore.db");

    if let Some(parent) = std::path::Path::new(db_path).parent() {
        std::fs::create_dir_all(parent).unwrap_or_else(|e| {
            panic!("failed to create database directory '{parent:?}': {e}");
        });
    }

    // Storage and trash directories must exist before the first upload or
    // sweep touches them.
    let layout = PathLayout::new(&config.storage_dir, &config.trash_dir, &config.tmp_dir);
    layout.init().unwrap_or_else(|e| {
        panic!(
            "failed to create storage directories '{}' / '{}': {e}",
            config.storage_dir, config.trash_dir
        );
    });

    let pool = db::create_pool(&config.database_url)
        .await
        .expect("failed to connect to database and run migrations");

    let locks = Arc::new(NamedLocks::new());

    // One-shot legacy catalog migration, before the server takes traffic.
    if let Err(e) = services::migrate::try_migrate(&config, &pool, &layout, &locks).await {
        panic!("legacy catalog migration failed: {e}");
    }

    // Capture values needed after `config` moves into AppState.
    let port = config.port;
    let backup_enabled = config.backup_enabled && !config.backup_secret.is_empty();

    let bus = Arc::new(EventBus::new());
    let state = AppState {
        db: pool,
        config,
        layout,
        caches: Arc::new(Caches::new()),
        locks,
        bus,
    };

    // The unzip pipeline: a single consumer per process keeps extraction
    // memory-bounded.
    let unzip_rx = state.bus.register(events::UNZIP_PIPELINE_TOPIC);
    services::unzip::spawn_consumer(
        state.db.clone(),
        state.layout.clone(),
        state.locks.clone(),
        state.caches.clone(),
        state.bus.clone(),
        unzip_rx,
    );

    tasks::spawn_background_tasks(state.clone());

    // ── Route groups ──────────────────────────────────────────────────────────
    //
    // Splitting routes into groups keeps middleware application explicit and
    // makes it easy to see at a glance which surface a route belongs to.

    // 1. File routes — the public surface. Upload bodies are unbounded: this
    //    is an object store, the 2 MB axum default would be absurd.
    let file_routes = Router::new()
        .route("/file", put(api::files::upload).delete(api::files::delete))
        .route("/file/info", get(api::files::info))
        .route("/file/key", get(api::files::gen_key))
        .route("/file/raw", get(api::files::raw))
        .route("/file/stream", get(api::files::stream))
        .route("/file/direct", get(api::files::direct))
        .route("/file/unzip", post(api::files::unzip_trigger))
        .layer(DefaultBodyLimit::disable());

    // 2. Maintenance routes — operator-triggered sweeps.
    let maintenance_routes = Router::new()
        .route(
            "/maintenance/remove-deleted",
            post(api::maintenance::remove_deleted),
        )
        .route(
            "/maintenance/sanitize-storage",
            post(api::maintenance::sanitize_storage),
        );

    // 3. Backup routes — registered only when enabled AND a secret is set;
    //    every route requires the pre-shared secret.
    let backup_routes = if backup_enabled {
        info!("backup endpoints enabled");
        Router::new()
            .route("/backup/file/list", post(api::backup::list))
            .route("/backup/file/raw", get(api::backup::raw))
            .layer(from_fn_with_state(
                state.clone(),
                auth::require_backup_auth,
            ))
    } else {
        Router::new()
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(file_routes)
        .merge(maintenance_routes)
        .merge(backup_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind TCP listener");

    axum::serve(listener, app)
        .await
        .expect("server error");
}

/// `GET /health` — liveness probe for load balancers and Docker health
/// checks. Runs a trivial DB query so infrastructure can detect database
/// connectivity issues in addition to process liveness.
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let db_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.db)
        .await
        .is_ok();

    Json(serde_json::json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "db": db_ok
    }))
}
