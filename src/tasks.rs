use std::time::Duration;

use crate::services::{deletion, sanitize};
use crate::AppState;

/// Spawns the long-lived maintenance loops. Errors are logged but never
/// fatal — a transient DB or filesystem hiccup should not take the server
/// down; the next cycle retries cleanly.
pub fn spawn_background_tasks(state: AppState) {
    // Physical delete sweep: hourly, matching the grace window so freshly
    // deleted rows are picked up one cycle after they become eligible.
    let st = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));
        loop {
            interval.tick().await;
            let strategy =
                deletion::PdeleteStrategy::from_config(&st.config.pdelete_strategy);
            if let Err(e) =
                deletion::remove_deleted(&st.db, &st.layout, &st.locks, strategy).await
            {
                tracing::error!("remove-deleted sweep error: {:?}", e);
            }
        }
    });

    // Sanitize sweep: twice a day. The 6-hour mtime grace inside the sweep
    // keeps in-flight uploads safe regardless of when it fires.
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(12 * 60 * 60));
        loop {
            interval.tick().await;
            if let Err(e) = sanitize::sanitize_storage(
                &state.db,
                &state.layout,
                state.config.sanitize_dry_run,
            )
            .await
            {
                tracing::error!("sanitize-storage sweep error: {:?}", e);
            }
        }
    });
}
