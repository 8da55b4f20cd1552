use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::fs;
use tokio::time::MissedTickBehavior;

use crate::registry::JobRegistry;

/// Drops every expired job and deletes its file. Returns the paths that
/// were scheduled for removal, whether or not removal succeeded.
pub async fn sweep(registry: &JobRegistry, now: DateTime<Utc>) -> Vec<PathBuf> {
    let paths = registry.delete_expired(now);

    join_all(paths.iter().map(|path| async move {
        match fs::remove_file(path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "sweeper: removed expired file"),
            // It doesn't matter if the file is already gone.
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(?err, path = %path.display(), "sweeper: failed to remove expired file")
            }
        }
    }))
    .await;

    paths
}

pub async fn run_sweeper(registry: Arc<JobRegistry>, every: Duration) {
    tracing::info!(interval_secs = every.as_secs(), "Starting expiry sweeper...");

    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let removed = sweep(&registry, Utc::now()).await;
        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "sweeper: expired jobs removed");
        }
    }
}
