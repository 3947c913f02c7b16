//! Scheduled sweep of expired sessions.

use crate::auth::SessionManager;
use std::time::Duration;
use tracing::{error, info};

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Delete every expired session once. Returns the number removed.
pub async fn run_sweep(sessions: &SessionManager) -> u64 {
    match sessions.sweep_expired().await {
        Ok(count) => {
            if count > 0 {
                info!("Swept {} expired sessions", count);
            }
            count
        }
        Err(e) => {
            error!("Failed to sweep expired sessions: {}", e);
            0
        }
    }
}

/// Spawn a background task that sweeps periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_sweep_scheduler(
    sessions: SessionManager,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval.max(Duration::from_secs(1)));
        // The first tick completes immediately; the startup sweep already ran.
        interval.tick().await;

        loop {
            interval.tick().await;
            run_sweep(&sessions).await;
        }
    })
}
