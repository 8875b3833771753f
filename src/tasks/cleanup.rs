//! Cleanup Task
//!
//! Background task that periodically removes expired cache entries and
//! times out mutations left pending too long.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::client::ApiClient;

/// Spawns a background task that sweeps the client at a fixed interval.
///
/// Each run drops cache entries past their TTL and fails mutations pending
/// for longer than the configured mutation timeout, so none stays pending
/// forever.
///
/// # Arguments
/// * `client` - Client whose cache and mutation table are swept
/// * `cleanup_interval_secs` - Interval in seconds between runs
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
pub fn spawn_cleanup_task(client: ApiClient, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting cleanup task with interval of {} seconds",
            cleanup_interval_secs
        );

        loop {
            tokio::time::sleep(interval).await;

            let (expired, timed_out) = client.sweep().await;
            if expired > 0 || timed_out > 0 {
                info!(expired, timed_out, "Cleanup: removed expired entries, failed stale mutations");
            } else {
                debug!("Cleanup: nothing to do");
            }
        }
    })
}
