//! TTL Sweep Task
//!
//! Background task that periodically removes expired cache entries.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::WeakCache;

/// Spawns a task that sweeps expired entries every `interval`.
///
/// The task holds a weak handle, so it never keeps a cache alive; it exits
/// on its own once the last strong handle is dropped.
///
/// # Returns
/// A JoinHandle for the spawned task, which `Cache::destroy` aborts.
pub fn spawn_sweep_task(cache: WeakCache, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_ms = interval.as_millis() as u64,
            "starting TTL sweep task"
        );

        loop {
            tokio::time::sleep(interval).await;

            let Some(cache) = cache.upgrade() else {
                debug!("cache dropped, TTL sweep task exiting");
                break;
            };
            let removed = cache.sweep_expired().await;

            if removed.is_empty() {
                debug!("TTL sweep: no expired entries found");
            } else {
                info!(removed = removed.len(), "TTL sweep removed expired entries");
            }
        }
    })
}
