//! Persistence Worker
//!
//! Applies queued store changes to a [`PersistenceAdapter`] in the order
//! they were made.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::persistence::{Notification, PersistenceAdapter};

/// Spawns the worker draining `queue` into `adapter`.
///
/// The task exits once every sender is gone and the queue is empty, so
/// changes queued before the cache closes its queue are still applied.
pub(crate) fn spawn_persist_task(
    adapter: Arc<dyn PersistenceAdapter>,
    mut queue: UnboundedReceiver<Notification>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("persistence worker started");

        while let Some(notification) = queue.recv().await {
            match notification {
                Notification::Set { key, value, ttl } => {
                    if let Err(err) = adapter.set(&key, &value, ttl).await {
                        warn!(key = %key, error = %err, "persistence set failed");
                    }
                }
                Notification::Delete(keys) => {
                    for key in keys {
                        if let Err(err) = adapter.delete(&key).await {
                            warn!(key = %key, error = %err, "persistence delete failed");
                        }
                    }
                }
                Notification::Clear => {
                    if let Err(err) = adapter.clear().await {
                        warn!(error = %err, "persistence clear failed");
                    }
                }
                Notification::Flush(done) => {
                    // Receiver may have given up waiting
                    let _ = done.send(());
                }
            }
        }

        debug!("persistence queue closed, worker exiting");
    })
}
