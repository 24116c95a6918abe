//! Persistence Adapter
//!
//! Optional write-behind sink notified by the engine on set, delete and
//! clear. The engine never reads from an adapter; its own invariants hold
//! whether or not notifications succeed. Notifications are queued in store
//! order and applied one at a time by a single worker task.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

// == Adapter Contract ==
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> anyhow::Result<()>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    async fn clear(&self) -> anyhow::Result<()>;
}

// == Notifications ==
/// A store change queued for the adapter.
#[derive(Debug)]
pub(crate) enum Notification {
    Set {
        key: String,
        value: Value,
        ttl: Option<Duration>,
    },
    Delete(Vec<String>),
    Clear,
    /// Completed once every earlier notification has been applied
    Flush(oneshot::Sender<()>),
}

// == Memory Adapter ==
/// Adapter backed by a plain map; TTLs are recorded but not enforced.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    entries: Mutex<HashMap<String, (Value, Option<Duration>)>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.entries.lock().get(key).and_then(|(_, ttl)| *ttl)
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryAdapter {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.entries.lock().get(key).map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> anyhow::Result<()> {
        self.entries
            .lock()
            .insert(key.to_string(), (value.clone(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        self.entries.lock().clear();
        Ok(())
    }
}
