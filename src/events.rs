//! Event Bus
//!
//! Synchronous in-process publish/subscribe owned by a cache instance.
//! Subscribers for an event run in registration order on the caller's task.
//! A subscriber that returns an error or panics is isolated: the remaining
//! subscribers still run and the failure is recorded for later inspection.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::cache::{BulkRequest, BulkResult};

/// Upper bound on recorded subscriber failures awaiting `take_errors`.
const MAX_RECORDED_ERRORS: usize = 256;

pub type Subscriber = Arc<dyn Fn(&CacheEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(u64);

// == Evict Reason ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictReason {
    /// Least recently used victim
    Lru,
    /// Least frequently used victim
    Lfu,
    /// Soonest-expiring victim under the ttl policy
    Ttl,
    /// Removed by lazy expiry or the sweeper
    Expired,
    /// Removed because an entry it depends on was removed
    Dependency,
}

// == Events ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Set,
    Hit,
    Miss,
    Delete,
    Evict,
    Compress,
    PartitionHit,
    TagInvalidated,
    BulkOperation,
    GroupCreated,
    GroupDeleted,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Set => "set",
            EventKind::Hit => "hit",
            EventKind::Miss => "miss",
            EventKind::Delete => "delete",
            EventKind::Evict => "evict",
            EventKind::Compress => "compress",
            EventKind::PartitionHit => "partitionHit",
            EventKind::TagInvalidated => "tagInvalidated",
            EventKind::BulkOperation => "bulkOperation",
            EventKind::GroupCreated => "groupCreated",
            EventKind::GroupDeleted => "groupDeleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum CacheEvent {
    Set {
        key: String,
        value: Value,
    },
    Hit {
        key: String,
    },
    Miss {
        key: String,
    },
    Delete {
        key: String,
    },
    Evict {
        key: String,
        reason: EvictReason,
    },
    Compress {
        key: String,
        original_size: usize,
        compressed_size: usize,
    },
    PartitionHit {
        partition: usize,
        key: String,
    },
    TagInvalidated {
        tag: String,
        affected_keys: Vec<String>,
    },
    BulkOperation {
        operation: BulkRequest,
        result: BulkResult,
        duration: Duration,
    },
    GroupCreated {
        group: String,
        keys: Vec<String>,
    },
    GroupDeleted {
        group_name: String,
    },
}

impl CacheEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CacheEvent::Set { .. } => EventKind::Set,
            CacheEvent::Hit { .. } => EventKind::Hit,
            CacheEvent::Miss { .. } => EventKind::Miss,
            CacheEvent::Delete { .. } => EventKind::Delete,
            CacheEvent::Evict { .. } => EventKind::Evict,
            CacheEvent::Compress { .. } => EventKind::Compress,
            CacheEvent::PartitionHit { .. } => EventKind::PartitionHit,
            CacheEvent::TagInvalidated { .. } => EventKind::TagInvalidated,
            CacheEvent::BulkOperation { .. } => EventKind::BulkOperation,
            CacheEvent::GroupCreated { .. } => EventKind::GroupCreated,
            CacheEvent::GroupDeleted { .. } => EventKind::GroupDeleted,
        }
    }
}

/// A subscriber failure captured during dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberError {
    pub event: &'static str,
    pub subscription: SubscriptionId,
    pub message: String,
}

// == Event Bus ==
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<EventKind, Vec<(SubscriptionId, Subscriber)>>>,
    errors: Mutex<Vec<SubscriberError>>,
    failure_count: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("failures", &self.failure_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Removes a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        for list in subscribers.values_mut() {
            if let Some(pos) = list.iter().position(|(sid, _)| *sid == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().values().map(Vec::len).sum()
    }

    /// Dispatches `event` to its subscribers and returns the failures it caused.
    pub fn publish(&self, event: &CacheEvent) -> Vec<SubscriberError> {
        let kind = event.kind();
        // Snapshot so callbacks can subscribe or unsubscribe without deadlocking
        let targets: Vec<(SubscriptionId, Subscriber)> = match self.subscribers.read().get(&kind) {
            Some(list) => list.clone(),
            None => return Vec::new(),
        };

        let mut failures = Vec::new();
        for (id, callback) in targets {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(event)));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            warn!(event = kind.name(), subscription = id.0, %message, "event subscriber failed");
            failures.push(SubscriberError {
                event: kind.name(),
                subscription: id,
                message,
            });
        }

        if !failures.is_empty() {
            self.failure_count
                .fetch_add(failures.len() as u64, Ordering::Relaxed);
            let mut errors = self.errors.lock();
            errors.extend(failures.iter().cloned());
            let overflow = errors.len().saturating_sub(MAX_RECORDED_ERRORS);
            errors.drain(..overflow);
        }
        failures
    }

    /// Dispatches events in order.
    pub fn publish_all(&self, events: Vec<CacheEvent>) {
        for event in &events {
            self.publish(event);
        }
    }

    /// Drains recorded subscriber failures, oldest first.
    pub fn take_errors(&self) -> Vec<SubscriberError> {
        std::mem::take(&mut *self.errors.lock())
    }

    /// Total subscriber failures since creation.
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
