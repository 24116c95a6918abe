//! Cache Engine Handle
//!
//! [`Cache`] is the public, cheap-to-clone entry point. It wraps the
//! synchronous [`CacheStore`] in an async lock, runs loaders outside that
//! lock behind the circuit breaker, dispatches buffered events once the lock
//! is released, and owns the background sweep task and persistence queue.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::breaker::{BreakerMode, BreakerSnapshot, CircuitBreaker, PermitGuard};
use crate::cache::{
    compile_glob, BulkRequest, BulkResult, CacheGroup, CacheStore, CacheTag, EntryInfo,
    HealthReport, HealthStatus, KeyAccess, KeyAge, Lookup, SetOptions, StatsSnapshot,
};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::events::{CacheEvent, EventBus, EventKind, SubscriptionId};
use crate::partition::PartitionInfo;
use crate::persistence::{Notification, PersistenceAdapter};
use crate::tasks::{spawn_persist_task, spawn_sweep_task, RefreshTask};

/// Lower bound on the sweep period so a zero interval cannot spin.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

// == Read Outcomes ==
/// How a stale-while-revalidate read was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    /// Cached and within its TTL
    Fresh,
    /// Served from the stale window while a refresh runs
    Stale,
    /// Missing or expired, loaded synchronously
    Loaded,
    /// Loader failed or was rejected; the breaker fallback was returned
    Fallback,
}

#[derive(Debug)]
pub struct SwrRead {
    pub value: Value,
    pub state: CacheState,
    /// Present when `state` is [`CacheState::Stale`]
    pub refresh: Option<RefreshTask>,
}

/// Per-key outcome of [`Cache::warmup`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmupReport {
    pub loaded: Vec<String>,
    /// Failed keys with the reason; these never abort the batch
    pub failed: BTreeMap<String, String>,
}

enum Loaded {
    Stored(Value),
    /// Loaded but rejected by the store
    Uncached(Value),
    Fallback(Value),
}

// == Cache Handle ==
struct Shared {
    store: RwLock<CacheStore>,
    events: EventBus,
    breaker: Option<Mutex<CircuitBreaker>>,
    config: CacheConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    /// Queue to the persistence worker; None when no adapter is attached
    /// or after `destroy`
    persistence: Mutex<Option<UnboundedSender<Notification>>>,
    next_refresh_id: AtomicU64,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

#[derive(Clone)]
pub struct Cache {
    shared: Arc<Shared>,
}

/// Non-owning handle; see [`Cache::downgrade`].
#[derive(Clone)]
pub struct WeakCache {
    shared: Weak<Shared>,
}

impl WeakCache {
    pub fn upgrade(&self) -> Option<Cache> {
        self.shared.upgrade().map(|shared| Cache { shared })
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("namespace", &self.shared.config.namespace)
            .field("events", &self.shared.events)
            .finish()
    }
}

impl Cache {
    // == Constructors ==
    /// Creates a cache. With a positive default TTL and a running tokio
    /// runtime, a background sweep task is started.
    pub fn new(config: CacheConfig) -> Self {
        Self::build(config, None)
    }

    /// Creates a cache that notifies `adapter` of sets, deletes and clears.
    pub fn with_persistence(config: CacheConfig, adapter: Arc<dyn PersistenceAdapter>) -> Self {
        Self::build(config, Some(adapter))
    }

    fn build(config: CacheConfig, persistence: Option<Arc<dyn PersistenceAdapter>>) -> Self {
        if config.distributed {
            warn!(
                namespace = %config.namespace,
                "distributed mode is not supported, running as a local cache"
            );
        }

        let breaker = config
            .circuit_breaker
            .enabled
            .then(|| Mutex::new(CircuitBreaker::new(&config.circuit_breaker)));
        let cache = Self {
            shared: Arc::new(Shared {
                store: RwLock::new(CacheStore::new(&config)),
                events: EventBus::new(),
                breaker,
                config,
                sweeper: Mutex::new(None),
                persistence: Mutex::new(None),
                next_refresh_id: AtomicU64::new(1),
            }),
        };

        let runtime = tokio::runtime::Handle::try_current().is_ok();
        if let Some(adapter) = persistence {
            if runtime {
                let (tx, rx) = mpsc::unbounded_channel();
                spawn_persist_task(adapter, rx);
                *cache.shared.persistence.lock() = Some(tx);
            } else {
                warn!("no tokio runtime, persistence notifications disabled");
            }
        }

        let config = &cache.shared.config;
        if !config.default_ttl.is_zero() {
            if runtime {
                let interval = config.sweep_interval.max(MIN_SWEEP_INTERVAL);
                let handle = spawn_sweep_task(cache.downgrade(), interval);
                *cache.shared.sweeper.lock() = Some(handle);
            } else {
                warn!("no tokio runtime, expired entries are only removed on read");
            }
        }

        info!(
            namespace = %config.namespace,
            max_items = config.max_items,
            policy = %config.eviction_policy,
            "cache created"
        );
        cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    pub fn namespace(&self) -> &str {
        &self.shared.config.namespace
    }

    pub fn downgrade(&self) -> WeakCache {
        WeakCache {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Runs `op` under the write lock, then publishes the events it produced.
    async fn mutate<R>(&self, op: impl FnOnce(&mut CacheStore) -> R) -> R {
        let (result, events) = {
            let mut store = self.shared.store.write().await;
            let result = op(&mut store);
            (result, store.drain_events())
        };
        self.shared.events.publish_all(events);
        result
    }

    /// Like [`Cache::mutate`], also queueing the persistence notifications
    /// derived from the result. They are queued under the store lock, so the
    /// adapter sees changes in store order.
    async fn mutate_and_persist<R>(
        &self,
        op: impl FnOnce(&mut CacheStore) -> R,
        persist: impl FnOnce(&R) -> Vec<Notification>,
    ) -> R {
        let (result, events) = {
            let mut store = self.shared.store.write().await;
            let result = op(&mut store);
            if let Some(queue) = self.shared.persistence.lock().as_ref() {
                for notification in persist(&result) {
                    if queue.send(notification).is_err() {
                        warn!("persistence worker gone, notification dropped");
                    }
                }
            }
            (result, store.drain_events())
        };
        self.shared.events.publish_all(events);
        result
    }

    fn persisting(&self) -> bool {
        self.shared.persistence.lock().is_some()
    }

    fn run_hooks(&self, key: &str, value: Option<&Value>) {
        let hooks = &self.shared.config.hooks;
        match value {
            Some(value) => {
                if let Some(on_hit) = &hooks.on_hit {
                    on_hit(key, value);
                }
            }
            None => {
                if let Some(on_miss) = &hooks.on_miss {
                    on_miss(key);
                }
            }
        }
    }

    // == Core Operations ==
    pub async fn set(&self, key: &str, value: Value, options: SetOptions) -> Result<()> {
        let persisted = self.persisting().then(|| value.clone());
        let notify = |result: &Result<()>| match (result, persisted) {
            (Ok(()), Some(value)) => vec![self.set_notification(key, value, &options)],
            _ => Vec::new(),
        };
        self.mutate_and_persist(|store| store.set(key, value, &options), notify)
            .await
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let value = self.mutate(|store| store.get(key)).await;
        self.run_hooks(key, value.as_ref());
        value
    }

    pub async fn has(&self, key: &str) -> bool {
        self.shared.store.read().await.has(key)
    }

    /// Deletes `key` and its transitive dependents; returns the removed keys.
    pub async fn delete(&self, key: &str) -> Vec<String> {
        let notify = |removed: &Vec<String>| deleted(removed);
        self.mutate_and_persist(|store| store.delete(key), notify).await
    }

    pub async fn clear(&self) {
        self.mutate_and_persist(CacheStore::clear, |_| vec![Notification::Clear])
            .await;
        info!(namespace = %self.namespace(), "cache cleared");
    }

    /// Stops the sweep task, closes the persistence queue and drops every
    /// entry, tag and group. The adapter is not told about the clear.
    ///
    /// Refreshes already in flight keep running and may write into the
    /// emptied store.
    pub async fn destroy(&self) {
        if let Some(handle) = self.shared.sweeper.lock().take() {
            handle.abort();
        }
        // The worker drains what is already queued, then exits
        self.shared.persistence.lock().take();
        self.mutate(CacheStore::clear).await;
        info!(namespace = %self.namespace(), "cache destroyed");
    }

    // == Compute ==
    /// Returns the cached value, or runs `loader` and caches its result.
    ///
    /// The loader runs behind the circuit breaker when one is configured.
    /// A fallback value is returned to the caller but never cached.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        options: SetOptions,
        loader: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        match self.load(key, &options, loader).await? {
            Loaded::Stored(value) | Loaded::Uncached(value) | Loaded::Fallback(value) => Ok(value),
        }
    }

    /// Stale-while-revalidate read.
    ///
    /// Fresh values return directly. A value inside its stale window returns
    /// immediately along with a handle to the refresh scheduled for it.
    /// Missing or fully expired values are loaded before returning.
    /// Overlapping reads of the same key are not coalesced.
    pub async fn get_or_compute_with_stale<F, Fut>(
        &self,
        key: &str,
        options: SetOptions,
        loader: F,
    ) -> Result<SwrRead>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let lookup = self.mutate(|store| store.read_revalidating(key)).await;
        match lookup {
            Lookup::Hit(value) => {
                self.run_hooks(key, Some(&value));
                Ok(SwrRead {
                    value,
                    state: CacheState::Fresh,
                    refresh: None,
                })
            }
            Lookup::Stale(value) => {
                self.run_hooks(key, Some(&value));
                let refresh = self.schedule_refresh(key, options, loader);
                Ok(SwrRead {
                    value,
                    state: CacheState::Stale,
                    refresh: Some(refresh),
                })
            }
            Lookup::Miss => {
                self.run_hooks(key, None);
                let (value, state) = match self.load(key, &options, loader).await? {
                    Loaded::Stored(value) | Loaded::Uncached(value) => (value, CacheState::Loaded),
                    Loaded::Fallback(value) => (value, CacheState::Fallback),
                };
                Ok(SwrRead {
                    value,
                    state,
                    refresh: None,
                })
            }
        }
    }

    fn schedule_refresh<F, Fut>(&self, key: &str, options: SetOptions, loader: F) -> RefreshTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let id = self.shared.next_refresh_id.fetch_add(1, Ordering::Relaxed);
        let cache = self.clone();
        let owned_key = key.to_string();
        debug!(key, refresh = id, "scheduling stale refresh");

        RefreshTask::spawn(id, key.to_string(), async move {
            match cache.load(&owned_key, &options, loader).await {
                Ok(Loaded::Stored(_)) => {
                    debug!(key = %owned_key, refresh = id, "stale value refreshed");
                    Ok(())
                }
                Ok(Loaded::Uncached(_)) | Ok(Loaded::Fallback(_)) => {
                    debug!(key = %owned_key, refresh = id, "refresh not stored, stale value kept");
                    Ok(())
                }
                Err(err) => {
                    warn!(key = %owned_key, refresh = id, error = %err, "stale refresh failed");
                    Err(err)
                }
            }
        })
    }

    /// Runs `loader` under the breaker and stores a successful result.
    ///
    /// The breaker permit is held across the loader; a cancelled or
    /// panicking loader releases it through the guard's drop.
    async fn load<F, Fut>(&self, key: &str, options: &SetOptions, loader: F) -> Result<Loaded>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        let permit = match PermitGuard::acquire(self.shared.breaker.as_ref(), Instant::now()) {
            Ok(permit) => permit,
            Err(retry_in) => {
                debug!(key, "circuit open, loader skipped");
                return match self.fallback(key) {
                    Some(value) => Ok(Loaded::Fallback(value)),
                    None => Err(CacheError::CircuitOpen { retry_in }),
                };
            }
        };

        match loader().await {
            Ok(value) => {
                permit.succeed();
                match self.set(key, value.clone(), options.clone()).await {
                    Ok(()) => Ok(Loaded::Stored(value)),
                    Err(err) => {
                        warn!(key, error = %err, "loaded value rejected by store, not cached");
                        Ok(Loaded::Uncached(value))
                    }
                }
            }
            Err(err) => {
                permit.fail(Instant::now());
                warn!(key, error = %err, "loader failed");
                match self.fallback(key) {
                    Some(value) => Ok(Loaded::Fallback(value)),
                    None => Err(CacheError::loader(key, err)),
                }
            }
        }
    }

    fn fallback(&self, key: &str) -> Option<Value> {
        self.shared.breaker.as_ref()?;
        self.shared
            .config
            .circuit_breaker
            .fallback
            .as_ref()
            .map(|fallback| fallback(key))
    }

    /// Loads and stores each key. Failures are logged and reported per key.
    pub async fn warmup<I, F, Fut>(&self, keys: I, options: SetOptions, loader: F) -> WarmupReport
    where
        I: IntoIterator,
        I::Item: Into<String>,
        F: Fn(String) -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        let mut report = WarmupReport::default();
        for key in keys {
            let key: String = key.into();
            let outcome = match loader(key.clone()).await {
                Ok(value) => self.set(&key, value, options.clone()).await,
                Err(err) => Err(CacheError::loader(&key, err)),
            };
            match outcome {
                Ok(()) => report.loaded.push(key),
                Err(err) => {
                    warn!(key = %key, error = %err, "warmup item failed, skipping");
                    report.failed.insert(key, err.to_string());
                }
            }
        }
        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "warmup complete"
        );
        report
    }

    // == Tags & Groups ==
    pub async fn invalidate_by_tag(&self, tag: &str) -> Vec<String> {
        let notify = |removed: &Vec<String>| deleted(removed);
        self.mutate_and_persist(|store| store.invalidate_by_tag(tag), notify).await
    }

    pub async fn invalidate_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> BTreeMap<String, Vec<String>> {
        let notify = |result: &BTreeMap<String, Vec<String>>| {
            result.values().flat_map(|removed| deleted(removed)).collect()
        };
        self.mutate_and_persist(|store| store.invalidate_by_tags(tags), notify)
            .await
    }

    pub async fn tag(&self, name: &str) -> Option<CacheTag> {
        self.shared.store.read().await.tag(name)
    }

    pub async fn tags(&self) -> Vec<String> {
        self.shared.store.read().await.tag_names()
    }

    pub async fn create_group(
        &self,
        name: &str,
        keys: Vec<String>,
        config: Option<Value>,
    ) -> Result<CacheGroup> {
        self.mutate(|store| store.create_group(name, keys, config)).await
    }

    pub async fn add_to_group(&self, name: &str, keys: Vec<String>) -> Result<()> {
        self.mutate(|store| store.add_to_group(name, keys)).await
    }

    pub async fn remove_from_group(&self, name: &str, keys: &[String]) -> Result<()> {
        self.mutate(|store| store.remove_from_group(name, keys)).await
    }

    /// Deletes every member of the group, then the group.
    pub async fn delete_group(&self, name: &str) -> Result<Vec<String>> {
        let notify = |result: &Result<Vec<String>>| match result {
            Ok(removed) => deleted(removed),
            Err(_) => Vec::new(),
        };
        self.mutate_and_persist(|store| store.delete_group(name), notify)
            .await
    }

    pub async fn group(&self, name: &str) -> Option<CacheGroup> {
        self.shared.store.read().await.group(name)
    }

    pub async fn groups(&self) -> Vec<String> {
        self.shared.store.read().await.group_names()
    }

    pub async fn bulk(&self, request: BulkRequest) -> BulkResult {
        let notify = |result: &BulkResult| {
            let sets = request
                .set
                .iter()
                .filter(|item| result.set.contains(&item.key))
                .map(|item| self.set_notification(&item.key, item.value.clone(), &item.options));
            let deletes = result
                .delete
                .values()
                .chain(result.invalidated.values())
                .flat_map(|removed| deleted(removed));
            sets.chain(deletes).collect()
        };
        self.mutate_and_persist(|store| store.bulk(&request), notify)
            .await
    }

    // == Introspection ==
    /// Resident keys matching a glob (`*`, `?`), or all keys.
    pub async fn keys(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        let pattern = pattern.map(compile_glob).transpose()?;
        Ok(self.shared.store.read().await.keys(pattern.as_ref()))
    }

    pub async fn top_keys(&self, n: usize) -> Vec<KeyAccess> {
        self.shared.store.read().await.top_keys(n)
    }

    pub async fn least_accessed_keys(&self, n: usize) -> Vec<KeyAccess> {
        self.shared.store.read().await.least_accessed_keys(n)
    }

    pub async fn keys_by_age(&self) -> Vec<KeyAge> {
        self.shared.store.read().await.keys_by_age()
    }

    pub async fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        self.shared.store.read().await.entry_info(key)
    }

    pub async fn partition_info(&self) -> Vec<PartitionInfo> {
        self.shared.store.read().await.partition_info()
    }

    pub async fn is_partition_balanced(&self) -> bool {
        self.shared.store.read().await.is_partition_balanced()
    }

    /// None when the breaker is disabled.
    pub fn breaker_state(&self) -> Option<BreakerSnapshot> {
        self.shared
            .breaker
            .as_ref()
            .map(|breaker| breaker.lock().snapshot(Instant::now()))
    }

    pub async fn len(&self) -> usize {
        self.shared.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.shared.store.read().await.is_empty()
    }

    // == Stats & Health ==
    pub async fn stats(&self) -> StatsSnapshot {
        let failures = self.shared.events.failure_count();
        self.shared.store.read().await.snapshot(failures)
    }

    /// Numeric metrics named in `monitoring.metrics`, or all when empty.
    pub async fn metrics(&self) -> BTreeMap<String, f64> {
        let s = self.stats().await;
        let all = [
            ("hits", s.hits as f64),
            ("misses", s.misses as f64),
            ("stale_hits", s.stale_hits as f64),
            ("evictions", s.evictions as f64),
            ("expirations", s.expirations as f64),
            ("total_accesses", s.total_accesses as f64),
            ("sets", s.sets as f64),
            ("deletes", s.deletes as f64),
            ("hit_rate", s.hit_rate),
            ("miss_rate", s.miss_rate),
            ("total_entries", s.total_entries as f64),
            ("memory_usage", s.memory_usage as f64),
            ("memory_efficiency", s.memory_efficiency),
            ("compression_ratio", s.compression_ratio),
            ("subscriber_failures", s.subscriber_failures as f64),
        ];
        let selected = &self.shared.config.monitoring.metrics;
        all.into_iter()
            .filter(|(name, _)| selected.is_empty() || selected.iter().any(|m| m == name))
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }

    /// Health from the alert thresholds and the breaker.
    ///
    /// An open breaker makes the cache unhealthy; any crossed threshold
    /// makes it degraded.
    pub async fn health(&self) -> HealthReport {
        let stats = self.stats().await;
        let thresholds = &self.shared.config.monitoring.alert_thresholds;
        let mut issues = Vec::new();

        if stats.total_accesses > 0 && stats.hit_rate < thresholds.min_hit_rate {
            issues.push(format!(
                "hit rate {:.1}% below {:.1}%",
                stats.hit_rate, thresholds.min_hit_rate
            ));
        }
        if stats.memory_efficiency > thresholds.max_memory_usage {
            issues.push(format!(
                "memory usage {:.1}% above {:.1}%",
                stats.memory_efficiency, thresholds.max_memory_usage
            ));
        }
        if stats.evictions > thresholds.max_evictions {
            issues.push(format!(
                "{} evictions above {}",
                stats.evictions, thresholds.max_evictions
            ));
        }

        let breaker = self.breaker_state().map(|snapshot| snapshot.mode);
        let open = breaker == Some(BreakerMode::Open);
        if open {
            issues.push("circuit breaker open".to_string());
        }

        let status = if open {
            HealthStatus::Unhealthy
        } else if issues.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        if self.shared.config.monitoring.enabled && status != HealthStatus::Healthy {
            warn!(namespace = %self.namespace(), ?issues, "cache health alert");
        }

        HealthReport {
            status,
            issues,
            breaker,
            stats,
        }
    }

    // == Events ==
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.events.subscribe(kind, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    // == Maintenance ==
    /// Removes expired entries now; the sweep task calls this periodically.
    pub async fn sweep_expired(&self) -> Vec<String> {
        self.mutate(CacheStore::sweep_expired).await
    }

    // == Persistence ==
    /// Waits until every change queued so far has reached the adapter.
    /// Returns at once when no adapter is attached.
    pub async fn flush_persistence(&self) {
        let (done, flushed) = oneshot::channel();
        let queued = match self.shared.persistence.lock().as_ref() {
            Some(queue) => queue.send(Notification::Flush(done)).is_ok(),
            None => false,
        };
        if queued {
            // Worker only drops the sender if it panicked
            let _ = flushed.await;
        }
    }

    fn set_notification(&self, key: &str, value: Value, options: &SetOptions) -> Notification {
        let ttl = options
            .ttl
            .or(Some(self.shared.config.default_ttl))
            .filter(|ttl| !ttl.is_zero());
        Notification::Set {
            key: key.to_string(),
            value,
            ttl,
        }
    }
}

/// Delete notification for the keys a removal touched.
fn deleted(removed: &[String]) -> Vec<Notification> {
    if removed.is_empty() {
        Vec::new()
    } else {
        vec![Notification::Delete(removed.to_vec())]
    }
}
