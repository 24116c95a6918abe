//! Cache Store Module
//!
//! Synchronous core of the engine. Owns the entries and every derived index
//! (dependency edges, tags, groups, partition counters) and keeps them
//! consistent on each mutation path: set, delete, evict, expire,
//! tag invalidation and group deletion. Events produced by a mutation are
//! buffered and handed to the caller through [`CacheStore::drain_events`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::{
    BulkRequest, BulkResult, CacheEntry, CacheGroup, CacheStats, CacheTag, EntryInfo,
    EvictionPolicy, Freshness, GroupRegistry, KeyAccess, KeyAge, SetOptions, StatsSnapshot,
    TagIndex,
};
use crate::compression::Compressor;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::events::{CacheEvent, EvictReason};
use crate::partition::{PartitionAssigner, PartitionInfo};

// == Lookup ==
/// Outcome of a read.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Hit(Value),
    /// Served from the stale window; the caller should refresh
    Stale(Value),
    Miss,
}

/// Why an entry is being destroyed.
#[derive(Debug, Clone, Copy)]
enum Removal {
    Deleted,
    Evicted(EvictReason),
    Expired,
}

// == Cache Store ==
#[derive(Debug)]
pub struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    tags: TagIndex,
    groups: GroupRegistry,
    stats: CacheStats,
    compressor: Compressor,
    partitions: Option<PartitionAssigner>,
    pending_events: Vec<CacheEvent>,
    /// Logical access clock
    tick: u64,
    max_items: usize,
    max_memory: usize,
    max_key_length: Option<usize>,
    max_value_size: Option<usize>,
    default_ttl: Duration,
    stale_while_revalidate: bool,
    policy: EvictionPolicy,
}

impl CacheStore {
    // == Constructor ==
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            tags: TagIndex::new(),
            groups: GroupRegistry::new(),
            stats: CacheStats::new(),
            compressor: Compressor::new(config.compression.clone()),
            partitions: config
                .partitioning
                .enabled
                .then(|| PartitionAssigner::new(&config.partitioning)),
            pending_events: Vec::new(),
            tick: 0,
            max_items: config.max_items,
            max_memory: config.max_memory,
            max_key_length: config.max_key_length,
            max_value_size: config.max_value_size,
            default_ttl: config.default_ttl,
            stale_while_revalidate: config.stale_while_revalidate,
            policy: config.eviction_policy,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn emit(&mut self, event: CacheEvent) {
        self.pending_events.push(event);
    }

    /// Takes the events produced since the last drain, in order.
    pub fn drain_events(&mut self) -> Vec<CacheEvent> {
        std::mem::take(&mut self.pending_events)
    }

    // == Set ==
    /// Stores a value, replacing any previous entry's dependencies and tags.
    ///
    /// Dependencies that are not resident are skipped. Entries that depend on
    /// `key` keep depending on it across overwrites. Capacity is enforced
    /// after the insert.
    pub fn set(&mut self, key: &str, value: Value, options: &SetOptions) -> Result<()> {
        validate_key(key, self.max_key_length)?;

        let encoded = self.compressor.encode(value.clone())?;
        if let Some(max) = self.max_value_size {
            if encoded.stored_size > max {
                return Err(CacheError::ValueTooLarge {
                    size: encoded.stored_size,
                    max,
                });
            }
        }

        let ttl = options
            .ttl
            .or_else(|| (!self.default_ttl.is_zero()).then_some(self.default_ttl));
        let tick = self.next_tick();
        let mut entry = CacheEntry::new(encoded, ttl, options.stale_ttl, tick);

        if let Some(old) = self.entries.remove(key) {
            self.unlink(key, &old);
            entry.dependents = old.dependents;
        }

        for dep in &options.depends_on {
            if dep == key {
                continue;
            }
            match self.entries.get_mut(dep) {
                Some(parent) => {
                    parent.dependents.insert(key.to_string());
                    entry.depends_on.insert(dep.clone());
                }
                None => debug!(key, dependency = %dep, "dependency not resident, edge skipped"),
            }
        }

        for tag in &options.tags {
            self.tags.add(tag, key);
            entry.tags.insert(tag.clone());
        }

        if let Some(partitions) = self.partitions.as_mut() {
            partitions.record_insert(key, entry.memory_estimate(key));
        }

        if entry.value.is_compressed() {
            let event = CacheEvent::Compress {
                key: key.to_string(),
                original_size: entry.original_size,
                compressed_size: entry.stored_size,
            };
            self.emit(event);
        }

        self.entries.insert(key.to_string(), entry);
        self.stats.sets += 1;
        self.emit(CacheEvent::Set {
            key: key.to_string(),
            value,
        });

        self.enforce_capacity(Some(key));
        Ok(())
    }

    // == Get ==
    /// Plain read. Expired entries are removed lazily and count as misses;
    /// an entry inside its stale window also misses but stays resident.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        match self.read(key, false) {
            Lookup::Hit(value) => Some(value),
            _ => None,
        }
    }

    /// Read that serves values from the stale window when enabled.
    pub fn read_revalidating(&mut self, key: &str) -> Lookup {
        self.read(key, true)
    }

    fn read(&mut self, key: &str, allow_stale: bool) -> Lookup {
        let now = Instant::now();
        let freshness = match self.entries.get(key) {
            Some(entry) => entry.freshness_at(now, self.stale_while_revalidate),
            None => {
                self.record_miss(key);
                return Lookup::Miss;
            }
        };

        match freshness {
            Freshness::Fresh => match self.decode_and_touch(key) {
                Some(value) => {
                    self.stats.record_hit();
                    Lookup::Hit(value)
                }
                None => Lookup::Miss,
            },
            Freshness::Stale if allow_stale => match self.decode_and_touch(key) {
                Some(value) => {
                    self.stats.record_stale_hit();
                    Lookup::Stale(value)
                }
                None => Lookup::Miss,
            },
            Freshness::Stale => {
                self.record_miss(key);
                Lookup::Miss
            }
            Freshness::Expired => {
                let removed = self.remove_cascade(key, Removal::Expired);
                self.stats.record_expirations(removed.len());
                self.record_miss(key);
                Lookup::Miss
            }
        }
    }

    /// Decodes a resident value and records the access. A value that fails
    /// to decode is dropped and reported as a miss.
    fn decode_and_touch(&mut self, key: &str) -> Option<Value> {
        let decoded = self.entries.get(key)?.value.decode();
        match decoded {
            Ok(value) => {
                let tick = self.next_tick();
                if let Some(entry) = self.entries.get_mut(key) {
                    entry.touch(tick);
                }
                if let Some(partitions) = self.partitions.as_mut() {
                    let partition = partitions.record_hit(key);
                    self.emit(CacheEvent::PartitionHit {
                        partition,
                        key: key.to_string(),
                    });
                }
                self.emit(CacheEvent::Hit {
                    key: key.to_string(),
                });
                Some(value)
            }
            Err(err) => {
                warn!(key, error = %err, "stored value failed to decode, dropping entry");
                self.remove_cascade(key, Removal::Deleted);
                self.record_miss(key);
                None
            }
        }
    }

    fn record_miss(&mut self, key: &str) {
        self.stats.record_miss();
        if let Some(partitions) = self.partitions.as_mut() {
            partitions.record_miss(key);
        }
        self.emit(CacheEvent::Miss {
            key: key.to_string(),
        });
    }

    // == Has ==
    /// Existence check respecting expiry; statistics are untouched.
    pub fn has(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map_or(false, |entry| !entry.is_expired())
    }

    // == Delete ==
    /// Removes `key` and, transitively, every entry depending on it.
    ///
    /// Returns the removed keys, `key` first; empty if it was not resident.
    pub fn delete(&mut self, key: &str) -> Vec<String> {
        let removed = self.remove_cascade(key, Removal::Deleted);
        self.stats.deletes += removed.len() as u64;
        removed
    }

    /// Destroys `root` and its transitive dependents.
    ///
    /// Walks an explicit work-list with a visited set, so dependency cycles
    /// terminate. Each entry is unlinked from the dependency graph, the tag
    /// index and the partition counters before it is dropped.
    fn remove_cascade(&mut self, root: &str, removal: Removal) -> Vec<String> {
        let mut work = vec![root.to_string()];
        let mut visited = HashSet::new();
        let mut removed = Vec::new();

        while let Some(key) = work.pop() {
            if !visited.insert(key.clone()) {
                continue;
            }
            let Some(entry) = self.entries.remove(&key) else {
                continue;
            };
            self.unlink(&key, &entry);
            work.extend(entry.dependents.iter().rev().cloned());

            let event = match (removal, key == root) {
                (Removal::Deleted, _) => CacheEvent::Delete { key: key.clone() },
                (Removal::Evicted(reason), true) => CacheEvent::Evict {
                    key: key.clone(),
                    reason,
                },
                (Removal::Expired, true) => CacheEvent::Evict {
                    key: key.clone(),
                    reason: EvictReason::Expired,
                },
                (_, false) => CacheEvent::Evict {
                    key: key.clone(),
                    reason: EvictReason::Dependency,
                },
            };
            self.emit(event);
            removed.push(key);
        }

        if removed.len() > 1 {
            debug!(root, cascaded = removed.len() - 1, "cascading invalidation");
        }
        removed
    }

    /// Detaches an entry that has already left the map from every index.
    fn unlink(&mut self, key: &str, entry: &CacheEntry) {
        for dep in &entry.depends_on {
            if let Some(parent) = self.entries.get_mut(dep) {
                parent.dependents.remove(key);
            }
        }
        for tag in &entry.tags {
            self.tags.remove(tag, key);
        }
        if let Some(partitions) = self.partitions.as_mut() {
            partitions.record_remove(key, entry.memory_estimate(key));
        }
    }

    // == Clear ==
    /// Drops every entry, tag and group.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.tags.clear();
        self.groups.clear();
        if let Some(partitions) = self.partitions.as_mut() {
            partitions.reset_counts();
        }
    }

    // == Eviction ==
    /// Applies the eviction policy until the resident count fits.
    fn enforce_capacity(&mut self, protect: Option<&str>) {
        if self.policy == EvictionPolicy::Ttl {
            self.sweep_expired();
        }
        if !self.policy.enforces_capacity() {
            return;
        }

        while self.entries.len() > self.max_items {
            let Some((victim, reason)) = self.policy.select_victim(&self.entries, protect) else {
                break;
            };
            let removed = self.remove_cascade(&victim, Removal::Evicted(reason));
            debug!(key = %victim, policy = %self.policy, removed = removed.len(), "evicted");
            self.stats.record_evictions(removed.len());
        }
    }

    // == Sweep Expired ==
    /// Removes every entry past its last deadline.
    ///
    /// With stale-while-revalidate enabled, entries inside their stale
    /// window are kept. Returns the removed keys.
    pub fn sweep_expired(&mut self) -> Vec<String> {
        let now = Instant::now();
        let mut expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.freshness_at(now, self.stale_while_revalidate) == Freshness::Expired
            })
            .map(|(key, _)| key.clone())
            .collect();
        expired.sort();

        let mut removed = Vec::new();
        for key in expired {
            removed.extend(self.remove_cascade(&key, Removal::Expired));
        }
        self.stats.record_expirations(removed.len());
        removed
    }

    // == Tags ==
    /// Deletes every member of `tag` (with cascades) and drops the tag.
    pub fn invalidate_by_tag(&mut self, tag: &str) -> Vec<String> {
        let mut removed = Vec::new();
        for key in self.tags.members(tag) {
            removed.extend(self.remove_cascade(&key, Removal::Deleted));
        }
        self.tags.remove_tag(tag);
        self.stats.deletes += removed.len() as u64;

        self.emit(CacheEvent::TagInvalidated {
            tag: tag.to_string(),
            affected_keys: removed.clone(),
        });
        removed
    }

    pub fn invalidate_by_tags<S: AsRef<str>>(&mut self, tags: &[S]) -> BTreeMap<String, Vec<String>> {
        tags.iter()
            .map(|tag| {
                let tag = tag.as_ref();
                (tag.to_string(), self.invalidate_by_tag(tag))
            })
            .collect()
    }

    pub fn tag(&self, name: &str) -> Option<CacheTag> {
        self.tags.get(name).cloned()
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.tags.names()
    }

    // == Groups ==
    pub fn create_group(
        &mut self,
        name: &str,
        keys: Vec<String>,
        config: Option<Value>,
    ) -> Result<CacheGroup> {
        let group = self.groups.create(name, keys, config)?;
        self.emit(CacheEvent::GroupCreated {
            group: group.name.clone(),
            keys: group.keys.iter().cloned().collect(),
        });
        Ok(group)
    }

    pub fn add_to_group(&mut self, name: &str, keys: Vec<String>) -> Result<()> {
        self.groups.add_keys(name, keys)
    }

    pub fn remove_from_group(&mut self, name: &str, keys: &[String]) -> Result<()> {
        self.groups
            .remove_keys(name, keys.iter().map(String::as_str))
    }

    /// Deletes every resident member of a group, then the group itself.
    pub fn delete_group(&mut self, name: &str) -> Result<Vec<String>> {
        let members: Vec<String> = self
            .groups
            .get(name)
            .ok_or_else(|| CacheError::GroupNotFound(name.to_string()))?
            .keys
            .iter()
            .cloned()
            .collect();

        let mut removed = Vec::new();
        for key in members {
            removed.extend(self.remove_cascade(&key, Removal::Deleted));
        }
        self.stats.deletes += removed.len() as u64;
        self.groups.remove(name);

        self.emit(CacheEvent::GroupDeleted {
            group_name: name.to_string(),
        });
        Ok(removed)
    }

    pub fn group(&self, name: &str) -> Option<CacheGroup> {
        self.groups.get(name).cloned()
    }

    pub fn group_names(&self) -> Vec<String> {
        self.groups.names()
    }

    // == Bulk ==
    /// Runs a batch in the order get, set, delete, invalidate-by-tag.
    pub fn bulk(&mut self, request: &BulkRequest) -> BulkResult {
        let started = Instant::now();
        let mut result = BulkResult::default();

        for key in &request.get {
            let value = self.get(key);
            result.get.insert(key.clone(), value);
        }
        for item in &request.set {
            match self.set(&item.key, item.value.clone(), &item.options) {
                Ok(()) => result.set.push(item.key.clone()),
                Err(err) => {
                    result.set_errors.insert(item.key.clone(), err.to_string());
                }
            }
        }
        for key in &request.delete {
            let removed = self.delete(key);
            result.delete.insert(key.clone(), removed);
        }
        for tag in &request.invalidate_tags {
            let removed = self.invalidate_by_tag(tag);
            result.invalidated.insert(tag.clone(), removed);
        }

        self.emit(CacheEvent::BulkOperation {
            operation: request.clone(),
            result: result.clone(),
            duration: started.elapsed(),
        });
        result
    }

    // == Introspection ==
    /// Resident keys, optionally filtered, in sorted order.
    pub fn keys(&self, pattern: Option<&Regex>) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .keys()
            .filter(|key| pattern.map_or(true, |re| re.is_match(key)))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    fn access_report(&self) -> Vec<KeyAccess> {
        let now = Instant::now();
        self.entries
            .iter()
            .map(|(key, entry)| KeyAccess {
                key: key.clone(),
                access_count: entry.access_count,
                idle_ms: now.saturating_duration_since(entry.last_accessed).as_millis() as u64,
            })
            .collect()
    }

    /// The `n` most-read keys, most first.
    pub fn top_keys(&self, n: usize) -> Vec<KeyAccess> {
        let mut report = self.access_report();
        report.sort_by(|a, b| b.access_count.cmp(&a.access_count).then(a.key.cmp(&b.key)));
        report.truncate(n);
        report
    }

    /// The `n` least-read keys, least first.
    pub fn least_accessed_keys(&self, n: usize) -> Vec<KeyAccess> {
        let mut report = self.access_report();
        report.sort_by(|a, b| a.access_count.cmp(&b.access_count).then(a.key.cmp(&b.key)));
        report.truncate(n);
        report
    }

    /// Every resident key, oldest first.
    pub fn keys_by_age(&self) -> Vec<KeyAge> {
        let mut entries: Vec<(&String, &CacheEntry)> = self.entries.iter().collect();
        entries.sort_by(|(ka, a), (kb, b)| a.created_at.cmp(&b.created_at).then(ka.cmp(kb)));
        entries
            .into_iter()
            .map(|(key, entry)| KeyAge {
                key: key.clone(),
                age_ms: entry.age().as_millis() as u64,
                created_at: entry.created_at_utc,
            })
            .collect()
    }

    pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        let entry = self.entries.get(key)?;
        Some(EntryInfo {
            key: key.to_string(),
            created_at: entry.created_at_utc,
            age_ms: entry.age().as_millis() as u64,
            ttl_remaining_ms: entry.ttl_remaining().map(|d| d.as_millis() as u64),
            expired: entry.is_expired(),
            depends_on: entry.depends_on.iter().cloned().collect(),
            dependents: entry.dependents.iter().cloned().collect(),
            tags: entry.tags.iter().cloned().collect(),
            access_count: entry.access_count,
            compressed: entry.value.is_compressed(),
            original_size: entry.original_size,
            stored_size: entry.stored_size,
            partition: self.partitions.as_ref().map(|p| p.assign(key)),
        })
    }

    pub fn partition_info(&self) -> Vec<PartitionInfo> {
        self.partitions
            .as_ref()
            .map(PartitionAssigner::info)
            .unwrap_or_default()
    }

    /// True when partitioning is disabled or key counts are balanced.
    pub fn is_partition_balanced(&self) -> bool {
        self.partitions
            .as_ref()
            .map_or(true, PartitionAssigner::is_balanced)
    }

    /// Estimated bytes held by resident entries.
    pub fn memory_usage(&self) -> usize {
        self.entries
            .iter()
            .map(|(key, entry)| entry.memory_estimate(key))
            .sum()
    }

    /// Stored over original size across resident compressed entries;
    /// 1.0 when nothing is compressed.
    pub fn compression_ratio(&self) -> f64 {
        let (stored, original) = self
            .entries
            .values()
            .filter(|entry| entry.value.is_compressed())
            .fold((0usize, 0usize), |(s, o), entry| {
                (s + entry.stored_size, o + entry.original_size)
            });
        if original == 0 {
            1.0
        } else {
            stored as f64 / original as f64
        }
    }

    // == Stats ==
    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    pub fn snapshot(&self, subscriber_failures: u64) -> StatsSnapshot {
        let memory_usage = self.memory_usage();
        StatsSnapshot {
            hits: self.stats.hits,
            misses: self.stats.misses,
            stale_hits: self.stats.stale_hits,
            evictions: self.stats.evictions,
            expirations: self.stats.expirations,
            total_accesses: self.stats.total_accesses,
            sets: self.stats.sets,
            deletes: self.stats.deletes,
            hit_rate: self.stats.hit_rate(),
            miss_rate: self.stats.miss_rate(),
            total_entries: self.entries.len(),
            memory_usage,
            memory_efficiency: if self.max_memory == 0 {
                0.0
            } else {
                memory_usage as f64 / self.max_memory as f64 * 100.0
            },
            compressed_entries: self
                .entries
                .values()
                .filter(|entry| entry.value.is_compressed())
                .count(),
            compression_ratio: self.compression_ratio(),
            tag_count: self.tags.tag_count(),
            group_count: self.groups.group_count(),
            subscriber_failures,
        }
    }

    // == Length ==
    /// Returns the current number of entries in the cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn entry(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }
}

// == Key Validation ==
fn validate_key(key: &str, max_length: Option<usize>) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("key cannot be empty".to_string()));
    }
    if let Some(max) = max_length.filter(|&max| key.len() > max) {
        return Err(CacheError::InvalidKey(format!(
            "key exceeds maximum length of {} bytes",
            max
        )));
    }
    Ok(())
}

// == Glob Patterns ==
/// Compiles a glob (`*` any run, `?` one character) into an anchored regex.
pub fn compile_glob(pattern: &str) -> Result<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for c in pattern.chars() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');
    Regex::new(&source).map_err(|err| CacheError::InvalidPattern(err.to_string()))
}
