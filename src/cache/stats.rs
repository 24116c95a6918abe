//! Cache Statistics Module
//!
//! Running counters plus the derived snapshot and health report types.
//! Rates are computed at query time and never stored.

use serde::Serialize;

use crate::breaker::BreakerMode;

// == Cache Stats ==
/// Running counters maintained by the store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of failed cache retrievals (key not found or expired)
    pub misses: u64,
    /// Stale values served while a refresh runs
    pub stale_hits: u64,
    /// Entries removed to enforce capacity, including cascaded dependents
    pub evictions: u64,
    /// Entries removed because they expired
    pub expirations: u64,
    /// Reads of any kind
    pub total_accesses: u64,
    pub sets: u64,
    pub deletes: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Percentage of reads that hit, or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }

    /// Percentage of reads that missed, or 0.0 if no reads have been made.
    pub fn miss_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.misses as f64 / total as f64 * 100.0
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
        self.total_accesses += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
        self.total_accesses += 1;
    }

    pub fn record_stale_hit(&mut self) {
        self.stale_hits += 1;
        self.record_hit();
    }

    pub fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }

    pub fn record_expirations(&mut self, count: usize) {
        self.expirations += count as u64;
    }
}

// == Snapshot ==
/// Aggregate statistics reported by `Cache::stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub stale_hits: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub total_accesses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Percentage of reads that hit
    pub hit_rate: f64,
    /// Percentage of reads that missed
    pub miss_rate: f64,
    pub total_entries: usize,
    /// Estimated bytes held (keys, values and per-entry overhead)
    pub memory_usage: usize,
    /// `memory_usage` as a percentage of the configured budget
    pub memory_efficiency: f64,
    pub compressed_entries: usize,
    /// Stored over original size across resident compressed entries
    pub compression_ratio: f64,
    pub tag_count: usize,
    pub group_count: usize,
    pub subscriber_failures: u64,
}

// == Health ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub breaker: Option<BreakerMode>,
    pub stats: StatsSnapshot,
}
