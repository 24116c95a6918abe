//! Partition Assigner
//!
//! Deterministic key to bucket mapping with per-bucket counters. The store
//! updates the counters on every insert, removal and read, so the reported
//! distribution always matches resident keys.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::config::PartitioningConfig;
use crate::error::CacheError;

/// Caller supplied assignment: `(key, partitions) -> partition`.
pub type PartitionFn = Arc<dyn Fn(&str, usize) -> usize + Send + Sync>;

/// Relative standard deviation below which partitions count as balanced.
const BALANCE_TOLERANCE: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionStrategy {
    Hash,
    Range,
    Custom,
}

impl FromStr for PartitionStrategy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hash" => Ok(PartitionStrategy::Hash),
            "range" => Ok(PartitionStrategy::Range),
            "custom" => Ok(PartitionStrategy::Custom),
            other => Err(CacheError::Internal(format!(
                "unknown partition strategy '{}'",
                other
            ))),
        }
    }
}

// == Partition Info ==
/// Informational counters for one partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PartitionInfo {
    pub id: usize,
    pub key_count: usize,
    /// Estimated bytes held by keys in this partition
    pub memory_usage: usize,
    pub hits: u64,
    pub misses: u64,
    /// Percentage of reads in this partition that hit
    pub hit_rate: f64,
}

impl PartitionInfo {
    fn refresh_hit_rate(&mut self) {
        let total = self.hits + self.misses;
        self.hit_rate = if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        };
    }
}

/// Rolling 32-bit signed hash: `h = h * 31 + unit` over UTF-16 code units.
pub fn rolling_hash(key: &str) -> i32 {
    key.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(unit as i32)
    })
}

// == Assigner ==
pub struct PartitionAssigner {
    strategy: PartitionStrategy,
    custom: Option<PartitionFn>,
    partitions: Vec<PartitionInfo>,
}

impl fmt::Debug for PartitionAssigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionAssigner")
            .field("strategy", &self.strategy)
            .field("partitions", &self.partitions.len())
            .finish()
    }
}

impl PartitionAssigner {
    /// Creates an assigner with at least one partition.
    pub fn new(config: &PartitioningConfig) -> Self {
        let count = config.partitions.max(1);
        Self {
            strategy: config.strategy,
            custom: config.custom.clone(),
            partitions: (0..count)
                .map(|id| PartitionInfo {
                    id,
                    ..PartitionInfo::default()
                })
                .collect(),
        }
    }

    /// Maps `key` to a partition index.
    pub fn assign(&self, key: &str) -> usize {
        let n = self.partitions.len();
        match (self.strategy, &self.custom) {
            (PartitionStrategy::Range, _) => key
                .chars()
                .next()
                .map(|c| c as usize % n)
                .unwrap_or(0),
            (PartitionStrategy::Custom, Some(custom)) => custom(key, n) % n,
            _ => rolling_hash(key).unsigned_abs() as usize % n,
        }
    }

    // == Counter Maintenance ==
    pub fn record_insert(&mut self, key: &str, size: usize) -> usize {
        let id = self.assign(key);
        let info = &mut self.partitions[id];
        info.key_count += 1;
        info.memory_usage += size;
        id
    }

    pub fn record_remove(&mut self, key: &str, size: usize) {
        let id = self.assign(key);
        let info = &mut self.partitions[id];
        info.key_count = info.key_count.saturating_sub(1);
        info.memory_usage = info.memory_usage.saturating_sub(size);
    }

    pub fn record_hit(&mut self, key: &str) -> usize {
        let id = self.assign(key);
        let info = &mut self.partitions[id];
        info.hits += 1;
        info.refresh_hit_rate();
        id
    }

    pub fn record_miss(&mut self, key: &str) {
        let id = self.assign(key);
        let info = &mut self.partitions[id];
        info.misses += 1;
        info.refresh_hit_rate();
    }

    /// Zeroes key and memory counters, keeping read counters.
    pub fn reset_counts(&mut self) {
        for info in &mut self.partitions {
            info.key_count = 0;
            info.memory_usage = 0;
        }
    }

    pub fn info(&self) -> Vec<PartitionInfo> {
        self.partitions.clone()
    }

    /// True when the standard deviation of key counts is under 20% of the mean.
    pub fn is_balanced(&self) -> bool {
        let n = self.partitions.len() as f64;
        let mean = self.partitions.iter().map(|p| p.key_count as f64).sum::<f64>() / n;
        if mean == 0.0 {
            return true;
        }
        let variance = self
            .partitions
            .iter()
            .map(|p| (p.key_count as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        variance.sqrt() < mean * BALANCE_TOLERANCE
    }
}
