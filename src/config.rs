//! Configuration Module
//!
//! Cache engine options, loaded from environment variables or built in code.
//! Callback-valued options (hooks, breaker fallback, custom partitioner) can
//! only be supplied programmatically.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::cache::EvictionPolicy;
use crate::compression::CompressionAlgorithm;
use crate::partition::{PartitionFn, PartitionStrategy};

/// Fallback invoked when a loader fails or the breaker rejects a call.
pub type Fallback = Arc<dyn Fn(&str) -> Value + Send + Sync>;
/// Hook invoked on every cache hit with the key and returned value.
pub type HitHook = Arc<dyn Fn(&str, &Value) + Send + Sync>;
/// Hook invoked on every cache miss.
pub type MissHook = Arc<dyn Fn(&str) + Send + Sync>;

// == Compression ==
/// Write-time value compression settings.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub algorithm: CompressionAlgorithm,
    /// Minimum serialized size in bytes before compression is attempted
    pub threshold: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: CompressionAlgorithm::Gzip,
            threshold: 1024,
        }
    }
}

// == Circuit Breaker ==
/// Settings for the breaker guarding compute loaders.
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a trial call
    pub recovery_timeout: Duration,
    /// Window over which failure timestamps are kept for rate reporting
    pub monitoring_window: Duration,
    pub fallback: Option<Fallback>,
}

impl fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("enabled", &self.enabled)
            .field("failure_threshold", &self.failure_threshold)
            .field("recovery_timeout", &self.recovery_timeout)
            .field("monitoring_window", &self.monitoring_window)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            monitoring_window: Duration::from_secs(60),
            fallback: None,
        }
    }
}

// == Partitioning ==
/// Key to bucket assignment settings.
#[derive(Clone)]
pub struct PartitioningConfig {
    pub enabled: bool,
    pub strategy: PartitionStrategy,
    pub partitions: usize,
    /// Used by [`PartitionStrategy::Custom`]; hash is used when absent
    pub custom: Option<PartitionFn>,
}

impl fmt::Debug for PartitioningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitioningConfig")
            .field("enabled", &self.enabled)
            .field("strategy", &self.strategy)
            .field("partitions", &self.partitions)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl Default for PartitioningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strategy: PartitionStrategy::Hash,
            partitions: 16,
            custom: None,
        }
    }
}

// == Monitoring ==
/// Limits that turn the health report from healthy to degraded.
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    /// Minimum acceptable hit rate, in percent
    pub min_hit_rate: f64,
    /// Maximum estimated memory usage, in percent of `max_memory`
    pub max_memory_usage: f64,
    /// Maximum number of evictions before alerting
    pub max_evictions: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            min_hit_rate: 50.0,
            max_memory_usage: 90.0,
            max_evictions: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    /// Metric names reported by `Cache::metrics`; empty means all
    pub metrics: Vec<String>,
    pub alert_thresholds: AlertThresholds,
}

// == Hooks ==
/// Optional callbacks run synchronously on reads.
#[derive(Clone, Default)]
pub struct Hooks {
    pub on_hit: Option<HitHook>,
    pub on_miss: Option<MissHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_hit", &self.on_hit.is_some())
            .field("on_miss", &self.on_miss.is_some())
            .finish()
    }
}

// == Cache Config ==
/// Cache engine configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Resident entry count that triggers eviction
    pub max_items: usize,
    /// Memory budget in bytes, used only for the efficiency ratio
    pub max_memory: usize,
    /// Longest accepted key in bytes; None accepts any non-empty key
    pub max_key_length: Option<usize>,
    /// Largest accepted value in bytes as stored (after compression);
    /// None is unlimited
    pub max_value_size: Option<usize>,
    /// TTL for entries set without one; zero means no expiry
    pub default_ttl: Duration,
    /// Serve stale values while refreshing in the background
    pub stale_while_revalidate: bool,
    /// Label only
    pub namespace: String,
    pub eviction_policy: EvictionPolicy,
    /// Interval of the background TTL sweep
    pub sweep_interval: Duration,
    /// Accepted for compatibility; replication is not implemented
    pub distributed: bool,
    pub compression: CompressionConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub partitioning: PartitioningConfig,
    pub monitoring: MonitoringConfig,
    pub hooks: Hooks,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHEGRAPH_MAX_ITEMS` - Maximum resident entries (default: 1000)
    /// - `CACHEGRAPH_MAX_MEMORY` - Memory budget in bytes (default: 100 MiB)
    /// - `CACHEGRAPH_MAX_KEY_LENGTH` - Key length limit in bytes (default: unlimited)
    /// - `CACHEGRAPH_MAX_VALUE_SIZE` - Stored value limit in bytes (default: unlimited)
    /// - `CACHEGRAPH_DEFAULT_TTL_MS` - Default TTL in milliseconds (default: 0, no expiry)
    /// - `CACHEGRAPH_STALE_WHILE_REVALIDATE` - Enable stale reads (default: false)
    /// - `CACHEGRAPH_NAMESPACE` - Namespace label (default: "default")
    /// - `CACHEGRAPH_EVICTION_POLICY` - lru, lfu, ttl or manual (default: lru)
    /// - `CACHEGRAPH_SWEEP_INTERVAL_MS` - TTL sweep interval (default: 1000)
    /// - `CACHEGRAPH_COMPRESSION` - Enable compression (default: false)
    /// - `CACHEGRAPH_COMPRESSION_ALGORITHM` - gzip, deflate or zlib (default: gzip)
    /// - `CACHEGRAPH_COMPRESSION_THRESHOLD` - Minimum bytes to compress (default: 1024)
    /// - `CACHEGRAPH_BREAKER` - Enable the circuit breaker (default: false)
    /// - `CACHEGRAPH_BREAKER_THRESHOLD` - Failures before opening (default: 5)
    /// - `CACHEGRAPH_BREAKER_RECOVERY_MS` - Open duration (default: 60000)
    /// - `CACHEGRAPH_PARTITIONS` - Partition count, zero disables (default: 0)
    /// - `CACHEGRAPH_PARTITION_STRATEGY` - hash or range (default: hash)
    /// - `CACHEGRAPH_MONITORING` - Enable health alerts (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let partitions: usize = env_or("CACHEGRAPH_PARTITIONS", 0);

        Self {
            max_items: env_or("CACHEGRAPH_MAX_ITEMS", defaults.max_items),
            max_memory: env_or("CACHEGRAPH_MAX_MEMORY", defaults.max_memory),
            max_key_length: env_opt("CACHEGRAPH_MAX_KEY_LENGTH"),
            max_value_size: env_opt("CACHEGRAPH_MAX_VALUE_SIZE"),
            default_ttl: Duration::from_millis(env_or("CACHEGRAPH_DEFAULT_TTL_MS", 0)),
            stale_while_revalidate: env_or("CACHEGRAPH_STALE_WHILE_REVALIDATE", false),
            namespace: env_or("CACHEGRAPH_NAMESPACE", defaults.namespace),
            eviction_policy: env_or("CACHEGRAPH_EVICTION_POLICY", defaults.eviction_policy),
            sweep_interval: Duration::from_millis(env_or("CACHEGRAPH_SWEEP_INTERVAL_MS", 1000)),
            distributed: env_or("CACHEGRAPH_DISTRIBUTED", false),
            compression: CompressionConfig {
                enabled: env_or("CACHEGRAPH_COMPRESSION", false),
                algorithm: env_or(
                    "CACHEGRAPH_COMPRESSION_ALGORITHM",
                    CompressionAlgorithm::Gzip,
                ),
                threshold: env_or("CACHEGRAPH_COMPRESSION_THRESHOLD", 1024),
            },
            circuit_breaker: CircuitBreakerConfig {
                enabled: env_or("CACHEGRAPH_BREAKER", false),
                failure_threshold: env_or("CACHEGRAPH_BREAKER_THRESHOLD", 5),
                recovery_timeout: Duration::from_millis(env_or(
                    "CACHEGRAPH_BREAKER_RECOVERY_MS",
                    60_000,
                )),
                ..CircuitBreakerConfig::default()
            },
            partitioning: PartitioningConfig {
                enabled: partitions > 0,
                strategy: env_or("CACHEGRAPH_PARTITION_STRATEGY", PartitionStrategy::Hash),
                partitions: partitions.max(1),
                custom: None,
            },
            monitoring: MonitoringConfig {
                enabled: env_or("CACHEGRAPH_MONITORING", false),
                ..MonitoringConfig::default()
            },
            hooks: Hooks::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_items: 1000,
            max_memory: 100 * 1024 * 1024,
            max_key_length: None,
            max_value_size: None,
            default_ttl: Duration::ZERO,
            stale_while_revalidate: false,
            namespace: "default".to_string(),
            eviction_policy: EvictionPolicy::Lru,
            sweep_interval: Duration::from_secs(1),
            distributed: false,
            compression: CompressionConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            partitioning: PartitioningConfig::default(),
            monitoring: MonitoringConfig::default(),
            hooks: Hooks::default(),
        }
    }
}

// == Server Config ==
/// Admin HTTP server parameters.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl ServerConfig {
    /// Reads `CACHEGRAPH_PORT` (default: 3000).
    pub fn from_env() -> Self {
        Self {
            port: env_or("CACHEGRAPH_PORT", 3000),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// Parses an environment variable, falling back to `default` when unset or malformed.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an optional limit; unset or malformed means no limit.
fn env_opt<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
