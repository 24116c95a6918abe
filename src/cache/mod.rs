//! Cache Module
//!
//! In-process cache engine: entries with TTL and stale windows, dependency
//! invalidation, tag and group indices, pluggable eviction and the async
//! [`Cache`] handle that ties them to the event bus and circuit breaker.

mod engine;
mod entry;
mod eviction;
mod index;
mod stats;
mod store;
mod types;


// Re-export public types
pub use engine::{Cache, CacheState, SwrRead, WarmupReport, WeakCache};
pub use entry::{CacheEntry, Freshness};
pub use eviction::EvictionPolicy;
pub use index::{CacheGroup, CacheTag, GroupRegistry, TagIndex};
pub use stats::{CacheStats, HealthReport, HealthStatus, StatsSnapshot};
pub use store::{compile_glob, CacheStore, Lookup};
pub use types::{BulkRequest, BulkResult, BulkSetItem, EntryInfo, KeyAccess, KeyAge, SetOptions};

// == Public Constants ==
/// Fixed per-entry bookkeeping cost added to memory estimates
pub const ENTRY_OVERHEAD_BYTES: usize = 64;
