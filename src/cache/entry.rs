//! Cache Entry Module
//!
//! Defines the structure for individual cache entries: the stored value,
//! expiry and stale deadlines, dependency edges, tags and access statistics.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::cache::ENTRY_OVERHEAD_BYTES;
use crate::compression::{Encoded, StoredValue};

// == Freshness ==
/// Read state of an entry at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Before expiry, or no expiry set
    Fresh,
    /// Past expiry but before the stale deadline
    Stale,
    /// Past every deadline
    Expired,
}

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The stored value, possibly compressed
    pub value: StoredValue,
    pub created_at: Instant,
    /// Wall-clock creation time for reporting
    pub created_at_utc: DateTime<Utc>,
    /// None = never expires
    pub expires_at: Option<Instant>,
    /// Deadline after which an expired value can no longer be served stale
    pub stale_at: Option<Instant>,
    /// Keys this entry depends on
    pub depends_on: BTreeSet<String>,
    /// Keys that depend on this entry (back-references)
    pub dependents: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub access_count: u64,
    pub last_accessed: Instant,
    /// Logical clock value of the last write or hit, used to order evictions
    pub last_access_tick: u64,
    /// Serialized size before compression
    pub original_size: usize,
    /// Size actually held
    pub stored_size: usize,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry from an encoded value.
    ///
    /// # Arguments
    /// * `encoded` - The value as produced by the compressor
    /// * `ttl` - Expiry offset; None or zero means the entry never expires
    /// * `stale_ttl` - Offset of the stale deadline from now
    /// * `tick` - Logical access clock value
    pub fn new(
        encoded: Encoded,
        ttl: Option<Duration>,
        stale_ttl: Option<Duration>,
        tick: u64,
    ) -> Self {
        let now = Instant::now();
        Self {
            value: encoded.value,
            created_at: now,
            created_at_utc: Utc::now(),
            expires_at: ttl.filter(|ttl| !ttl.is_zero()).map(|ttl| now + ttl),
            stale_at: stale_ttl.map(|stale| now + stale),
            depends_on: BTreeSet::new(),
            dependents: BTreeSet::new(),
            tags: BTreeSet::new(),
            access_count: 0,
            last_accessed: now,
            last_access_tick: tick,
            original_size: encoded.original_size,
            stored_size: encoded.stored_size,
        }
    }

    // == Is Expired ==
    /// Checks if the entry is past its expiry time.
    ///
    /// An entry is expired once the current time is greater than or equal
    /// to the expiration time.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(expires) if now >= expires)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    // == Freshness ==
    /// Classifies the entry at `now`. Without stale-while-revalidate an
    /// expired entry is never stale.
    pub fn freshness_at(&self, now: Instant, stale_while_revalidate: bool) -> Freshness {
        if !self.is_expired_at(now) {
            return Freshness::Fresh;
        }
        match self.stale_at {
            Some(stale) if stale_while_revalidate && now < stale => Freshness::Stale,
            _ => Freshness::Expired,
        }
    }

    /// Records a hit.
    pub fn touch(&mut self, tick: u64) {
        self.access_count += 1;
        self.last_accessed = Instant::now();
        self.last_access_tick = tick;
    }

    /// Estimated footprint: key, held value and a fixed overhead.
    pub fn memory_estimate(&self, key: &str) -> usize {
        key.len() + self.stored_size + ENTRY_OVERHEAD_BYTES
    }

    // == Time To Live ==
    /// Returns remaining TTL, or None if no expiration is set.
    ///
    /// # Returns
    /// - `Some(Duration::ZERO)` if the entry has expired
    /// - `Some(remaining)` if the entry has a TTL that hasn't elapsed
    /// - `None` if the entry never expires
    pub fn ttl_remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|expires| expires.saturating_duration_since(Instant::now()))
    }

    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.created_at)
    }
}
