//! Eviction Policy Module
//!
//! Pure victim selection over the resident entries. Every scanning policy is
//! O(n) per pass; ties are impossible because each write or hit takes a new
//! value from the store's logical access clock.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::cache::CacheEntry;
use crate::error::CacheError;
use crate::events::EvictReason;

// == Eviction Policy ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Evict the entry with the oldest access
    #[default]
    Lru,
    /// Evict the entry with the fewest hits
    Lfu,
    /// Sweep expired entries, then evict the one closest to expiry
    Ttl,
    /// Never evict automatically
    Manual,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Ttl => "ttl",
            EvictionPolicy::Manual => "manual",
        }
    }

    /// Whether capacity is enforced after inserts.
    pub fn enforces_capacity(&self) -> bool {
        !matches!(self, EvictionPolicy::Manual)
    }

    fn reason(&self) -> EvictReason {
        match self {
            EvictionPolicy::Lfu => EvictReason::Lfu,
            EvictionPolicy::Ttl => EvictReason::Ttl,
            _ => EvictReason::Lru,
        }
    }

    // == Select Victim ==
    /// Picks the next key to evict, or None under the manual policy or when
    /// nothing is resident.
    ///
    /// `protect` names the key that was just written; it is only chosen when
    /// it is the sole candidate, so a fresh insert is never its own victim
    /// while older entries remain.
    pub fn select_victim(
        &self,
        entries: &HashMap<String, CacheEntry>,
        protect: Option<&str>,
    ) -> Option<(String, EvictReason)> {
        if !self.enforces_capacity() {
            return None;
        }

        let candidates = entries
            .iter()
            .filter(|(key, _)| Some(key.as_str()) != protect);

        let victim = match self {
            EvictionPolicy::Lru => candidates
                .min_by_key(|(_, e)| e.last_access_tick)
                .map(|(k, _)| k.clone()),
            EvictionPolicy::Lfu => candidates
                .min_by_key(|(_, e)| (e.access_count, e.last_access_tick))
                .map(|(k, _)| k.clone()),
            EvictionPolicy::Ttl => candidates
                // Entries without expiry sort after every expiring entry
                .min_by_key(|(_, e)| (e.expires_at.is_none(), e.expires_at, e.last_access_tick))
                .map(|(k, _)| k.clone()),
            EvictionPolicy::Manual => None,
        };

        victim
            .or_else(|| protect.filter(|k| entries.contains_key(*k)).map(str::to_string))
            .map(|key| (key, self.reason()))
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "ttl" => Ok(EvictionPolicy::Ttl),
            "manual" => Ok(EvictionPolicy::Manual),
            other => Err(CacheError::Internal(format!(
                "unknown eviction policy '{}'",
                other
            ))),
        }
    }
}
