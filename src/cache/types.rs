//! Request and report types shared by the store and the engine handle.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

// == Set Options ==
/// Per-write options.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SetOptions {
    /// Expiry offset; None uses the configured default, zero never expires
    pub ttl: Option<Duration>,
    /// Offset of the stale deadline from the write
    pub stale_ttl: Option<Duration>,
    /// Keys this entry depends on; only resident keys are linked
    pub depends_on: Vec<String>,
    pub tags: Vec<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn stale_ttl(mut self, stale_ttl: Duration) -> Self {
        self.stale_ttl = Some(stale_ttl);
        self
    }

    pub fn depends_on<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

// == Bulk ==
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkSetItem {
    pub key: String,
    pub value: Value,
    pub options: SetOptions,
}

/// A batch executed in the order get, set, delete, invalidate-by-tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkRequest {
    pub get: Vec<String>,
    pub set: Vec<BulkSetItem>,
    pub delete: Vec<String>,
    pub invalidate_tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkResult {
    /// Value per requested key; None on miss
    pub get: BTreeMap<String, Option<Value>>,
    /// Keys that were stored
    pub set: Vec<String>,
    /// Rejected writes with their error message
    pub set_errors: BTreeMap<String, String>,
    /// Keys removed per delete, cascaded dependents included
    pub delete: BTreeMap<String, Vec<String>>,
    /// Keys removed per invalidated tag
    pub invalidated: BTreeMap<String, Vec<String>>,
}

// == Introspection ==
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyAccess {
    pub key: String,
    pub access_count: u64,
    pub idle_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyAge {
    pub key: String,
    pub age_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Full metadata for one resident entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub age_ms: u64,
    pub ttl_remaining_ms: Option<u64>,
    pub expired: bool,
    pub depends_on: Vec<String>,
    pub dependents: Vec<String>,
    pub tags: Vec<String>,
    pub access_count: u64,
    pub compressed: bool,
    pub original_size: usize,
    pub stored_size: usize,
    pub partition: Option<usize>,
}
