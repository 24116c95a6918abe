//! Request DTOs for the admin API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::cache::SetOptions;

/// Request body for the SET operation (PUT /set)
///
/// # Fields
/// - `key`: The cache key to store the value under
/// - `value`: Any JSON value
/// - `ttl_ms`: Optional TTL in milliseconds (uses the default if not specified, 0 never expires)
/// - `stale_ttl_ms`: Optional stale deadline in milliseconds from now
/// - `depends_on`: Keys whose deletion must also delete this one
/// - `tags`: Labels for bulk invalidation
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub ttl_ms: Option<u64>,
    #[serde(default)]
    pub stale_ttl_ms: Option<u64>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SetRequest {
    /// Converts the optional fields into write options.
    pub fn options(&self) -> SetOptions {
        SetOptions {
            ttl: self.ttl_ms.map(Duration::from_millis),
            stale_ttl: self.stale_ttl_ms.map(Duration::from_millis),
            depends_on: self.depends_on.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// Query string for GET /keys
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysQuery {
    /// Glob with `*` and `?` wildcards
    pub pattern: Option<String>,
}
