//! Response DTOs for the admin API
//!
//! Defines the structure of outgoing HTTP response bodies. Statistics are
//! served as [`crate::cache::StatsSnapshot`] directly.

use serde::Serialize;
use serde_json::Value;

use crate::breaker::{BreakerMode, BreakerSnapshot};
use crate::cache::{HealthReport, HealthStatus};
use crate::partition::PartitionInfo;

/// Response body for the GET operation (GET /get/:key)
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    /// The requested key
    pub key: String,
    /// The stored value
    pub value: Value,
}

impl GetResponse {
    /// Creates a new GetResponse
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Response body for the SET operation (PUT /set)
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    /// The key that was set
    pub key: String,
}

impl SetResponse {
    /// Creates a new SetResponse
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
        }
    }
}

/// Response body for the DELETE operation (DELETE /del/:key)
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The key that was deleted
    pub key: String,
    /// Every removed key, cascaded dependents included
    pub removed: Vec<String>,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>, removed: Vec<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
            removed,
        }
    }
}

/// Response body for POST /invalidate/tag/:tag
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    pub tag: String,
    pub removed: Vec<String>,
}

/// Response body for GET /keys
#[derive(Debug, Clone, Serialize)]
pub struct KeysResponse {
    pub count: usize,
    pub keys: Vec<String>,
}

impl KeysResponse {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            count: keys.len(),
            keys,
        }
    }
}

/// Response body for GET /partitions
#[derive(Debug, Clone, Serialize)]
pub struct PartitionsResponse {
    pub enabled: bool,
    pub balanced: bool,
    pub partitions: Vec<PartitionInfo>,
}

/// Response body for GET /breaker
#[derive(Debug, Clone, Serialize)]
pub struct BreakerResponse {
    pub enabled: bool,
    #[serde(flatten)]
    pub state: Option<BreakerSnapshot>,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub namespace: String,
    pub issues: Vec<String>,
    pub breaker: Option<BreakerMode>,
    pub total_entries: usize,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Builds the response from an engine health report, stamped now
    pub fn from_report(namespace: impl Into<String>, report: HealthReport) -> Self {
        Self {
            status: report.status,
            namespace: namespace.into(),
            issues: report.issues,
            breaker: report.breaker,
            total_entries: report.stats.total_entries,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
