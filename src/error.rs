//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key is empty or exceeds the maximum length
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Serialized value exceeds the maximum size
    #[error("Value too large: {size} bytes (max {max})")]
    ValueTooLarge { size: usize, max: usize },

    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// The loader supplied to a compute operation failed
    #[error("Loader failed for key '{key}': {source}")]
    Loader {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// The circuit breaker rejected the call without running the loader
    #[error("Circuit breaker open, retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    /// Value could not be serialized or deserialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression codec failure
    #[error("Compression error: {0}")]
    Compression(String),

    /// Group does not exist
    #[error("Group not found: {0}")]
    GroupNotFound(String),

    /// Group name already registered
    #[error("Group already exists: {0}")]
    GroupExists(String),

    /// Key pattern could not be compiled
    #[error("Invalid key pattern: {0}")]
    InvalidPattern(String),

    /// Internal engine error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Wraps a loader failure for `key`.
    pub fn loader(key: impl Into<String>, source: anyhow::Error) -> Self {
        CacheError::Loader {
            key: key.into(),
            source,
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) | CacheError::GroupNotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidKey(_)
            | CacheError::ValueTooLarge { .. }
            | CacheError::InvalidPattern(_)
            | CacheError::Serialization(_) => StatusCode::BAD_REQUEST,
            CacheError::GroupExists(_) => StatusCode::CONFLICT,
            CacheError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Loader { .. } => StatusCode::BAD_GATEWAY,
            CacheError::Compression(_) | CacheError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
