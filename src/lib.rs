//! cachegraph - An in-process cache engine
//!
//! Keyed JSON values with TTL and stale-while-revalidate reads, dependency
//! invalidation, tags and groups, pluggable eviction, optional compression
//! and partitioning, and a circuit breaker around value loaders. An admin
//! HTTP surface is provided for inspection.

pub mod api;
pub mod breaker;
pub mod cache;
pub mod compression;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod namespace;
pub mod partition;
pub mod persistence;
pub mod tasks;

pub use api::AppState;
pub use cache::{Cache, SetOptions};
pub use config::{CacheConfig, ServerConfig};
pub use error::{CacheError, Result};
pub use events::{CacheEvent, EventKind};
pub use namespace::CacheRegistry;
