//! API Module
//!
//! Admin HTTP surface over a single cache instance.
//!
//! # Endpoints
//! - `PUT /set` - Store a JSON value with options
//! - `GET /get/:key` - Retrieve a value by key
//! - `DELETE /del/:key` - Delete a key and its dependents
//! - `POST /invalidate/tag/:tag` - Delete every key carrying a tag
//! - `GET /keys` - List keys, optionally filtered by `?pattern=`
//! - `GET /stats` - Aggregate statistics
//! - `GET /partitions` - Per-partition counters
//! - `GET /breaker` - Circuit breaker state
//! - `GET /health` - Health report

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
