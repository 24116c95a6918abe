//! Background Tasks Module
//!
//! Work the engine runs off the caller's path.
//!
//! # Tasks
//! - TTL Sweep: removes expired entries at the configured interval
//! - Stale Refresh: reloads a value served from its stale window
//! - Persistence: applies store changes to the adapter in order

mod persist;
mod refresh;
mod sweeper;

pub(crate) use persist::spawn_persist_task;
pub use refresh::RefreshTask;
pub use sweeper::spawn_sweep_task;
