//! Infrastructure broadcast store implementations.
//!
//! The `BroadcastStore` abstraction and its in-memory version live in `loglens-events`.
//! This module provides infrastructure-backed implementations (e.g. Redis).

#[cfg(feature = "redis")]
pub mod redis_broadcast;

#[cfg(feature = "redis")]
pub use redis_broadcast::RedisBroadcastStore;
