//! # Hearth Cache
//!
//! Redis-backed caching and rate limiting for Hearth.
//!
//! - [`StoreConnection`]: lazily connected, single shared store handle
//! - [`CacheService`]: typed JSON cache over a [`CacheBackend`]
//! - [`SafeCache`]: facade that degrades to no-ops without a store
//! - [`keys`]: the key namespace and TTL tiers
//! - [`CacheInvalidator`]: entity-level fan-out invalidation
//! - [`RateLimiter`]: fixed-window and sliding-window limits
//!
//! The application never sees a store error: every operation on the facade,
//! the invalidator and the limiter resolves to a safe default when the store
//! is missing or failing.

pub mod backend;
pub mod connection;
pub mod invalidation;
pub mod keys;
pub mod rate_limit;
pub mod redis_store;
pub mod safe;
pub mod service;

#[cfg(any(test, feature = "testing"))]
pub mod memory;

pub use backend::{CacheBackend, KeyTtl, LogWindow, StoreStats};
pub use connection::{ConnectionState, StoreConnection};
pub use invalidation::{CacheInvalidator, FanOut};
pub use rate_limit::{RateLimitDecision, RateLimitPolicy, RateLimiter};
pub use redis_store::RedisBackend;
pub use safe::SafeCache;
pub use service::{CacheEntry, CacheService};

#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryBackend;
