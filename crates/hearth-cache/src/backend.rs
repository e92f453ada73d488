//! Store backend trait.
//!
//! The primitive command set the cache service, invalidation and rate limiter
//! are written against. Every operation may fail; callers one layer up turn
//! failures into safe defaults.

use async_trait::async_trait;
use hearth_core::HearthResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist.
    Missing,
    /// The key exists and never expires.
    Persistent,
    /// The key expires after the given duration.
    Expires(Duration),
}

impl KeyTtl {
    /// Whole seconds remaining, rounded up, with `-1` for a missing key and
    /// `-2` for a key without expiry.
    #[must_use]
    pub fn as_secs(&self) -> i64 {
        match self {
            Self::Missing => -1,
            Self::Persistent => -2,
            Self::Expires(remaining) => {
                let millis = i64::try_from(remaining.as_millis()).unwrap_or(i64::MAX);
                millis.saturating_add(999) / 1_000
            }
        }
    }

    /// Builds a value from a `PTTL` reply.
    #[must_use]
    pub fn from_pttl(pttl: i64) -> Self {
        match pttl {
            -2 => Self::Missing,
            -1 => Self::Persistent,
            ms => Self::Expires(Duration::from_millis(u64::try_from(ms).unwrap_or(0))),
        }
    }
}

/// Aggregate store statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Number of keys in the selected database.
    pub key_count: u64,
    /// Human-readable memory usage as reported by the store.
    pub memory_used: String,
    /// Successful key lookups since the store started.
    pub hit_count: u64,
    /// Failed key lookups since the store started.
    pub miss_count: u64,
}

impl StoreStats {
    /// Zeroed statistics, reported when the store cannot be queried.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            memory_used: "0B".to_string(),
            ..Self::default()
        }
    }
}

/// Sliding log contents inside the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogWindow {
    /// Entries inside the window.
    pub count: u64,
    /// Timestamp of the oldest entry inside the window, in epoch ms.
    pub oldest_ms: Option<i64>,
}

/// Primitive operations against the key-value store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Reads a string value.
    async fn get(&self, key: &str) -> HearthResult<Option<String>>;

    /// Writes a string value. `None` stores it without expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> HearthResult<()>;

    /// Deletes keys in one round trip, returning how many existed.
    async fn del(&self, keys: &[String]) -> HearthResult<u64>;

    /// One cursor step of a pattern scan. A returned cursor of `0` ends the scan.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize)
        -> HearthResult<(u64, Vec<String>)>;

    /// Adds `delta` to a counter, attaching `ttl` in the same transaction.
    async fn incr(&self, key: &str, delta: i64, ttl: Option<Duration>) -> HearthResult<i64>;

    /// Checks whether a key exists.
    async fn exists(&self, key: &str) -> HearthResult<bool>;

    /// Reports the remaining lifetime of a key.
    async fn ttl(&self, key: &str) -> HearthResult<KeyTtl>;

    /// Sets a key's expiry. Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> HearthResult<bool>;

    /// Reads many string values in one round trip.
    async fn mget(&self, keys: &[String]) -> HearthResult<Vec<Option<String>>>;

    /// Writes many string values in one pipelined round trip.
    async fn mset(&self, entries: &[(String, String, Option<Duration>)]) -> HearthResult<()>;

    /// Removes every key in the selected database.
    async fn flush(&self) -> HearthResult<()>;

    /// Collects aggregate statistics.
    async fn stats(&self) -> HearthResult<StoreStats>;

    /// Round-trips a no-op command.
    async fn ping(&self) -> HearthResult<()>;

    /// Fixed-window step: creates the counter with `window` expiry when
    /// absent, increments it and reports `(count, remaining window)`, all in
    /// one transaction.
    async fn window_incr(&self, key: &str, window: Duration) -> HearthResult<(i64, Duration)>;

    /// Sliding-log step: prunes entries at or before `now_ms - window_ms`,
    /// then records `token` at `now_ms` only if fewer than `limit` remain.
    /// Returns whether the entry was added and the resulting window.
    async fn log_admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u64,
        token: &str,
    ) -> HearthResult<(bool, LogWindow)>;

    /// Read-only view of the sliding log inside the window ending at `now_ms`.
    async fn log_window(&self, key: &str, now_ms: i64, window_ms: i64) -> HearthResult<LogWindow>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_secs_conventions() {
        assert_eq!(KeyTtl::Missing.as_secs(), -1);
        assert_eq!(KeyTtl::Persistent.as_secs(), -2);
        assert_eq!(KeyTtl::Expires(Duration::from_secs(60)).as_secs(), 60);
        assert_eq!(KeyTtl::Expires(Duration::from_millis(59_001)).as_secs(), 60);
        assert_eq!(KeyTtl::Expires(Duration::from_millis(1)).as_secs(), 1);
    }

    #[test]
    fn test_from_pttl() {
        assert_eq!(KeyTtl::from_pttl(-2), KeyTtl::Missing);
        assert_eq!(KeyTtl::from_pttl(-1), KeyTtl::Persistent);
        assert_eq!(KeyTtl::from_pttl(1_500), KeyTtl::Expires(Duration::from_millis(1_500)));
    }

    #[test]
    fn test_stats_serialize_camel_case() {
        let stats = StoreStats {
            key_count: 3,
            memory_used: "1.2M".to_string(),
            hit_count: 5,
            miss_count: 2,
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["keyCount"], 3);
        assert_eq!(json["memoryUsed"], "1.2M");
        assert_eq!(json["missCount"], 2);
    }
}
