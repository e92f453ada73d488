//! Safe cache facade.
//!
//! The single entry point the application depends on. When the store is
//! unconfigured, in a build phase or has an unusable address, the facade
//! holds no service at all and every operation short-circuits to its safe
//! default without touching the connection manager.

use crate::backend::{CacheBackend, StoreStats};
use crate::connection::StoreConnection;
use crate::redis_store::RedisBackend;
use crate::service::{CacheEntry, CacheService};
use hearth_config::CacheConfig;
use hearth_core::UnavailableReason;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Cache facade that never fails and works without a store.
#[derive(Clone, Debug)]
pub struct SafeCache {
    inner: Option<CacheService>,
    disabled: Option<UnavailableReason>,
}

impl SafeCache {
    /// Builds the facade over a connection manager.
    #[must_use]
    pub fn new(connection: Arc<StoreConnection>, config: &CacheConfig) -> Self {
        if let Some(reason) = connection.disabled_reason() {
            info!(reason = %reason, "Cache disabled");
            return Self::disabled(reason);
        }
        let backend: Arc<dyn CacheBackend> = Arc::new(RedisBackend::new(connection));
        Self::from_backend(backend, config)
    }

    /// Builds the facade over an arbitrary backend.
    #[must_use]
    pub fn from_backend(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            inner: Some(CacheService::new(backend, config)),
            disabled: None,
        }
    }

    /// A facade that never caches.
    #[must_use]
    pub const fn disabled(reason: UnavailableReason) -> Self {
        Self {
            inner: None,
            disabled: Some(reason),
        }
    }

    /// Whether a store backend is attached.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Why caching is off, when it is.
    #[must_use]
    pub const fn disabled_reason(&self) -> Option<UnavailableReason> {
        self.disabled
    }

    /// The attached service, if any.
    #[must_use]
    pub const fn service(&self) -> Option<&CacheService> {
        self.inner.as_ref()
    }

    /// The attached backend, if any.
    #[must_use]
    pub fn backend(&self) -> Option<Arc<dyn CacheBackend>> {
        self.inner.as_ref().map(CacheService::backend)
    }

    /// Reads a value. `None` without a store.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match &self.inner {
            Some(cache) => cache.get(key).await,
            None => None,
        }
    }

    /// Reads a value, computing and storing it on a miss. Without a store
    /// the fallback runs directly.
    pub async fn get_or_else<T, F, Fut>(&self, key: &str, ttl: Option<Duration>, fallback: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match &self.inner {
            Some(cache) => cache.get_or_else(key, ttl, fallback).await,
            None => fallback().await,
        }
    }

    /// Fallible variant of [`get_or_else`](Self::get_or_else).
    pub async fn try_get_or_else<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fallback: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match &self.inner {
            Some(cache) => cache.try_get_or_else(key, ttl, fallback).await,
            None => fallback().await,
        }
    }

    /// Writes a value with `ttl`, or the default TTL.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        match &self.inner {
            Some(cache) => cache.set(key, value, ttl).await,
            None => false,
        }
    }

    /// Writes a value without expiry.
    pub async fn set_permanent<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        match &self.inner {
            Some(cache) => cache.set_permanent(key, value).await,
            None => false,
        }
    }

    /// Deletes one key.
    pub async fn del(&self, key: &str) -> u64 {
        match &self.inner {
            Some(cache) => cache.del(key).await,
            None => 0,
        }
    }

    /// Deletes many keys in one round trip.
    pub async fn del_many<S: AsRef<str>>(&self, keys: &[S]) -> u64 {
        match &self.inner {
            Some(cache) => cache.del_many(keys).await,
            None => 0,
        }
    }

    /// Deletes every key matching a glob pattern.
    pub async fn del_pattern(&self, pattern: &str) -> u64 {
        match &self.inner {
            Some(cache) => cache.del_pattern(pattern).await,
            None => 0,
        }
    }

    /// Increments a counter.
    pub async fn incr(&self, key: &str, ttl: Option<Duration>) -> i64 {
        match &self.inner {
            Some(cache) => cache.incr(key, ttl).await,
            None => 0,
        }
    }

    /// Decrements a counter.
    pub async fn decr(&self, key: &str) -> i64 {
        match &self.inner {
            Some(cache) => cache.decr(key).await,
            None => 0,
        }
    }

    /// Checks whether a key exists.
    pub async fn exists(&self, key: &str) -> bool {
        match &self.inner {
            Some(cache) => cache.exists(key).await,
            None => false,
        }
    }

    /// Remaining lifetime in seconds, `-1` missing, `-2` no expiry.
    pub async fn ttl(&self, key: &str) -> i64 {
        match &self.inner {
            Some(cache) => cache.ttl(key).await,
            None => -1,
        }
    }

    /// Sets a key's expiry.
    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        match &self.inner {
            Some(cache) => cache.expire(key, ttl).await,
            None => false,
        }
    }

    /// Reads many values.
    pub async fn mget<T: DeserializeOwned, S: AsRef<str>>(&self, keys: &[S]) -> Vec<Option<T>> {
        match &self.inner {
            Some(cache) => cache.mget(keys).await,
            None => keys.iter().map(|_| None).collect(),
        }
    }

    /// Writes many values.
    pub async fn mset<T: Serialize>(&self, entries: &[CacheEntry<T>]) -> bool {
        match &self.inner {
            Some(cache) => cache.mset(entries).await,
            None => false,
        }
    }

    /// Wipes the store database.
    pub async fn flush_all(&self) -> bool {
        match &self.inner {
            Some(cache) => cache.flush_all().await,
            None => false,
        }
    }

    /// Aggregate statistics, zeroed without a store.
    pub async fn stats(&self) -> StoreStats {
        match &self.inner {
            Some(cache) => cache.stats().await,
            None => StoreStats::empty(),
        }
    }

    /// Whether the store answers a ping.
    pub async fn is_available(&self) -> bool {
        match &self.inner {
            Some(cache) => cache.ping().await,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;
    use crate::memory::MemoryBackend;
    use hearth_config::RedisConfig;

    fn unconfigured() -> SafeCache {
        let connection = Arc::new(StoreConnection::new(&RedisConfig::default()));
        SafeCache::new(connection, &CacheConfig::default())
    }

    #[tokio::test]
    async fn test_unconfigured_store_disables_cache() {
        let cache = unconfigured();
        assert!(!cache.is_enabled());
        assert_eq!(cache.disabled_reason(), Some(UnavailableReason::Unconfigured));
        assert!(cache.backend().is_none());
    }

    #[tokio::test]
    async fn test_build_phase_disables_cache() {
        let mut config = RedisConfig::with_url("redis://localhost:6379");
        config.offline = true;
        let cache = SafeCache::new(Arc::new(StoreConnection::new(&config)), &CacheConfig::default());
        assert_eq!(cache.disabled_reason(), Some(UnavailableReason::BuildPhase));
    }

    #[tokio::test]
    async fn test_every_operation_has_a_safe_default() {
        let cache = unconfigured();

        let value = cache.get_or_else("listing:1", None, || async { 42_u32 }).await;
        assert_eq!(value, 42);
        let value: Result<u32, ()> = cache.try_get_or_else("listing:1", None, || async { Ok(7) }).await;
        assert_eq!(value, Ok(7));

        assert_eq!(cache.get::<u32>("listing:1").await, None);
        assert!(!cache.set("listing:1", &1, None).await);
        assert!(!cache.set_permanent(&keys::amenities(), &1).await);
        assert_eq!(cache.del("listing:1").await, 0);
        assert_eq!(cache.del_many(&["a", "b"]).await, 0);
        assert_eq!(cache.del_pattern("listings:*").await, 0);
        assert_eq!(cache.incr("n", None).await, 0);
        assert_eq!(cache.decr("n").await, 0);
        assert!(!cache.exists("n").await);
        assert_eq!(cache.ttl("n").await, -1);
        assert!(!cache.expire("n", Duration::from_secs(1)).await);
        assert_eq!(cache.mget::<u32, _>(&["a", "b"]).await, vec![None, None]);
        assert!(!cache.mset(&[CacheEntry::new("a", 1)]).await);
        assert!(!cache.flush_all().await);
        assert_eq!(cache.stats().await, StoreStats::empty());
        assert!(!cache.is_available().await);
    }

    #[tokio::test]
    async fn test_unreachable_store_degrades() {
        let mut config = RedisConfig::with_url("redis://127.0.0.1:1");
        config.connect_timeout_ms = 200;
        let cache = SafeCache::new(Arc::new(StoreConnection::new(&config)), &CacheConfig::default());
        assert!(cache.is_enabled());

        let value = cache.get_or_else("listing:1", None, || async { "fresh".to_string() }).await;
        assert_eq!(value, "fresh");
        assert!(!cache.is_available().await);
    }

    #[tokio::test]
    async fn test_delegates_to_backend() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = SafeCache::from_backend(backend.clone(), &CacheConfig::default());

        assert!(cache.set(&keys::user(1), &"alice", None).await);
        assert_eq!(cache.get::<String>(&keys::user(1)).await.as_deref(), Some("alice"));
        assert!(cache.is_available().await);
        assert_eq!(backend.len(), 1);
    }
}
