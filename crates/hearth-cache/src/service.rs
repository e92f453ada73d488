//! Cache service.
//!
//! Typed read/write/delete/counter API over a [`CacheBackend`]. Every
//! public operation is total: store failures are logged and turned into the
//! documented safe default, and a `get` with a fallback still produces a
//! value, computed without caching.

use crate::backend::{CacheBackend, StoreStats};
use futures::{Stream, StreamExt};
use hearth_config::CacheConfig;
use hearth_core::{HearthError, HearthResult};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// One entry of a batched write.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    /// Target key.
    pub key: String,
    /// Value to serialize.
    pub value: T,
    /// Expiry; `None` applies the default TTL.
    pub ttl: Option<Duration>,
}

impl<T> CacheEntry<T> {
    /// Creates an entry that will receive the default TTL.
    pub fn new(key: impl Into<String>, value: T) -> Self {
        Self {
            key: key.into(),
            value,
            ttl: None,
        }
    }

    /// Sets an explicit TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

enum Lookup<T> {
    Hit(T),
    Miss,
    Failed,
}

/// Per-key async locks serialising fallbacks within this process.
#[derive(Default)]
struct SingleFlight {
    inflight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

struct FlightPermit {
    flights: Arc<SingleFlight>,
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl SingleFlight {
    async fn acquire(self: &Arc<Self>, key: &str) -> FlightPermit {
        let lock = Arc::clone(self.inflight.lock().entry(key.to_string()).or_default());
        let guard = lock.lock_owned().await;
        FlightPermit {
            flights: Arc::clone(self),
            key: key.to_string(),
            _guard: guard,
        }
    }
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        let mut inflight = self.flights.inflight.lock();
        // Map entry plus our guard: nobody else is waiting on this key
        if inflight
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            inflight.remove(&self.key);
        }
    }
}

/// Typed cache API over a store backend.
#[derive(Clone)]
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Duration,
    scan_batch_size: usize,
    flights: Option<Arc<SingleFlight>>,
}

impl CacheService {
    /// Creates a service over the given backend.
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            default_ttl: config.default_ttl(),
            scan_batch_size: config.scan_batch_size.max(1),
            flights: config.single_flight.then(|| Arc::new(SingleFlight::default())),
        }
    }

    /// The underlying backend, shared with the rate limiter.
    #[must_use]
    pub fn backend(&self) -> Arc<dyn CacheBackend> {
        Arc::clone(&self.backend)
    }

    /// TTL applied when a write does not name one.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Lookup<T> {
        match self.backend.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    debug!(key = %key, "Cache hit");
                    Lookup::Hit(value)
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Corrupted cache entry, evicting");
                    if let Err(e) = self.backend.del(&[key.to_string()]).await {
                        warn!(key = %key, error = %e, "Failed to evict corrupted entry");
                    }
                    Lookup::Miss
                }
            },
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                Lookup::Miss
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed");
                Lookup::Failed
            }
        }
    }

    /// Reads and deserializes a value. Misses, failures and corrupted
    /// entries all read as `None`; corrupted entries are deleted.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.lookup(key).await {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss | Lookup::Failed => None,
        }
    }

    /// Reads a value, computing and storing it on a miss.
    ///
    /// When the store fails the fallback still runs but its result is not
    /// written back.
    pub async fn get_or_else<T, F, Fut>(&self, key: &str, ttl: Option<Duration>, fallback: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let result = self
            .try_get_or_else(key, ttl, || async move { Ok::<_, Infallible>(fallback().await) })
            .await;
        match result {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Like [`get_or_else`](Self::get_or_else) for fallible producers.
    /// Producer errors are returned as-is and nothing is cached.
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
        match self.lookup(key).await {
            Lookup::Hit(value) => return Ok(value),
            Lookup::Failed => return fallback().await,
            Lookup::Miss => {}
        }

        let Some(flights) = &self.flights else {
            return self.fill(key, ttl, fallback).await;
        };

        let _permit = flights.acquire(key).await;
        // Whoever held the permit before us may have filled the entry
        match self.lookup(key).await {
            Lookup::Hit(value) => Ok(value),
            Lookup::Miss => self.fill(key, ttl, fallback).await,
            Lookup::Failed => fallback().await,
        }
    }

    async fn fill<T, E, F, Fut>(&self, key: &str, ttl: Option<Duration>, fallback: F) -> Result<T, E>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let value = fallback().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    /// Serializes and writes a value. `None` applies the default TTL.
    /// Returns whether the write reached the store.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        self.write(key, value, Some(ttl.unwrap_or(self.default_ttl))).await
    }

    /// Writes a value without expiry. Reserved for reference data.
    pub async fn set_permanent<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        self.write(key, value, None).await
    }

    async fn write<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize cache value");
                return false;
            }
        };

        match self.backend.set(key, &raw, ttl).await {
            Ok(()) => {
                debug!(key = %key, ttl = ?ttl, "Cached value");
                true
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache write failed");
                false
            }
        }
    }

    /// Deletes one key. Returns how many keys were removed.
    pub async fn del(&self, key: &str) -> u64 {
        self.del_many(&[key]).await
    }

    /// Deletes many keys in one round trip. An empty list is a no-op.
    pub async fn del_many<S: AsRef<str>>(&self, keys: &[S]) -> u64 {
        if keys.is_empty() {
            return 0;
        }
        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();

        match self.backend.del(&keys).await {
            Ok(deleted) => {
                debug!(keys = ?keys, deleted, "Deleted keys");
                deleted
            }
            Err(e) => {
                warn!(keys = ?keys, error = %e, "Cache delete failed");
                0
            }
        }
    }

    /// Streams keys matching `pattern`, one cursor step per item.
    ///
    /// Steps may yield empty batches and, as with any store-side scan, a key
    /// may appear more than once.
    pub fn scan_keys(
        &self,
        pattern: &str,
    ) -> impl Stream<Item = HearthResult<Vec<String>>> + Send + 'static {
        let backend = Arc::clone(&self.backend);
        let pattern = pattern.to_string();
        let count = self.scan_batch_size;

        futures::stream::try_unfold(Some(0_u64), move |cursor| {
            let backend = Arc::clone(&backend);
            let pattern = pattern.clone();
            async move {
                let Some(cursor) = cursor else {
                    return Ok::<_, HearthError>(None);
                };
                let (next, keys) = backend.scan(cursor, &pattern, count).await?;
                let state = (next != 0).then_some(next);
                Ok(Some((keys, state)))
            }
        })
    }

    /// Deletes every key matching a glob pattern, scanning with a cursor and
    /// deleting in chunks of at most the configured batch size.
    ///
    /// Stops at the first failure and returns how many keys were removed
    /// until then. An empty pattern is a no-op.
    pub async fn del_pattern(&self, pattern: &str) -> u64 {
        if pattern.is_empty() {
            return 0;
        }

        let mut batches = std::pin::pin!(self.scan_keys(pattern));
        let mut pending: Vec<String> = Vec::new();
        let mut deleted = 0;

        while let Some(batch) = batches.next().await {
            match batch {
                Ok(keys) => pending.extend(keys),
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Pattern scan failed");
                    return deleted;
                }
            }

            while pending.len() >= self.scan_batch_size {
                let chunk: Vec<String> = pending.drain(..self.scan_batch_size).collect();
                match self.backend.del(&chunk).await {
                    Ok(n) => deleted += n,
                    Err(e) => {
                        warn!(pattern = %pattern, error = %e, "Pattern delete failed");
                        return deleted;
                    }
                }
            }
        }

        if !pending.is_empty() {
            match self.backend.del(&pending).await {
                Ok(n) => deleted += n,
                Err(e) => warn!(pattern = %pattern, error = %e, "Pattern delete failed"),
            }
        }

        if deleted > 0 {
            info!(pattern = %pattern, deleted, "Deleted keys matching pattern");
        }
        deleted
    }

    /// Increments a counter, optionally renewing its expiry in the same
    /// transaction. Returns `0` on failure.
    pub async fn incr(&self, key: &str, ttl: Option<Duration>) -> i64 {
        self.incr_by(key, 1, ttl).await
    }

    /// Decrements a counter. Returns `0` on failure.
    pub async fn decr(&self, key: &str) -> i64 {
        self.incr_by(key, -1, None).await
    }

    /// Adds `delta` to a counter. Returns `0` on failure.
    pub async fn incr_by(&self, key: &str, delta: i64, ttl: Option<Duration>) -> i64 {
        match self.backend.incr(key, delta, ttl).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Counter update failed");
                0
            }
        }
    }

    /// Checks whether a key exists. `false` on failure.
    pub async fn exists(&self, key: &str) -> bool {
        self.backend.exists(key).await.unwrap_or_else(|e| {
            warn!(key = %key, error = %e, "Exists check failed");
            false
        })
    }

    /// Remaining lifetime in seconds, `-1` for a missing key and `-2` for a
    /// key without expiry. Failures read as missing.
    pub async fn ttl(&self, key: &str) -> i64 {
        match self.backend.ttl(key).await {
            Ok(ttl) => ttl.as_secs(),
            Err(e) => {
                warn!(key = %key, error = %e, "TTL lookup failed");
                -1
            }
        }
    }

    /// Sets a key's expiry. `false` when the key is missing or on failure.
    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        self.backend.expire(key, ttl).await.unwrap_or_else(|e| {
            warn!(key = %key, error = %e, "Expire failed");
            false
        })
    }

    /// Reads many values in one round trip. Misses, failures and entries
    /// that do not deserialize read as `None`.
    pub async fn mget<T: DeserializeOwned, S: AsRef<str>>(&self, keys: &[S]) -> Vec<Option<T>> {
        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();

        match self.backend.mget(&keys).await {
            Ok(values) => values
                .into_iter()
                .zip(&keys)
                .map(|(raw, key)| {
                    raw.and_then(|raw| match serde_json::from_str(&raw) {
                        Ok(value) => Some(value),
                        Err(e) => {
                            warn!(key = %key, error = %e, "Corrupted cache entry in batch read");
                            None
                        }
                    })
                })
                .collect(),
            Err(e) => {
                warn!(count = keys.len(), error = %e, "Batch read failed");
                keys.iter().map(|_| None).collect()
            }
        }
    }

    /// Writes many values in one pipelined round trip. Entries without a TTL
    /// receive the default; entries that fail to serialize are skipped.
    pub async fn mset<T: Serialize>(&self, entries: &[CacheEntry<T>]) -> bool {
        let mut batch = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::to_string(&entry.value) {
                Ok(raw) => batch.push((
                    entry.key.clone(),
                    raw,
                    Some(entry.ttl.unwrap_or(self.default_ttl)),
                )),
                Err(e) => warn!(key = %entry.key, error = %e, "Failed to serialize cache value"),
            }
        }

        if batch.is_empty() {
            return entries.is_empty();
        }

        match self.backend.mset(&batch).await {
            Ok(()) => {
                debug!(count = batch.len(), "Cached batch");
                true
            }
            Err(e) => {
                warn!(count = batch.len(), error = %e, "Batch write failed");
                false
            }
        }
    }

    /// Wipes every key in the store database. Test teardown and explicit
    /// admin action only.
    pub async fn flush_all(&self) -> bool {
        match self.backend.flush().await {
            Ok(()) => {
                info!("Cache flushed");
                true
            }
            Err(e) => {
                warn!(error = %e, "Cache flush failed");
                false
            }
        }
    }

    /// Aggregate statistics, zeroed on failure.
    pub async fn stats(&self) -> StoreStats {
        self.backend.stats().await.unwrap_or_else(|e| {
            warn!(error = %e, "Stats collection failed");
            StoreStats::empty()
        })
    }

    /// Whether the store answers a ping.
    pub async fn ping(&self) -> bool {
        match self.backend.ping().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Cache ping failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("default_ttl", &self.default_ttl)
            .field("scan_batch_size", &self.scan_batch_size)
            .field("single_flight", &self.flights.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockCacheBackend;
    use crate::keys;
    use crate::memory::MemoryBackend;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Listing {
        id: u32,
        title: String,
    }

    fn listing(id: u32) -> Listing {
        Listing {
            id,
            title: format!("Cabin {}", id),
        }
    }

    fn service_with(backend: Arc<MemoryBackend>, config: &CacheConfig) -> CacheService {
        CacheService::new(backend, config)
    }

    fn memory_service() -> (Arc<MemoryBackend>, CacheService) {
        let backend = Arc::new(MemoryBackend::new());
        let service = service_with(Arc::clone(&backend), &CacheConfig::default());
        (backend, service)
    }

    fn failing_mock() -> MockCacheBackend {
        let mut mock = MockCacheBackend::new();
        mock.expect_get()
            .returning(|_| Err(HearthError::Connection("refused".to_string())));
        mock.expect_set().never();
        mock
    }

    #[tokio::test]
    async fn test_set_then_get_round_trips() {
        let (_, cache) = memory_service();
        let key = keys::listing(1);

        assert!(cache.set(&key, &listing(1), Some(keys::ttl::SHORT)).await);
        assert_eq!(cache.get::<Listing>(&key).await, Some(listing(1)));
    }

    #[tokio::test]
    async fn test_miss_with_fallback_caches_result() {
        let (_, cache) = memory_service();
        let calls = AtomicUsize::new(0);
        let key = keys::listing(2);

        let value = cache
            .get_or_else(&key, Some(keys::ttl::MEDIUM), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                listing(2)
            })
            .await;
        assert_eq!(value, listing(2));

        assert_eq!(cache.get::<Listing>(&key).await, Some(listing(2)));
        let again = cache
            .get_or_else(&key, None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                listing(99)
            })
            .await;
        assert_eq!(again, listing(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_producer_error_is_not_cached() {
        let (_, cache) = memory_service();
        let key = keys::user(7);

        let result: Result<Listing, &str> =
            cache.try_get_or_else(&key, None, || async { Err("db down") }).await;
        assert_eq!(result, Err("db down"));
        assert!(!cache.exists(&key).await);
    }

    #[tokio::test]
    async fn test_corrupted_entry_is_evicted() {
        let (backend, cache) = memory_service();
        let key = keys::listing(3);
        backend.set(&key, "{not json", None).await.unwrap();

        assert_eq!(cache.get::<Listing>(&key).await, None);
        assert!(!backend.exists(&key).await.unwrap());

        let value = cache.get_or_else(&key, None, || async { listing(3) }).await;
        assert_eq!(value, listing(3));
    }

    #[tokio::test]
    async fn test_store_failure_runs_fallback_without_caching() {
        let cache = CacheService::new(Arc::new(failing_mock()), &CacheConfig::default());

        let value = cache.get_or_else("listing:4", None, || async { listing(4) }).await;
        assert_eq!(value, listing(4));
        assert_eq!(cache.get::<Listing>("listing:4").await, None);
    }

    #[tokio::test]
    async fn test_failures_degrade_to_defaults() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = service_with(Arc::clone(&backend), &CacheConfig::default());
        backend.set_failing(true);

        assert!(!cache.set("k", &1, None).await);
        assert_eq!(cache.del("k").await, 0);
        assert_eq!(cache.del_pattern("k*").await, 0);
        assert_eq!(cache.incr("counter", None).await, 0);
        assert_eq!(cache.decr("counter").await, 0);
        assert!(!cache.exists("k").await);
        assert_eq!(cache.ttl("k").await, -1);
        assert!(!cache.expire("k", Duration::from_secs(1)).await);
        assert_eq!(cache.mget::<u32, _>(&["a", "b"]).await, vec![None, None]);
        assert!(!cache.mset(&[CacheEntry::new("a", 1)]).await);
        assert!(!cache.flush_all().await);
        assert_eq!(cache.stats().await, StoreStats::empty());
        assert!(!cache.ping().await);
    }

    #[tokio::test]
    async fn test_del_removes_key() {
        let (_, cache) = memory_service();
        cache.set("user:1", &"a", None).await;

        assert_eq!(cache.del("user:1").await, 1);
        assert_eq!(cache.get::<String>("user:1").await, None);
        assert_eq!(cache.del_many::<&str>(&[]).await, 0);
    }

    #[tokio::test]
    async fn test_del_pattern_is_selective() {
        let (_, cache) = memory_service();
        cache.set("user:1", &1, None).await;
        cache.set("user:2", &2, None).await;
        cache.set("listing:1", &3, None).await;

        assert_eq!(cache.del_pattern("user:*").await, 2);
        assert!(!cache.exists("user:1").await);
        assert!(!cache.exists("user:2").await);
        assert!(cache.exists("listing:1").await);
    }

    #[tokio::test]
    async fn test_del_pattern_spans_many_batches() {
        let backend = Arc::new(MemoryBackend::new());
        let config = CacheConfig {
            scan_batch_size: 4,
            ..CacheConfig::default()
        };
        let cache = service_with(Arc::clone(&backend), &config);

        for i in 0..23 {
            cache.set(&keys::listings_search(&format!("q{}", i)), &i, None).await;
        }
        cache.set(&keys::listings_all(), &0, None).await;
        cache.set(&keys::amenities(), &0, None).await;

        assert_eq!(cache.del_pattern("listings:*").await, 24);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_counters_are_monotonic() {
        let (_, cache) = memory_service();
        for expected in 1..=5 {
            assert_eq!(cache.incr("views", None).await, expected);
        }
        assert_eq!(cache.decr("views").await, 4);
    }

    #[tokio::test]
    async fn test_incr_attaches_ttl() {
        let (_, cache) = memory_service();
        cache.incr("views", Some(Duration::from_secs(30))).await;
        let ttl = cache.ttl("views").await;
        assert!(ttl > 0 && ttl <= 30);
    }

    #[tokio::test]
    async fn test_ttl_bounds() {
        let (_, cache) = memory_service();
        cache.set("k", &"v", Some(Duration::from_secs(60))).await;
        let ttl = cache.ttl("k").await;
        assert!(ttl > 0 && ttl <= 60);

        assert_eq!(cache.ttl("missing").await, -1);

        cache.set_permanent(&keys::amenities(), &vec!["wifi"]).await;
        assert_eq!(cache.ttl(&keys::amenities()).await, -2);
    }

    #[tokio::test]
    async fn test_set_without_ttl_uses_default() {
        let (_, cache) = memory_service();
        cache.set("k", &"v", None).await;
        let ttl = cache.ttl("k").await;
        assert!(ttl > 3_500 && ttl <= 3_600);
    }

    #[tokio::test]
    async fn test_expire() {
        let (_, cache) = memory_service();
        cache.set_permanent("k", &"v").await;
        assert!(cache.expire("k", Duration::from_secs(10)).await);
        assert!(cache.ttl("k").await <= 10);
        assert!(!cache.expire("missing", Duration::from_secs(10)).await);
    }

    #[tokio::test]
    async fn test_mget_mset() {
        let (backend, cache) = memory_service();
        let entries = vec![
            CacheEntry::new("a", listing(1)),
            CacheEntry::new("b", listing(2)).with_ttl(keys::ttl::SHORT),
        ];
        assert!(cache.mset(&entries).await);
        backend.set("c", "garbage", None).await.unwrap();

        let values = cache.mget::<Listing, _>(&["a", "b", "c", "d"]).await;
        assert_eq!(values, vec![Some(listing(1)), Some(listing(2)), None, None]);

        assert!(cache.ttl("a").await > 3_500);
        assert!(cache.ttl("b").await <= 60);
    }

    #[tokio::test]
    async fn test_flush_all_and_stats() {
        let (_, cache) = memory_service();
        cache.set("a", &1, None).await;
        cache.set("b", &2, None).await;
        let _ = cache.get::<u32>("a").await;
        let _ = cache.get::<u32>("missing").await;

        let stats = cache.stats().await;
        assert_eq!(stats.key_count, 2);
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);

        assert!(cache.flush_all().await);
        assert_eq!(cache.stats().await.key_count, 0);
    }

    #[tokio::test]
    async fn test_single_flight_runs_fallback_once() {
        let (_, cache) = memory_service();
        let calls = AtomicUsize::new(0);

        let fallback = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            listing(5)
        };
        let (a, b) = tokio::join!(
            cache.get_or_else("listing:5", None, fallback),
            cache.get_or_else("listing:5", None, fallback),
        );

        assert_eq!(a, listing(5));
        assert_eq!(b, listing(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_without_single_flight_each_caller_computes() {
        let backend = Arc::new(MemoryBackend::new());
        let config = CacheConfig {
            single_flight: false,
            ..CacheConfig::default()
        };
        let cache = service_with(backend, &config);
        let calls = AtomicUsize::new(0);

        let fallback = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            listing(6)
        };
        let _ = tokio::join!(
            cache.get_or_else("listing:6", None, fallback),
            cache.get_or_else("listing:6", None, fallback),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_scan_keys_streams_batches() {
        let backend = Arc::new(MemoryBackend::new());
        let config = CacheConfig {
            scan_batch_size: 2,
            ..CacheConfig::default()
        };
        let cache = service_with(backend, &config);
        for i in 0..5 {
            cache.set(&keys::user(i), &i, None).await;
        }

        let batches: Vec<Vec<String>> = cache
            .scan_keys("user:*")
            .map(|batch| batch.unwrap())
            .collect()
            .await;

        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() <= 2));
        assert_eq!(batches.concat().len(), 5);
    }
}
