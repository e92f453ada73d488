//! Common test infrastructure for store integration tests.

use hearth_cache::{SafeCache, StoreConnection};
use hearth_config::{CacheConfig, RedisConfig};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::redis::Redis;

/// Test store container wrapper.
///
/// Manages a Redis testcontainer lifecycle and hands out connections to it.
pub struct TestStore {
    _container: ContainerAsync<Redis>,
    url: String,
}

impl TestStore {
    /// Starts a fresh Redis container and waits until it answers a ping.
    pub async fn new() -> Self {
        let container = Redis::default()
            .start()
            .await
            .expect("Failed to start Redis container");

        let port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get Redis port");

        let store = Self {
            _container: container,
            url: format!("redis://127.0.0.1:{port}"),
        };
        store.wait_until_ready(30).await;
        store
    }

    /// Store configuration pointing at the container.
    pub fn config(&self) -> RedisConfig {
        RedisConfig::with_url(self.url.clone())
    }

    /// A new connection manager for the container.
    pub fn connection(&self) -> Arc<StoreConnection> {
        Arc::new(StoreConnection::new(&self.config()))
    }

    /// A cache facade over a new connection manager.
    pub fn cache(&self) -> SafeCache {
        SafeCache::new(self.connection(), &CacheConfig::default())
    }

    async fn wait_until_ready(&self, max_attempts: u32) {
        let connection = self.connection();
        for attempt in 1..=max_attempts {
            if connection.is_available().await {
                return;
            }
            eprintln!("Redis not ready (attempt {attempt}/{max_attempts})");
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        panic!("Redis did not become ready after {max_attempts} attempts");
    }
}
