//! Store connection manager.
//!
//! Holds at most one multiplexed connection per process. The handle is
//! created lazily on first use, shared by every caller, and dropped after a
//! connection-level failure so the next call reconnects. There is no retry
//! loop: concurrent callers share one connect attempt, and a failed attempt
//! is reported to all of them.

use hearth_config::RedisConfig;
use hearth_core::{HearthError, HearthResult, UnavailableReason};
use futures::future::{BoxFuture, FutureExt, Shared};
use hearth_resilience::{with_timeout, TimeoutConfig};
use redis::aio::MultiplexedConnection;
use redis::Client;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The store will never be contacted.
    Disabled(UnavailableReason),
    /// Configured but not connected yet, or the last handle was dropped.
    Idle,
    /// A live handle is held.
    Connected,
    /// The handle was released for good.
    Closed,
}

type ConnectAttempt = Shared<BoxFuture<'static, Result<MultiplexedConnection, String>>>;

enum Slot {
    Disabled(UnavailableReason),
    Idle(Client),
    Connecting(Client, ConnectAttempt),
    Connected(Client, MultiplexedConnection),
    Closed,
}

impl Slot {
    fn state(&self) -> ConnectionState {
        match self {
            Self::Disabled(reason) => ConnectionState::Disabled(*reason),
            Self::Idle(_) | Self::Connecting(..) => ConnectionState::Idle,
            Self::Connected(..) => ConnectionState::Connected,
            Self::Closed => ConnectionState::Closed,
        }
    }
}

/// Lazily connected handle to the key-value store.
pub struct StoreConnection {
    slot: RwLock<Slot>,
    disabled: Option<UnavailableReason>,
    timeouts: TimeoutConfig,
}

impl StoreConnection {
    /// Creates a connection manager from configuration without connecting.
    ///
    /// Build phase takes precedence over everything else, then a missing
    /// address, then an address the client cannot parse.
    #[must_use]
    pub fn new(config: &RedisConfig) -> Self {
        let timeouts = TimeoutConfig::new(config.connect_timeout(), config.command_timeout());

        if config.offline {
            info!("Build phase: store connection disabled");
            return Self::disabled_with(UnavailableReason::BuildPhase, timeouts);
        }

        let Some(url) = config.url() else {
            info!("No store address configured: caching disabled");
            return Self::disabled_with(UnavailableReason::Unconfigured, timeouts);
        };

        match Client::open(url) {
            Ok(client) => Self {
                slot: RwLock::new(Slot::Idle(client)),
                disabled: None,
                timeouts,
            },
            Err(e) => {
                warn!(error = %e, "Invalid store address: caching disabled");
                Self::disabled_with(UnavailableReason::InvalidAddress, timeouts)
            }
        }
    }

    /// Creates a manager that never connects.
    #[must_use]
    pub fn disabled(reason: UnavailableReason) -> Self {
        Self::disabled_with(reason, TimeoutConfig::default())
    }

    fn disabled_with(reason: UnavailableReason, timeouts: TimeoutConfig) -> Self {
        Self {
            slot: RwLock::new(Slot::Disabled(reason)),
            disabled: Some(reason),
            timeouts,
        }
    }

    /// Why this manager will never connect, if it won't.
    #[must_use]
    pub const fn disabled_reason(&self) -> Option<UnavailableReason> {
        self.disabled
    }

    /// Timeouts applied to connecting and to each command.
    #[must_use]
    pub const fn timeouts(&self) -> TimeoutConfig {
        self.timeouts
    }

    /// Current state.
    pub async fn state(&self) -> ConnectionState {
        self.slot.read().await.state()
    }

    /// Returns the shared handle, connecting once if needed.
    ///
    /// Callers arriving while an attempt is in flight await that attempt
    /// instead of starting their own, so an unreachable store costs each of
    /// them at most one connect timeout. A failed attempt leaves the manager
    /// idle; the next call tries again.
    pub async fn get_connection(&self) -> HearthResult<MultiplexedConnection> {
        let attempt = {
            let slot = self.slot.read().await;
            match &*slot {
                Slot::Connected(_, handle) => return Ok(handle.clone()),
                Slot::Disabled(reason) => return Err(HearthError::Unavailable(*reason)),
                Slot::Closed => return Err(HearthError::Unavailable(UnavailableReason::Closed)),
                Slot::Connecting(_, attempt) => Some(attempt.clone()),
                Slot::Idle(_) => None,
            }
        };

        let attempt = match attempt {
            Some(attempt) => attempt,
            None => self.start_attempt().await?,
        };

        let outcome = attempt.clone().await;
        self.finish_attempt(&attempt, &outcome).await?;
        outcome.map_err(HearthError::Connection)
    }

    /// Installs a connect attempt, or joins the one another caller installed
    /// while this one waited for the lock.
    async fn start_attempt(&self) -> HearthResult<ConnectAttempt> {
        let mut slot = self.slot.write().await;
        let client = match &*slot {
            Slot::Connected(_, handle) => {
                let handle = handle.clone();
                return Ok(async move { Ok::<_, String>(handle) }.boxed().shared());
            }
            Slot::Disabled(reason) => return Err(HearthError::Unavailable(*reason)),
            Slot::Closed => return Err(HearthError::Unavailable(UnavailableReason::Closed)),
            Slot::Connecting(_, attempt) => return Ok(attempt.clone()),
            Slot::Idle(client) => client.clone(),
        };

        let connecting = client.clone();
        let connect_timeout = self.timeouts.connect_timeout;
        let attempt = async move {
            with_timeout(connect_timeout, "CONNECT", || async move {
                connecting
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(|e| HearthError::Connection(e.to_string()))
            })
            .await
            .map_err(|e| e.to_string())
        }
        .boxed()
        .shared();

        *slot = Slot::Connecting(client, attempt.clone());
        Ok(attempt)
    }

    /// Records the outcome of `attempt` if it is still the current one.
    async fn finish_attempt(
        &self,
        attempt: &ConnectAttempt,
        outcome: &Result<MultiplexedConnection, String>,
    ) -> HearthResult<()> {
        let mut slot = self.slot.write().await;
        let client = match &*slot {
            Slot::Connecting(client, current) if current.ptr_eq(attempt) => client.clone(),
            Slot::Closed => return Err(HearthError::Unavailable(UnavailableReason::Closed)),
            // Another waiter already recorded it
            _ => return Ok(()),
        };

        match outcome {
            Ok(handle) => {
                info!("Connected to store");
                *slot = Slot::Connected(client, handle.clone());
            }
            Err(e) => {
                warn!(error = %e, "Store connection attempt failed");
                *slot = Slot::Idle(client);
            }
        }
        Ok(())
    }

    /// Drops the current handle after a connection-level failure.
    pub async fn reset(&self) {
        let mut slot = self.slot.write().await;
        if let Slot::Connected(client, _) = &*slot {
            let client = client.clone();
            *slot = Slot::Idle(client);
            debug!("Dropped store connection handle");
        }
    }

    /// Releases the handle. Later calls report the store as unavailable.
    ///
    /// Idempotent; a disabled manager stays disabled.
    pub async fn close(&self) {
        let mut slot = self.slot.write().await;
        match &*slot {
            Slot::Disabled(_) | Slot::Closed => {}
            Slot::Idle(_) | Slot::Connecting(..) => *slot = Slot::Closed,
            Slot::Connected(..) => {
                *slot = Slot::Closed;
                info!("Store connection closed");
            }
        }
    }

    /// Liveness check. Never fails; any error reads as unavailable.
    pub async fn is_available(&self) -> bool {
        let Ok(mut conn) = self.get_connection().await else {
            return false;
        };

        let result = with_timeout(self.timeouts.command_timeout, "PING", || async move {
            let reply: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| HearthError::Connection(e.to_string()))?;
            Ok(reply)
        })
        .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Store liveness check failed");
                self.reset().await;
                false
            }
        }
    }
}

impl std::fmt::Debug for StoreConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConnection")
            .field("disabled", &self.disabled)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_unconfigured_is_disabled() {
        let connection = StoreConnection::new(&RedisConfig::default());
        assert_eq!(connection.disabled_reason(), Some(UnavailableReason::Unconfigured));
        assert_eq!(
            connection.state().await,
            ConnectionState::Disabled(UnavailableReason::Unconfigured)
        );
        assert!(matches!(
            connection.get_connection().await,
            Err(HearthError::Unavailable(UnavailableReason::Unconfigured))
        ));
        assert!(!connection.is_available().await);
    }

    #[tokio::test]
    async fn test_build_phase_wins_over_address() {
        let mut config = RedisConfig::with_url("redis://localhost:6379");
        config.offline = true;
        let connection = StoreConnection::new(&config);
        assert_eq!(connection.disabled_reason(), Some(UnavailableReason::BuildPhase));
    }

    #[tokio::test]
    async fn test_invalid_address_is_disabled() {
        let connection = StoreConnection::new(&RedisConfig::with_url("not a url"));
        assert_eq!(connection.disabled_reason(), Some(UnavailableReason::InvalidAddress));
    }

    #[tokio::test]
    async fn test_configured_starts_idle_without_connecting() {
        let connection = StoreConnection::new(&RedisConfig::with_url("redis://127.0.0.1:1"));
        assert_eq!(connection.disabled_reason(), None);
        assert_eq!(connection.state().await, ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_failed_connect_stays_idle() {
        let mut config = RedisConfig::with_url("redis://127.0.0.1:1");
        config.connect_timeout_ms = 200;
        let connection = StoreConnection::new(&config);

        assert!(connection.get_connection().await.is_err());
        assert_eq!(connection.state().await, ConnectionState::Idle);
        assert!(!connection.is_available().await);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_connect_attempt() {
        // Accepts connections and never answers the handshake
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });

        let mut config = RedisConfig::with_url(format!("redis://{addr}"));
        config.connect_timeout_ms = 200;
        let connection = StoreConnection::new(&config);

        let started = Instant::now();
        let results =
            futures::future::join_all((0..10).map(|_| connection.get_connection())).await;
        let elapsed = started.elapsed();

        assert!(results.iter().all(Result::is_err));
        assert!(elapsed < Duration::from_millis(600), "callers waited {elapsed:?}");
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(connection.state().await, ConnectionState::Idle);
        server.abort();
    }

    #[tokio::test]
    async fn test_close_is_terminal_and_idempotent() {
        let connection = StoreConnection::new(&RedisConfig::with_url("redis://127.0.0.1:1"));
        connection.close().await;
        connection.close().await;

        assert_eq!(connection.state().await, ConnectionState::Closed);
        assert!(matches!(
            connection.get_connection().await,
            Err(HearthError::Unavailable(UnavailableReason::Closed))
        ));
    }

    #[tokio::test]
    async fn test_timeouts_from_config() {
        let connection = StoreConnection::new(&RedisConfig::default());
        assert_eq!(connection.timeouts().connect_timeout, Duration::from_secs(2));
        assert_eq!(connection.timeouts().command_timeout, Duration::from_secs(1));
    }
}
