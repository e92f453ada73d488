//! In-process rate limiter.
//!
//! Used in place of the shared store when it is unavailable and the
//! deployment prefers approximate per-process enforcement over admitting
//! every request. Limits are per process, so N replicas admit up to N times
//! the configured limit.

use governor::{
    clock::{Clock, DefaultClock},
    middleware::StateInformationMiddleware,
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter as GovernorRateLimiter,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type KeyedLimiter = GovernorRateLimiter<
    String,
    DefaultKeyedStateStore<String>,
    DefaultClock,
    StateInformationMiddleware,
>;

/// Checks between sweeps of idle keys.
const PRUNE_EVERY: u64 = 1_024;

/// Outcome of a local check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalDecision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Requests left before the limiter starts rejecting.
    pub remaining: u32,
    /// How long until the next request would be admitted. Zero when allowed.
    pub retry_after: Duration,
}

/// Keyed in-process limiter, one GCRA limiter per distinct (limit, window).
pub struct LocalRateLimiter {
    limiters: Mutex<HashMap<(u32, Duration), Arc<KeyedLimiter>>>,
    clock: DefaultClock,
    checks: AtomicU64,
}

impl LocalRateLimiter {
    /// Creates an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            limiters: Mutex::new(HashMap::new()),
            clock: DefaultClock::default(),
            checks: AtomicU64::new(0),
        }
    }

    /// Admits or rejects one request for `key` under `limit` per `window`.
    pub fn check(&self, key: &str, limit: u32, window: Duration) -> LocalDecision {
        let limiter = self.limiter_for(limit, window);

        if self.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune();
        }

        match limiter.check_key(&key.to_string()) {
            Ok(snapshot) => LocalDecision {
                allowed: true,
                remaining: snapshot.remaining_burst_capacity(),
                retry_after: Duration::ZERO,
            },
            Err(not_until) => {
                let retry_after = not_until.wait_time_from(self.clock.now());
                debug!(key = %key, ?retry_after, "Local rate limit exceeded");
                LocalDecision {
                    allowed: false,
                    remaining: 0,
                    retry_after,
                }
            }
        }
    }

    /// Drops state for keys whose limits have fully replenished.
    pub fn prune(&self) {
        let limiters: Vec<Arc<KeyedLimiter>> = self.limiters.lock().values().cloned().collect();
        for limiter in limiters {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }

    /// Number of keys currently tracked across all policies.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.limiters.lock().values().map(|limiter| limiter.len()).sum()
    }

    fn limiter_for(&self, limit: u32, window: Duration) -> Arc<KeyedLimiter> {
        let mut limiters = self.limiters.lock();
        Arc::clone(
            limiters
                .entry((limit, window))
                .or_insert_with(|| Arc::new(build_limiter(limit, window))),
        )
    }
}

impl Default for LocalRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRateLimiter").finish_non_exhaustive()
    }
}

fn build_limiter(limit: u32, window: Duration) -> KeyedLimiter {
    let burst = NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::with_period(window / burst.get())
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst);
    GovernorRateLimiter::keyed(quota).with_middleware::<StateInformationMiddleware>()
}
