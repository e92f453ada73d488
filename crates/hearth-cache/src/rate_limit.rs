//! Distributed rate limiting.
//!
//! Two algorithms keyed per (client, resource):
//!
//! - **Fixed window**: one counter per window, created with the window as
//!   expiry and incremented in the same transaction. Cheap, but a client can
//!   get up to twice the limit across a window boundary.
//! - **Sliding window log**: a timestamped log pruned and appended by one
//!   server-side script. Admits exactly `limit` requests in any trailing
//!   window, at the cost of a script call per request.
//!
//! Store failures never block traffic. A failed sliding-window script falls
//! back to the fixed-window counter; when that fails as well, checks fail
//! open, or fall back to an in-process limiter when configured to.

use crate::backend::{CacheBackend, KeyTtl};
use crate::keys;
use crate::safe::SafeCache;
use chrono::Utc;
use hearth_config::{RateLimitAlgorithm, RateLimitConfig};
use hearth_resilience::LocalRateLimiter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the window frees up again, in epoch milliseconds.
    pub reset_at_epoch_ms: i64,
}

impl RateLimitDecision {
    fn open(limit: u32, window: Duration, now: i64) -> Self {
        Self {
            allowed: true,
            remaining: limit,
            reset_at_epoch_ms: now.saturating_add(duration_ms(window)),
        }
    }

    /// Whole seconds until the reset time, at least one.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        let wait_ms = self.reset_at_epoch_ms.saturating_sub(now_ms()).max(0);
        u64::try_from(wait_ms.saturating_add(999) / 1_000)
            .unwrap_or(1)
            .max(1)
    }
}

/// Algorithm, limit and window applied to a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Counting algorithm.
    pub algorithm: RateLimitAlgorithm,
    /// Requests admitted per window.
    pub limit: u32,
    /// Window length.
    pub window: Duration,
}

impl RateLimitPolicy {
    /// Fixed-window policy.
    #[must_use]
    pub const fn fixed_window(limit: u32, window: Duration) -> Self {
        Self {
            algorithm: RateLimitAlgorithm::FixedWindow,
            limit,
            window,
        }
    }

    /// Sliding-window policy.
    #[must_use]
    pub const fn sliding_window(limit: u32, window: Duration) -> Self {
        Self {
            algorithm: RateLimitAlgorithm::SlidingWindow,
            limit,
            window,
        }
    }
}

impl From<&RateLimitConfig> for RateLimitPolicy {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            algorithm: config.algorithm,
            limit: config.limit,
            window: config.window(),
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn remaining(limit: u32, count: u64) -> u32 {
    u32::try_from(u64::from(limit).saturating_sub(count)).unwrap_or(0)
}

/// Rate limiter sharing the cache's store backend.
#[derive(Clone)]
pub struct RateLimiter {
    backend: Option<Arc<dyn CacheBackend>>,
    local: Option<Arc<LocalRateLimiter>>,
    default_policy: RateLimitPolicy,
}

impl RateLimiter {
    /// Creates a limiter over the cache's backend.
    #[must_use]
    pub fn new(cache: &SafeCache, config: &RateLimitConfig) -> Self {
        Self {
            backend: cache.backend(),
            local: config
                .local_fallback
                .then(|| Arc::new(LocalRateLimiter::new())),
            default_policy: RateLimitPolicy::from(config),
        }
    }

    /// Policy used by [`check_default`](Self::check_default).
    #[must_use]
    pub const fn default_policy(&self) -> &RateLimitPolicy {
        &self.default_policy
    }

    /// Checks a request against the configured default policy.
    pub async fn check_default(&self, client: &str, resource: &str) -> RateLimitDecision {
        let policy = self.default_policy;
        self.check(client, resource, &policy).await
    }

    /// Checks a request against `policy`.
    pub async fn check(
        &self,
        client: &str,
        resource: &str,
        policy: &RateLimitPolicy,
    ) -> RateLimitDecision {
        match policy.algorithm {
            RateLimitAlgorithm::FixedWindow => {
                self.check_fixed_window(client, resource, policy.limit, policy.window)
                    .await
            }
            RateLimitAlgorithm::SlidingWindow => {
                self.check_sliding_window(client, resource, policy.limit, policy.window)
                    .await
            }
        }
    }

    /// Fixed-window check. Admits while the window's count is at most `limit`.
    pub async fn check_fixed_window(
        &self,
        client: &str,
        resource: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitDecision {
        let key = keys::rate_limit(client, resource);
        let Some(backend) = &self.backend else {
            return self.degraded(&key, limit, window);
        };

        match backend.window_incr(&key, window).await {
            Ok((count, window_left)) => {
                let count = u64::try_from(count).unwrap_or(0);
                let decision = RateLimitDecision {
                    allowed: count <= u64::from(limit),
                    remaining: remaining(limit, count),
                    reset_at_epoch_ms: now_ms().saturating_add(duration_ms(window_left)),
                };
                if !decision.allowed {
                    debug!(key = %key, count, limit, "Rate limit exceeded");
                }
                decision
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Rate limit check failed");
                self.degraded(&key, limit, window)
            }
        }
    }

    /// Sliding-window check. Rejected requests are not logged, so a client
    /// hammering a closed window does not extend it. If the script fails the
    /// fixed-window counter decides instead.
    pub async fn check_sliding_window(
        &self,
        client: &str,
        resource: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitDecision {
        let key = keys::rate_limit_log(client, resource);
        let Some(backend) = &self.backend else {
            return self.degraded(&key, limit, window);
        };

        let now = now_ms();
        let window_ms = duration_ms(window);
        let token = format!("{}-{}", now, Uuid::new_v4());

        match backend
            .log_admit(&key, now, window_ms, u64::from(limit), &token)
            .await
        {
            Ok((admitted, log)) => {
                let oldest = log.oldest_ms.unwrap_or(now);
                if !admitted {
                    debug!(key = %key, count = log.count, limit, "Rate limit exceeded");
                }
                RateLimitDecision {
                    allowed: admitted,
                    remaining: remaining(limit, log.count),
                    reset_at_epoch_ms: oldest.saturating_add(window_ms),
                }
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Sliding rate limit check failed, using fixed window");
                self.check_fixed_window(client, resource, limit, window).await
            }
        }
    }

    fn degraded(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision {
        let now = now_ms();
        let Some(local) = &self.local else {
            return RateLimitDecision::open(limit, window, now);
        };

        let decision = local.check(key, limit, window);
        let wait = if decision.allowed {
            window
        } else {
            decision.retry_after
        };
        RateLimitDecision {
            allowed: decision.allowed,
            remaining: decision.remaining,
            reset_at_epoch_ms: now.saturating_add(duration_ms(wait)),
        }
    }

    /// Deletes the limiter state of both algorithms for a (client, resource)
    /// pair. Returns whether the store accepted the delete.
    pub async fn reset(&self, client: &str, resource: &str) -> bool {
        let Some(backend) = &self.backend else {
            return false;
        };
        let keys = [
            keys::rate_limit(client, resource),
            keys::rate_limit_log(client, resource),
        ];
        match backend.del(&keys).await {
            Ok(_) => {
                debug!(client = %client, resource = %resource, "Rate limit reset");
                true
            }
            Err(e) => {
                warn!(client = %client, resource = %resource, error = %e, "Rate limit reset failed");
                false
            }
        }
    }

    /// Reports current usage without counting a request.
    ///
    /// The fixed-window counter is reported when present, otherwise the
    /// sliding log measured over the default policy's window.
    pub async fn info(&self, client: &str, resource: &str, limit: u32) -> RateLimitDecision {
        let window = self.default_policy.window;
        let now = now_ms();
        let Some(backend) = &self.backend else {
            return RateLimitDecision::open(limit, window, now);
        };

        match self.read_usage(backend.as_ref(), client, resource, window, now).await {
            Ok((count, reset_at_epoch_ms)) => RateLimitDecision {
                allowed: count < u64::from(limit),
                remaining: remaining(limit, count),
                reset_at_epoch_ms,
            },
            Err(e) => {
                warn!(client = %client, resource = %resource, error = %e, "Rate limit info failed");
                RateLimitDecision::open(limit, window, now)
            }
        }
    }

    async fn read_usage(
        &self,
        backend: &dyn CacheBackend,
        client: &str,
        resource: &str,
        window: Duration,
        now: i64,
    ) -> hearth_core::HearthResult<(u64, i64)> {
        let counter_key = keys::rate_limit(client, resource);
        if let Some(raw) = backend.get(&counter_key).await? {
            let count = raw.parse::<u64>().unwrap_or(0);
            let reset_at = match backend.ttl(&counter_key).await? {
                KeyTtl::Expires(left) => now.saturating_add(duration_ms(left)),
                KeyTtl::Missing | KeyTtl::Persistent => now,
            };
            return Ok((count, reset_at));
        }

        let window_ms = duration_ms(window);
        let log = backend
            .log_window(&keys::rate_limit_log(client, resource), now, window_ms)
            .await?;
        let reset_at = log.oldest_ms.map_or(now, |oldest| oldest.saturating_add(window_ms));
        Ok((log.count, reset_at))
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("store", &self.backend.is_some())
            .field("local_fallback", &self.local.is_some())
            .field("default_policy", &self.default_policy)
            .finish()
    }
}
