//! Redis implementation of the store backend.

use crate::backend::{CacheBackend, KeyTtl, LogWindow, StoreStats};
use crate::connection::StoreConnection;
use async_trait::async_trait;
use hearth_core::{HearthError, HearthResult};
use hearth_resilience::with_timeout;
use redis::aio::MultiplexedConnection;
use redis::{RedisError, RedisResult, Script, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Prune, count, conditionally append and renew the sliding log in one step.
///
/// Returns `{admitted, count, oldest_ms}` with `oldest_ms = -1` for an empty log.
const LOG_ADMIT_SCRIPT: &str = r"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local admitted = 0
if count < limit then
  redis.call('ZADD', key, now, ARGV[4])
  redis.call('PEXPIRE', key, window)
  count = count + 1
  admitted = 1
end
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_ms = -1
if oldest[2] then
  oldest_ms = tonumber(oldest[2])
end
return {admitted, count, oldest_ms}
";

/// Store backend talking to Redis through the shared connection.
pub struct RedisBackend {
    connection: Arc<StoreConnection>,
    log_admit: Script,
}

impl RedisBackend {
    /// Creates a backend over the given connection manager.
    #[must_use]
    pub fn new(connection: Arc<StoreConnection>) -> Self {
        Self {
            connection,
            log_admit: Script::new(LOG_ADMIT_SCRIPT),
        }
    }

    /// Runs one command with the command timeout, dropping the handle on
    /// connection-level failures.
    async fn run<T, F, Fut>(&self, operation: &'static str, f: F) -> HearthResult<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.connection.get_connection().await?;
        let timeout = self.connection.timeouts().command_timeout;

        let result = with_timeout(timeout, operation, || async move {
            f(conn).await.map_err(|e| map_redis_error(operation, &e))
        })
        .await;

        if let Err(e) = &result {
            if e.is_connection_failure() {
                self.connection.reset().await;
            }
        }

        result
    }
}

fn map_redis_error(operation: &str, e: &RedisError) -> HearthError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
    {
        HearthError::Connection(format!("{} failed: {}", operation, e))
    } else {
        HearthError::Cache(format!("{} failed: {}", operation, e))
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Extracts statistics from an `INFO` reply.
pub(crate) fn parse_info(info: &str, key_count: u64) -> StoreStats {
    let mut stats = StoreStats {
        key_count,
        ..StoreStats::empty()
    };

    for line in info.lines() {
        let Some((field, value)) = line.trim().split_once(':') else {
            continue;
        };
        match field {
            "used_memory_human" => stats.memory_used = value.to_string(),
            "keyspace_hits" => stats.hit_count = value.parse().unwrap_or(0),
            "keyspace_misses" => stats.miss_count = value.parse().unwrap_or(0),
            _ => {}
        }
    }

    stats
}

fn decode<T: redis::FromRedisValue>(operation: &str, reply: &Value) -> HearthResult<T> {
    redis::from_redis_value(reply).map_err(|e| map_redis_error(operation, &e))
}

/// Decodes a `PTTL` reply.
pub(crate) fn decode_pttl(reply: &Value) -> HearthResult<KeyTtl> {
    decode("PTTL", reply).map(KeyTtl::from_pttl)
}

/// Decodes the `[count, pttl]` reply of the fixed-window transaction. A
/// counter without expiry reports the full window.
pub(crate) fn decode_window_incr(reply: &Value, window: Duration) -> HearthResult<(i64, Duration)> {
    let (count, pttl): (i64, i64) = decode("WINDOW_INCR", reply)?;
    let remaining = match KeyTtl::from_pttl(pttl) {
        KeyTtl::Expires(remaining) => remaining,
        KeyTtl::Missing | KeyTtl::Persistent => window,
    };
    Ok((count, remaining))
}

/// Decodes the `[admitted, count, oldest_ms]` reply of the sliding log script.
pub(crate) fn decode_log_admit(reply: &Value) -> HearthResult<(bool, LogWindow)> {
    let values: Vec<i64> = decode("LOG_ADMIT", reply)?;
    let &[admitted, count, oldest_ms] = values.as_slice() else {
        return Err(HearthError::cache("LOG_ADMIT returned an unexpected reply"));
    };

    Ok((
        admitted == 1,
        LogWindow {
            count: u64::try_from(count).unwrap_or(0),
            oldest_ms: (oldest_ms >= 0).then_some(oldest_ms),
        },
    ))
}

/// Decodes the `[ZCOUNT, ZRANGEBYSCORE .. WITHSCORES LIMIT 0 1]` reply.
pub(crate) fn decode_log_window(reply: &Value) -> HearthResult<LogWindow> {
    let (count, oldest): (u64, Vec<(String, i64)>) = decode("LOG_WINDOW", reply)?;
    Ok(LogWindow {
        count,
        oldest_ms: oldest.first().map(|(_, score)| *score),
    })
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> HearthResult<Option<String>> {
        self.run("GET", |mut conn| async move {
            redis::cmd("GET").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> HearthResult<()> {
        self.run("SET", |mut conn| async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(millis(ttl));
            }
            cmd.query_async(&mut conn).await
        })
        .await
    }

    async fn del(&self, keys: &[String]) -> HearthResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.run("DEL", |mut conn| async move {
            redis::cmd("DEL").arg(keys).query_async(&mut conn).await
        })
        .await
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> HearthResult<(u64, Vec<String>)> {
        self.run("SCAN", |mut conn| async move {
            redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(count)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn incr(&self, key: &str, delta: i64, ttl: Option<Duration>) -> HearthResult<i64> {
        self.run("INCRBY", |mut conn| async move {
            let mut pipe = redis::pipe();
            pipe.atomic().cmd("INCRBY").arg(key).arg(delta);
            if let Some(ttl) = ttl {
                pipe.cmd("PEXPIRE").arg(key).arg(millis(ttl)).ignore();
            }
            let (value,): (i64,) = pipe.query_async(&mut conn).await?;
            Ok(value)
        })
        .await
    }

    async fn exists(&self, key: &str) -> HearthResult<bool> {
        self.run("EXISTS", |mut conn| async move {
            redis::cmd("EXISTS").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn ttl(&self, key: &str) -> HearthResult<KeyTtl> {
        let reply: Value = self
            .run("PTTL", |mut conn| async move {
                redis::cmd("PTTL").arg(key).query_async(&mut conn).await
            })
            .await?;
        decode_pttl(&reply)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> HearthResult<bool> {
        self.run("PEXPIRE", |mut conn| async move {
            redis::cmd("PEXPIRE")
                .arg(key)
                .arg(millis(ttl))
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn mget(&self, keys: &[String]) -> HearthResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.run("MGET", |mut conn| async move {
            redis::cmd("MGET").arg(keys).query_async(&mut conn).await
        })
        .await
    }

    async fn mset(&self, entries: &[(String, String, Option<Duration>)]) -> HearthResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.run("MSET", |mut conn| async move {
            let mut pipe = redis::pipe();
            pipe.atomic();
            for (key, value, ttl) in entries {
                pipe.cmd("SET").arg(key).arg(value);
                if let Some(ttl) = ttl {
                    pipe.arg("PX").arg(millis(*ttl));
                }
                pipe.ignore();
            }
            pipe.query_async(&mut conn).await
        })
        .await
    }

    async fn flush(&self) -> HearthResult<()> {
        self.run("FLUSHDB", |mut conn| async move {
            redis::cmd("FLUSHDB").query_async(&mut conn).await
        })
        .await
    }

    async fn stats(&self) -> HearthResult<StoreStats> {
        let (key_count, info): (u64, String) = self
            .run("INFO", |mut conn| async move {
                redis::pipe()
                    .cmd("DBSIZE")
                    .cmd("INFO")
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(parse_info(&info, key_count))
    }

    async fn ping(&self) -> HearthResult<()> {
        let reply: String = self
            .run("PING", |mut conn| async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await?;
        debug!(reply = %reply, "Store ping");
        Ok(())
    }

    async fn window_incr(&self, key: &str, window: Duration) -> HearthResult<(i64, Duration)> {
        let reply: Value = self
            .run("WINDOW_INCR", |mut conn| async move {
                redis::pipe()
                    .atomic()
                    .cmd("SET")
                    .arg(key)
                    .arg(0)
                    .arg("PX")
                    .arg(millis(window))
                    .arg("NX")
                    .ignore()
                    .cmd("INCR")
                    .arg(key)
                    .cmd("PTTL")
                    .arg(key)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        decode_window_incr(&reply, window)
    }

    async fn log_admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u64,
        token: &str,
    ) -> HearthResult<(bool, LogWindow)> {
        let script = &self.log_admit;
        let reply: Value = self
            .run("LOG_ADMIT", |mut conn| async move {
                script
                    .key(key)
                    .arg(now_ms)
                    .arg(window_ms)
                    .arg(limit)
                    .arg(token)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        decode_log_admit(&reply)
    }

    async fn log_window(&self, key: &str, now_ms: i64, window_ms: i64) -> HearthResult<LogWindow> {
        let min = format!("({}", now_ms - window_ms);
        let reply: Value = self
            .run("LOG_WINDOW", |mut conn| async move {
                redis::pipe()
                    .cmd("ZCOUNT")
                    .arg(key)
                    .arg(&min)
                    .arg("+inf")
                    .cmd("ZRANGEBYSCORE")
                    .arg(key)
                    .arg(&min)
                    .arg("+inf")
                    .arg("WITHSCORES")
                    .arg("LIMIT")
                    .arg(0)
                    .arg(1)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        decode_log_window(&reply)
    }
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}
