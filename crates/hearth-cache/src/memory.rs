//! In-process store backend for tests.
//!
//! Emulates the subset of Redis semantics the cache layer relies on: string
//! values with millisecond expiry, integer counters, cursor scans with glob
//! patterns and a sorted log per key. Scans walk keys in lexical order and
//! resume after the last examined key, so deleting while scanning is safe.

use crate::backend::{CacheBackend, KeyTtl, LogWindow, StoreStats};
use async_trait::async_trait;
use hearth_core::{HearthError, HearthResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Log(Vec<(i64, String)>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-memory backend with optional failure injection.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    failing: AtomicBool,
    cursors: Mutex<HashMap<u64, String>>,
    next_cursor: AtomicU64,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent command fail with a connection error until
    /// switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| e.is_live(now)).count()
    }

    /// Whether no live keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys in lexical order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.entries
            .lock()
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn check(&self, operation: &str) -> HearthResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(HearthError::Connection(format!("{} failed: connection refused", operation)))
        } else {
            Ok(())
        }
    }

    fn purge(entries: &mut BTreeMap<String, Entry>, key: &str, now: Instant) {
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
    }

    fn live<'a>(
        entries: &'a mut BTreeMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut Entry> {
        Self::purge(entries, key, now);
        entries.get_mut(key)
    }
}

fn wrong_type(key: &str) -> HearthError {
    HearthError::cache(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {}",
        key
    ))
}

/// Redis-style glob match supporting `*`, `?`, `[...]` classes and `\` escapes.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_at(&pattern, &text)
}

fn glob_at(pattern: &[char], text: &[char]) -> bool {
    let Some((&first, rest)) = pattern.split_first() else {
        return text.is_empty();
    };

    match first {
        '*' => (0..=text.len()).any(|skip| glob_at(rest, &text[skip..])),
        '?' => !text.is_empty() && glob_at(rest, &text[1..]),
        '[' => {
            let Some((&c, remaining_text)) = text.split_first() else {
                return false;
            };
            match match_class(rest, c) {
                Some((matched, after)) => matched && glob_at(after, remaining_text),
                // Unterminated class: treat '[' literally
                None => c == '[' && glob_at(rest, remaining_text),
            }
        }
        '\\' if !rest.is_empty() => {
            !text.is_empty() && text[0] == rest[0] && glob_at(&rest[1..], &text[1..])
        }
        literal => !text.is_empty() && text[0] == literal && glob_at(rest, &text[1..]),
    }
}

/// Matches `c` against a class body starting after `[`. Returns the result
/// and the pattern after the closing `]`.
fn match_class(body: &[char], c: char) -> Option<(bool, &[char])> {
    let (negated, mut i) = match body.first() {
        Some('^') => (true, 1),
        _ => (false, 0),
    };
    let mut matched = false;

    while i < body.len() {
        match body[i] {
            ']' => return Some((matched != negated, &body[i + 1..])),
            '\\' if i + 1 < body.len() => {
                matched |= body[i + 1] == c;
                i += 2;
            }
            low if i + 2 < body.len() && body[i + 1] == '-' && body[i + 2] != ']' => {
                let high = body[i + 2];
                matched |= (low.min(high)..=low.max(high)).contains(&c);
                i += 3;
            }
            other => {
                matched |= other == c;
                i += 1;
            }
        }
    }

    None
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> HearthResult<Option<String>> {
        self.check("GET")?;
        let mut entries = self.entries.lock();
        match Self::live(&mut entries, key, Instant::now()) {
            Some(Entry { value: Value::Text(text), .. }) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(text.clone()))
            }
            Some(_) => Err(wrong_type(key)),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> HearthResult<()> {
        self.check("SET")?;
        let entry = Entry {
            value: Value::Text(value.to_string()),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> HearthResult<u64> {
        self.check("DEL")?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let mut deleted = 0;
        for key in keys {
            if let Some(entry) = entries.remove(key) {
                if entry.is_live(now) {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> HearthResult<(u64, Vec<String>)> {
        self.check("SCAN")?;
        let now = Instant::now();
        let resume_after = if cursor == 0 {
            None
        } else {
            match self.cursors.lock().remove(&cursor) {
                Some(last) => Some(last),
                None => return Err(HearthError::cache("ERR invalid cursor")),
            }
        };

        let entries = self.entries.lock();
        let lower = match &resume_after {
            Some(last) => Bound::Excluded(last.as_str()),
            None => Bound::Unbounded,
        };
        let examined: Vec<&String> = entries
            .range::<str, _>((lower, Bound::Unbounded))
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k)
            .take(count.max(1) + 1)
            .collect();

        // One extra key is peeked to know whether the scan is complete
        let more = examined.len() > count.max(1);
        let examined = &examined[..examined.len().min(count.max(1))];
        let keys = examined
            .iter()
            .filter(|k| glob_match(pattern, k))
            .map(|k| (*k).clone())
            .collect();

        let next = match examined.last() {
            Some(last) if more => {
                let id = self.next_cursor.fetch_add(1, Ordering::Relaxed) + 1;
                self.cursors.lock().insert(id, (*last).clone());
                id
            }
            _ => 0,
        };

        Ok((next, keys))
    }

    async fn incr(&self, key: &str, delta: i64, ttl: Option<Duration>) -> HearthResult<i64> {
        self.check("INCRBY")?;
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let (current, expires_at) = match Self::live(&mut entries, key, now) {
            Some(Entry { value: Value::Text(text), expires_at }) => (
                text.parse::<i64>()
                    .map_err(|_| HearthError::cache("ERR value is not an integer"))?,
                *expires_at,
            ),
            Some(_) => return Err(wrong_type(key)),
            None => (0, None),
        };

        let value = current.saturating_add(delta);
        let expires_at = ttl.map(|ttl| now + ttl).or(expires_at);
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at,
            },
        );
        Ok(value)
    }

    async fn exists(&self, key: &str) -> HearthResult<bool> {
        self.check("EXISTS")?;
        let mut entries = self.entries.lock();
        Ok(Self::live(&mut entries, key, Instant::now()).is_some())
    }

    async fn ttl(&self, key: &str) -> HearthResult<KeyTtl> {
        self.check("PTTL")?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Ok(match Self::live(&mut entries, key, now) {
            None => KeyTtl::Missing,
            Some(Entry { expires_at: None, .. }) => KeyTtl::Persistent,
            Some(Entry { expires_at: Some(at), .. }) => KeyTtl::Expires(*at - now),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> HearthResult<bool> {
        self.check("PEXPIRE")?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match Self::live(&mut entries, key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mget(&self, keys: &[String]) -> HearthResult<Vec<Option<String>>> {
        self.check("MGET")?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Ok(keys
            .iter()
            .map(|key| match Self::live(&mut entries, key, now) {
                Some(Entry { value: Value::Text(text), .. }) => Some(text.clone()),
                _ => None,
            })
            .collect())
    }

    async fn mset(&self, items: &[(String, String, Option<Duration>)]) -> HearthResult<()> {
        self.check("MSET")?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        for (key, value, ttl) in items {
            entries.insert(
                key.clone(),
                Entry {
                    value: Value::Text(value.clone()),
                    expires_at: ttl.map(|ttl| now + ttl),
                },
            );
        }
        Ok(())
    }

    async fn flush(&self) -> HearthResult<()> {
        self.check("FLUSHDB")?;
        self.entries.lock().clear();
        Ok(())
    }

    async fn stats(&self) -> HearthResult<StoreStats> {
        self.check("INFO")?;
        Ok(StoreStats {
            key_count: self.len() as u64,
            memory_used: StoreStats::empty().memory_used,
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
        })
    }

    async fn ping(&self) -> HearthResult<()> {
        self.check("PING")
    }

    async fn window_incr(&self, key: &str, window: Duration) -> HearthResult<(i64, Duration)> {
        self.check("WINDOW_INCR")?;
        let now = Instant::now();
        let mut entries = self.entries.lock();

        Self::purge(&mut entries, key, now);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Text("0".to_string()),
            expires_at: Some(now + window),
        });

        let Value::Text(text) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        let count = text
            .parse::<i64>()
            .map_err(|_| HearthError::cache("ERR value is not an integer"))?
            + 1;
        *text = count.to_string();

        let remaining = entry.expires_at.map_or(window, |at| at - now);
        Ok((count, remaining))
    }

    async fn log_admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u64,
        token: &str,
    ) -> HearthResult<(bool, LogWindow)> {
        self.check("LOG_ADMIT")?;
        let now = Instant::now();
        let mut entries = self.entries.lock();

        Self::purge(&mut entries, key, now);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Log(Vec::new()),
            expires_at: None,
        });

        let Value::Log(log) = &mut entry.value else {
            return Err(wrong_type(key));
        };

        let cutoff = now_ms - window_ms;
        log.retain(|(score, _)| *score > cutoff);

        let admitted = (log.len() as u64) < limit;
        if admitted {
            let at = log.partition_point(|(score, _)| *score <= now_ms);
            log.insert(at, (now_ms, token.to_string()));
            let window = Duration::from_millis(u64::try_from(window_ms).unwrap_or(0));
            entry.expires_at = Some(now + window);
        }

        let window = LogWindow {
            count: log.len() as u64,
            oldest_ms: log.first().map(|(score, _)| *score),
        };

        if log.is_empty() {
            entries.remove(key);
        }

        Ok((admitted, window))
    }

    async fn log_window(&self, key: &str, now_ms: i64, window_ms: i64) -> HearthResult<LogWindow> {
        self.check("LOG_WINDOW")?;
        let mut entries = self.entries.lock();
        match Self::live(&mut entries, key, Instant::now()) {
            None => Ok(LogWindow { count: 0, oldest_ms: None }),
            Some(Entry { value: Value::Log(log), .. }) => {
                let cutoff = now_ms - window_ms;
                let mut inside = log.iter().filter(|(score, _)| *score > cutoff);
                let oldest_ms = inside.next().map(|(score, _)| *score);
                let count = oldest_ms.map_or(0, |_| 1 + inside.count() as u64);
                Ok(LogWindow { count, oldest_ms })
            }
            Some(_) => Err(wrong_type(key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("user:*", "user:1"));
        assert!(glob_match("user:*", "user:"));
        assert!(!glob_match("user:*", "listing:1"));
        assert!(glob_match("*:42", "listing:42"));
        assert!(glob_match("*:42:*", "bookings:availability:42:2024-01-01"));
        assert!(glob_match("user:?", "user:1"));
        assert!(!glob_match("user:?", "user:12"));
        assert!(glob_match("user:[12]", "user:2"));
        assert!(!glob_match("user:[^12]", "user:2"));
        assert!(glob_match("user:[a-c]", "user:b"));
        assert!(glob_match(r"search:a\*b", "search:a*b"));
        assert!(!glob_match(r"search:a\*b", "search:axb"));
    }

    #[tokio::test]
    async fn test_expired_entries_disappear() {
        let backend = MemoryBackend::new();
        backend.set("k", "v", Some(Duration::from_millis(20))).await.unwrap();
        assert!(backend.exists("k").await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!backend.exists("k").await.unwrap());
        assert_eq!(backend.ttl("k").await.unwrap(), KeyTtl::Missing);
    }

    #[tokio::test]
    async fn test_scan_walks_every_key() {
        let backend = MemoryBackend::new();
        for i in 0..25 {
            backend.set(&format!("user:{}", i), "x", None).await.unwrap();
        }
        backend.set("listing:1", "x", None).await.unwrap();

        let mut cursor = 0;
        let mut found = Vec::new();
        loop {
            let (next, keys) = backend.scan(cursor, "user:*", 10).await.unwrap();
            found.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(found.len(), 25);
    }

    #[tokio::test]
    async fn test_scan_survives_deletes() {
        let backend = MemoryBackend::new();
        for i in 0..30 {
            backend.set(&format!("user:{:02}", i), "x", None).await.unwrap();
        }

        let mut cursor = 0;
        let mut deleted = 0;
        loop {
            let (next, keys) = backend.scan(cursor, "user:*", 7).await.unwrap();
            deleted += backend.del(&keys).await.unwrap();
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(deleted, 30);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let backend = MemoryBackend::new();
        backend.set_failing(true);
        assert!(matches!(backend.get("k").await, Err(HearthError::Connection(_))));
        backend.set_failing(false);
        assert!(backend.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_log_admit_bounds_window() {
        let backend = MemoryBackend::new();

        for i in 0..3 {
            let (admitted, _) = backend
                .log_admit("log", 1_000 + i, 1_000, 3, &i.to_string())
                .await
                .unwrap();
            assert!(admitted);
        }
        let (admitted, window) = backend.log_admit("log", 1_500, 1_000, 3, "x").await.unwrap();
        assert!(!admitted);
        assert_eq!(window.count, 3);
        assert_eq!(window.oldest_ms, Some(1_000));

        // The first entry leaves the window at 2_000
        let (admitted, window) = backend.log_admit("log", 2_000, 1_000, 3, "y").await.unwrap();
        assert!(admitted);
        assert_eq!(window.oldest_ms, Some(1_001));

        let window = backend.log_window("log", 2_000, 1_000).await.unwrap();
        assert_eq!(window.count, 3);
    }

    #[tokio::test]
    async fn test_wrong_type_is_a_command_error() {
        let backend = MemoryBackend::new();
        backend.log_admit("log", 1, 1_000, 5, "a").await.unwrap();
        assert!(matches!(backend.get("log").await, Err(HearthError::Cache(_))));
    }
}
