//! # Cache Backends
//!
//! The datastore seam behind the cache client. Production uses Redis via a
//! multiplexed [`ConnectionManager`]; tests and demo mode use an in-memory
//! backend with identical TTL, counter, and lock semantics.
//!
//! Atomic operations (windowed increment, compare-and-delete unlock) run as
//! Lua scripts so multi-replica deployments observe a single winner.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Cache datastore failures.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Datastore unreachable or protocol failure
    #[error("Cache datastore unreachable: {0}")]
    Unreachable(String),

    /// TTL rejected (zero or out of range)
    #[error("Invalid TTL: {0}")]
    InvalidTtl(String),

    /// Value could not be encoded or decoded
    #[error("Cache codec failure: {0}")]
    Codec(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unreachable(err.to_string())
    }
}

/// Datastore-level statistics.
#[derive(Debug, Clone, Default)]
pub struct BackendStats {
    /// Number of keys currently stored
    pub key_count: u64,
    /// Approximate memory used in bytes
    pub memory_used_bytes: u64,
}

/// The operation surface every cache datastore must provide.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a raw value.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a raw value with a TTL (already validated non-zero).
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Delete one key. Idempotent.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Delete every key matching a glob pattern using cursor iteration;
    /// never a blocking full scan. Returns the number of keys removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;

    /// Atomically increment a windowed counter. The first increment arms the
    /// window TTL; later increments do not reset it. Returns the counter
    /// value and the remaining window.
    async fn increment(&self, key: &str, window: Duration) -> Result<(i64, Duration), CacheError>;

    /// Acquire a mutex key iff absent, storing the holder token for `ttl`.
    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Compare-and-delete a mutex key; no-op when the stored token differs.
    async fn unlock(&self, key: &str, token: &str) -> Result<(), CacheError>;

    /// Round-trip latency probe.
    async fn ping(&self) -> Result<Duration, CacheError>;

    /// Datastore statistics.
    async fn stats(&self) -> Result<BackendStats, CacheError>;
}

// ============================================================================
// Redis Backend
// ============================================================================

const INCREMENT_SCRIPT: &str = r#"
    local count = redis.call('INCR', KEYS[1])
    if count == 1 then
        redis.call('EXPIRE', KEYS[1], ARGV[1])
    end
    local ttl = redis.call('TTL', KEYS[1])
    return {count, ttl}
"#;

const UNLOCK_SCRIPT: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
"#;

/// Redis-backed datastore shared by all replicas.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Connect to the cache datastore.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::Unreachable(format!("invalid cache url: {}", e)))?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(key).query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let removed: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                deleted += removed;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(deleted)
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<(i64, Duration), CacheError> {
        let mut conn = self.conn.clone();
        let (count, ttl_secs): (i64, i64) = redis::Script::new(INCREMENT_SCRIPT)
            .key(key)
            .arg(window.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;
        let remaining = Duration::from_secs(ttl_secs.max(0) as u64);
        Ok((count, remaining))
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(acquired.is_some())
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::Script::new(UNLOCK_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<Duration, CacheError> {
        let mut conn = self.conn.clone();
        let start = Instant::now();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(start.elapsed())
    }

    async fn stats(&self) -> Result<BackendStats, CacheError> {
        let mut conn = self.conn.clone();
        let key_count: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        let info: String = redis::cmd("INFO").arg("memory").query_async(&mut conn).await?;
        let memory_used_bytes = info
            .lines()
            .find_map(|line| line.strip_prefix("used_memory:"))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        Ok(BackendStats {
            key_count,
            memory_used_bytes,
        })
    }
}

// ============================================================================
// In-Memory Backend
// ============================================================================

#[derive(Debug, Clone)]
struct MemEntry {
    value: String,
    expires_at: Instant,
}

impl MemEntry {
    fn live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// In-memory datastore with the same TTL, counter, and lock semantics as the
/// Redis backend. Used by tests and demo mode; a single replica only.
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<String, MemEntry>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if let Some(entry) = self.entries.get(key) {
            if entry.live() {
                return Ok(Some(entry.value.clone()));
            }
        } else {
            return Ok(None);
        }
        // Guard dropped above; safe to evict the expired entry.
        self.entries.remove_if(key, |_, entry| !entry.live());
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            MemEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let matching: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        let mut deleted = 0;
        for key in matching {
            if self.entries.remove(&key).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<(i64, Duration), CacheError> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().live() {
                    let count = occupied.get().value.parse::<i64>().unwrap_or(0) + 1;
                    let remaining = occupied.get().expires_at - now;
                    occupied.get_mut().value = count.to_string();
                    Ok((count, remaining))
                } else {
                    occupied.insert(MemEntry {
                        value: "1".to_string(),
                        expires_at: now + window,
                    });
                    Ok((1, window))
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(MemEntry {
                    value: "1".to_string(),
                    expires_at: now + window,
                });
                Ok((1, window))
            }
        }
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, CacheError> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().live() {
                    Ok(false)
                } else {
                    occupied.insert(MemEntry {
                        value: token.to_string(),
                        expires_at: now + ttl,
                    });
                    Ok(true)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(MemEntry {
                    value: token.to_string(),
                    expires_at: now + ttl,
                });
                Ok(true)
            }
        }
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<(), CacheError> {
        self.entries
            .remove_if(key, |_, entry| entry.value == token);
        Ok(())
    }

    async fn ping(&self) -> Result<Duration, CacheError> {
        Ok(Duration::from_micros(1))
    }

    async fn stats(&self) -> Result<BackendStats, CacheError> {
        let mut key_count = 0;
        let mut memory_used_bytes = 0;
        for entry in self.entries.iter() {
            if entry.live() {
                key_count += 1;
                memory_used_bytes += (entry.key().len() + entry.value.len()) as u64;
            }
        }
        Ok(BackendStats {
            key_count,
            memory_used_bytes,
        })
    }
}

/// Match a key against a glob pattern where `*` spans any run of characters.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let mut pos = 0;

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !text.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if i == parts.len() - 1 {
            let rest = &text[pos..];
            return rest.len() >= part.len() && rest.ends_with(part);
        } else {
            match text[pos..].find(part) {
                Some(idx) => pos += idx + part.len(),
                None => return false,
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("member:*:w1", "member:p1:w1"));
        assert!(!glob_match("member:*:w1", "member:p1:w2"));
        assert!(glob_match("tasks_list:workspace:w1:*", "tasks_list:workspace:w1:page:2:limit:20"));
        assert!(!glob_match("tasks_list:workspace:w1:*", "tasks_list:workspace:w2:page:1:limit:20"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exact2"));
        assert!(glob_match("*", "anything"));
    }

    #[tokio::test]
    async fn test_memory_ttl_expiry() {
        let backend = MemoryBackend::new();
        backend.set("k", "v", Duration::from_millis(20)).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some("v".to_string()));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_increment_window() {
        let backend = MemoryBackend::new();
        let (first, ttl) = backend
            .increment("rate_limit:auth:p1", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(first, 1);
        assert!(ttl <= Duration::from_secs(60));

        let (second, _) = backend
            .increment("rate_limit:auth:p1", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn test_memory_lock_token_discipline() {
        let backend = MemoryBackend::new();
        assert!(backend
            .try_lock("lock:k", "holder-a", Duration::from_secs(5))
            .await
            .unwrap());
        assert!(!backend
            .try_lock("lock:k", "holder-b", Duration::from_secs(5))
            .await
            .unwrap());

        // A non-holder cannot release the lock.
        backend.unlock("lock:k", "holder-b").await.unwrap();
        assert!(!backend
            .try_lock("lock:k", "holder-b", Duration::from_secs(5))
            .await
            .unwrap());

        backend.unlock("lock:k", "holder-a").await.unwrap();
        assert!(backend
            .try_lock("lock:k", "holder-b", Duration::from_secs(5))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_memory_delete_pattern_idempotent() {
        let backend = MemoryBackend::new();
        for page in 1..=3 {
            backend
                .set(
                    &format!("tasks_list:workspace:w1:page:{}:limit:20", page),
                    "[]",
                    Duration::from_secs(60),
                )
                .await
                .unwrap();
        }
        backend.set("tasks_list:workspace:w2:page:1:limit:20", "[]", Duration::from_secs(60))
            .await
            .unwrap();

        let deleted = backend.delete_pattern("tasks_list:workspace:w1:*").await.unwrap();
        assert_eq!(deleted, 3);
        let again = backend.delete_pattern("tasks_list:workspace:w1:*").await.unwrap();
        assert_eq!(again, 0);
        assert!(backend
            .get("tasks_list:workspace:w2:page:1:limit:20")
            .await
            .unwrap()
            .is_some());
    }
}
