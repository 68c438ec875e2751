//! # Cache Client
//!
//! Typed key/value store fronting the shared cache datastore: TTL'd reads
//! and writes, pattern deletion, atomic windowed increment, and a
//! distributed mutex. All list endpoints and the membership resolver go
//! through this client; it is the only place cache failures are absorbed.
//!
//! Failure mode: reads degrade to "absent" and writes log the error. Every
//! caller is correct when the cache behaves as empty.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod aggregator;
pub mod backend;
pub mod invalidation;
pub mod keys;
pub mod lock;

pub use aggregator::get_or_compute;
pub use backend::{BackendStats, CacheBackend, CacheError, MemoryBackend, RedisBackend};
pub use keys::CacheKey;

use crate::observability::Metrics;

// ============================================================================
// Client Statistics
// ============================================================================

#[derive(Default)]
struct ClientCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    avg_get_latency_us: RwLock<f64>,
}

/// Combined client + datastore statistics for `stats()` and the cache admin
/// surface.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Keys currently stored in the datastore
    pub key_count: u64,
    /// Approximate datastore memory in bytes
    pub memory_used_bytes: u64,
    /// Client-observed hit rate since startup
    pub hit_rate: f64,
    /// Moving average GET latency in milliseconds
    pub latency_ms: f64,
}

// ============================================================================
// Cache Client
// ============================================================================

/// Shared cache client. Cheap to clone via `Arc`.
pub struct CacheClient {
    backend: Arc<dyn CacheBackend>,
    counters: ClientCounters,
    metrics: Option<Arc<Metrics>>,
}

impl CacheClient {
    /// Connect to the cache datastore.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        Ok(Self::with_backend(Arc::new(RedisBackend::connect(url).await?)))
    }

    /// In-memory client for tests and demo mode.
    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    /// Wrap an explicit backend.
    pub fn with_backend(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            counters: ClientCounters::default(),
            metrics: None,
        }
    }

    /// Attach the Prometheus registry hook.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Typed read. Returns `None` on miss, expired entry, codec mismatch, or
    /// datastore outage.
    pub async fn get<K: CacheKey>(&self, key: &K) -> Option<K::Value> {
        let rendered = key.render();
        let start = Instant::now();

        let raw = match self.backend.get(&rendered).await {
            Ok(raw) => raw,
            Err(err) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %rendered, error = %err, "cache read failed, treating as absent");
                return None;
            }
        };
        self.observe_get_latency(start.elapsed());

        match raw {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    self.record_hit();
                    Some(value)
                }
                Err(err) => {
                    tracing::warn!(key = %rendered, error = %err, "cache value undecodable, treating as absent");
                    self.record_miss();
                    None
                }
            },
            None => {
                self.record_miss();
                None
            }
        }
    }

    /// Typed write using the namespace TTL band.
    pub async fn set<K: CacheKey>(&self, key: &K, value: &K::Value) -> Result<(), CacheError> {
        self.set_with_ttl(key, value, K::TTL).await
    }

    /// Typed write with an explicit TTL (must be positive).
    pub async fn set_with_ttl<K: CacheKey>(
        &self,
        key: &K,
        value: &K::Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl("ttl must be positive".to_string()));
        }
        let rendered = key.render();
        let encoded =
            serde_json::to_string(value).map_err(|e| CacheError::Codec(e.to_string()))?;

        self.backend.set(&rendered, &encoded, ttl).await.map_err(|err| {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(key = %rendered, error = %err, "cache write failed");
            err
        })
    }

    /// Delete one key. Idempotent; failures are logged.
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.backend.delete(key).await.map_err(|err| {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(key = %key, error = %err, "cache delete failed");
            err
        })
    }

    /// Delete every key matching a glob via cursor iteration.
    pub async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        self.backend.delete_pattern(pattern).await.map_err(|err| {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(pattern = %pattern, error = %err, "cache pattern delete failed");
            err
        })
    }

    /// Atomic windowed counter increment; see [`CacheBackend::increment`].
    pub async fn increment(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<(i64, Duration), CacheError> {
        self.backend.increment(key, window).await
    }

    /// Acquire the distributed mutex key iff absent.
    pub async fn try_lock(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        self.backend.try_lock(key, token, ttl).await
    }

    /// Release the mutex iff `token` matches the stored holder.
    pub async fn unlock(&self, key: &str, token: &str) {
        if let Err(err) = self.backend.unlock(key, token).await {
            tracing::warn!(key = %key, error = %err, "cache unlock failed; lock will expire by TTL");
        }
    }

    /// Round-trip latency probe for readiness checks.
    pub async fn ping(&self) -> Result<Duration, CacheError> {
        self.backend.ping().await
    }

    /// Combined client and datastore statistics.
    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let backend = self.backend.stats().await?;
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };

        Ok(CacheStats {
            key_count: backend.key_count,
            memory_used_bytes: backend.memory_used_bytes,
            hit_rate,
            latency_ms: *self.counters.avg_get_latency_us.read() / 1000.0,
        })
    }

    fn record_hit(&self) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.cache_hits.inc();
        }
    }

    fn record_miss(&self) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.cache_misses.inc();
        }
    }

    fn observe_get_latency(&self, elapsed: Duration) {
        let mut avg = self.counters.avg_get_latency_us.write();
        let sample = elapsed.as_micros() as f64;
        *avg = if *avg == 0.0 { sample } else { (*avg + sample) / 2.0 };
    }
}

#[cfg(test)]
mod tests {
    use super::keys::{MembersKey, WorkspaceKey};
    use super::*;
    use crate::models::MemberEntry;
    use crate::membership::Role;
    use chrono::Utc;
    use uuid::Uuid;

    fn member(name: &str) -> MemberEntry {
        MemberEntry {
            principal_id: Uuid::new_v4(),
            name: name.to_string(),
            email: format!("{}@kollab.test", name),
            role: Role::Viewer,
            joined_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let cache = CacheClient::in_memory();
        let key = MembersKey(Uuid::new_v4());

        assert!(cache.get(&key).await.is_none());
        cache.set(&key, &vec![member("ada")]).await.unwrap();

        let got = cache.get(&key).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].name, "ada");
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let cache = CacheClient::in_memory();
        let key = MembersKey(Uuid::new_v4());
        let err = cache
            .set_with_ttl(&key, &vec![], Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidTtl(_)));
    }

    #[tokio::test]
    async fn test_undecodable_value_is_a_miss() {
        let backend = Arc::new(MemoryBackend::new());
        let key = WorkspaceKey(Uuid::new_v4());
        backend
            .set(&key.render(), "not json", Duration::from_secs(60))
            .await
            .unwrap();

        let cache = CacheClient::with_backend(backend);
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_hit_rate_tracking() {
        let cache = CacheClient::in_memory();
        let key = MembersKey(Uuid::new_v4());
        cache.set(&key, &vec![]).await.unwrap();

        cache.get(&key).await;
        cache.get(&MembersKey(Uuid::new_v4())).await;

        let stats = cache.stats().await.unwrap();
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }
}
