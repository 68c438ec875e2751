//! # Rate Limiter
//!
//! Fixed-window shared counters keyed by `(bucket, principal)`, backed by
//! the cache client's atomic increment. Used both for abuse control and as
//! an idempotency throttle on write routes.
//!
//! The limiter fails open: when the cache is unreachable the request is
//! allowed and the response carries an `X-RateLimit-Warning` header, because
//! availability beats precision for every bucket in the table.

use std::sync::Arc;

use crate::cache::keys::rate_limit_key;
use crate::cache::CacheClient;

pub mod buckets;

pub use buckets::Bucket;

// ============================================================================
// Decision
// ============================================================================

/// Outcome of a limiter check, carrying everything the response headers
/// need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Under the limit
    Allowed {
        /// Bucket maximum
        limit: u32,
        /// Requests left in the window
        remaining: u32,
        /// Seconds until the window resets
        reset_secs: u64,
    },
    /// Over the limit
    Blocked {
        /// Bucket maximum
        limit: u32,
        /// Seconds until the window resets
        retry_after_secs: u64,
    },
    /// Cache unreachable; request allowed with a warning
    FailOpen {
        /// Bucket maximum
        limit: u32,
    },
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Blocked { .. })
    }

    /// `X-RateLimit-*` (and on block `Retry-After`) header pairs.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Allowed { limit, remaining, reset_secs } => vec![
                ("X-RateLimit-Limit", limit.to_string()),
                ("X-RateLimit-Remaining", remaining.to_string()),
                ("X-RateLimit-Reset", reset_secs.to_string()),
            ],
            Self::Blocked { limit, retry_after_secs } => vec![
                ("X-RateLimit-Limit", limit.to_string()),
                ("X-RateLimit-Remaining", "0".to_string()),
                ("X-RateLimit-Reset", retry_after_secs.to_string()),
                ("Retry-After", retry_after_secs.to_string()),
            ],
            Self::FailOpen { limit } => vec![
                ("X-RateLimit-Limit", limit.to_string()),
                ("X-RateLimit-Warning", "limiter degraded, cache unreachable".to_string()),
            ],
        }
    }
}

// ============================================================================
// Limiter
// ============================================================================

/// Shared-counter fixed-window limiter.
pub struct RateLimiter {
    cache: Arc<CacheClient>,
}

impl RateLimiter {
    /// Create a limiter over the shared cache.
    pub fn new(cache: Arc<CacheClient>) -> Self {
        Self { cache }
    }

    /// Count one request for `principal` against `bucket`.
    ///
    /// The counter at exactly `max_requests` still allows; the next request
    /// blocks with the window's remaining TTL as `Retry-After`.
    pub async fn check(&self, bucket: &Bucket, principal: &str) -> Decision {
        let key = rate_limit_key(bucket.name, principal);

        match self.cache.increment(&key, bucket.window).await {
            Ok((count, remaining_window)) => {
                let reset_secs = remaining_window.as_secs().max(1);
                if count <= i64::from(bucket.max_requests) {
                    Decision::Allowed {
                        limit: bucket.max_requests,
                        remaining: bucket.max_requests.saturating_sub(count as u32),
                        reset_secs,
                    }
                } else {
                    Decision::Blocked {
                        limit: bucket.max_requests,
                        retry_after_secs: reset_secs,
                    }
                }
            }
            Err(err) => {
                tracing::warn!(bucket = bucket.name, error = %err, "rate limiter failing open");
                Decision::FailOpen { limit: bucket.max_requests }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::{BackendStats, CacheBackend, CacheError};
    use async_trait::async_trait;
    use std::time::Duration;

    #[tokio::test]
    async fn test_boundary_at_max() {
        let limiter = RateLimiter::new(Arc::new(CacheClient::in_memory()));

        for i in 1..=buckets::AUTH.max_requests {
            let decision = limiter.check(&buckets::AUTH, "203.0.113.7").await;
            assert!(decision.is_allowed(), "request {} should pass", i);
        }

        // max_requests + 1 blocks with a positive Retry-After.
        match limiter.check(&buckets::AUTH, "203.0.113.7").await {
            Decision::Blocked { retry_after_secs, .. } => assert!(retry_after_secs > 0),
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_principals_are_isolated() {
        let limiter = RateLimiter::new(Arc::new(CacheClient::in_memory()));

        for _ in 0..buckets::AUTH.max_requests {
            limiter.check(&buckets::AUTH, "p1").await;
        }
        assert!(!limiter.check(&buckets::AUTH, "p1").await.is_allowed());
        assert!(limiter.check(&buckets::AUTH, "p2").await.is_allowed());
    }

    #[tokio::test]
    async fn test_blocked_headers_report_zero_remaining() {
        let limiter = RateLimiter::new(Arc::new(CacheClient::in_memory()));
        for _ in 0..=buckets::CREATE_WORKSPACE.max_requests {
            limiter.check(&buckets::CREATE_WORKSPACE, "p1").await;
        }
        let decision = limiter.check(&buckets::CREATE_WORKSPACE, "p1").await;
        let headers = decision.headers();
        assert!(headers.iter().any(|(k, v)| *k == "X-RateLimit-Remaining" && v == "0"));
        assert!(headers.iter().any(|(k, _)| *k == "Retry-After"));
    }

    struct DownBackend;

    #[async_trait]
    impl CacheBackend for DownBackend {
        async fn get(&self, _: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unreachable("down".to_string()))
        }
        async fn set(&self, _: &str, _: &str, _: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unreachable("down".to_string()))
        }
        async fn delete(&self, _: &str) -> Result<(), CacheError> {
            Err(CacheError::Unreachable("down".to_string()))
        }
        async fn delete_pattern(&self, _: &str) -> Result<u64, CacheError> {
            Err(CacheError::Unreachable("down".to_string()))
        }
        async fn increment(&self, _: &str, _: Duration) -> Result<(i64, Duration), CacheError> {
            Err(CacheError::Unreachable("down".to_string()))
        }
        async fn try_lock(&self, _: &str, _: &str, _: Duration) -> Result<bool, CacheError> {
            Err(CacheError::Unreachable("down".to_string()))
        }
        async fn unlock(&self, _: &str, _: &str) -> Result<(), CacheError> {
            Err(CacheError::Unreachable("down".to_string()))
        }
        async fn ping(&self) -> Result<Duration, CacheError> {
            Err(CacheError::Unreachable("down".to_string()))
        }
        async fn stats(&self) -> Result<BackendStats, CacheError> {
            Err(CacheError::Unreachable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_fail_open_on_outage() {
        let cache = Arc::new(CacheClient::with_backend(Arc::new(DownBackend)));
        let limiter = RateLimiter::new(cache);

        let decision = limiter.check(&buckets::AUTH, "p1").await;
        assert!(decision.is_allowed());
        let headers = decision.headers();
        assert!(headers.iter().any(|(k, _)| *k == "X-RateLimit-Warning"));
    }
}
