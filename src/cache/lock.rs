//! Distributed mutex handles for stampede protection.
//!
//! The cache's `SETNX`+expiry primitive is the only cross-replica
//! coordination in the system. Holders keep a random token and must refuse
//! to release a lock they do not own; holds are bounded by a 5 s TTL so a
//! crashed holder cannot wedge other replicas.

use std::time::Duration;
use uuid::Uuid;

use super::keys::lock_key;
use super::CacheClient;

/// Maximum lock hold time.
pub const LOCK_TTL: Duration = Duration::from_secs(5);
/// Delay between contender retries.
pub const RETRY_DELAY: Duration = Duration::from_millis(50);
/// Bounded number of contender retries (≤ 500 ms total wait).
pub const MAX_RETRIES: u32 = 10;

/// A held distributed lock. Dropping without [`release`](Self::release) is
/// safe; the TTL reclaims the key.
#[derive(Debug)]
pub struct LockHandle {
    key: String,
    token: String,
}

impl LockHandle {
    /// Attempt a single acquisition of `lock:{base_key}`.
    ///
    /// Returns `None` both when another holder owns the lock and when the
    /// cache is unreachable; callers fail open either way.
    pub async fn try_acquire(cache: &CacheClient, base_key: &str) -> Option<Self> {
        let key = lock_key(base_key);
        let token = Uuid::new_v4().to_string();
        match cache.try_lock(&key, &token, LOCK_TTL).await {
            Ok(true) => Some(Self { key, token }),
            Ok(false) => None,
            Err(err) => {
                tracing::debug!(key = %key, error = %err, "lock acquisition skipped, cache unreachable");
                None
            }
        }
    }

    /// Release the lock iff this handle still owns it.
    pub async fn release(self, cache: &CacheClient) {
        cache.unlock(&self.key, &self.token).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exclusive_until_released() {
        let cache = CacheClient::in_memory();

        let held = LockHandle::try_acquire(&cache, "member:p:w").await.unwrap();
        assert!(LockHandle::try_acquire(&cache, "member:p:w").await.is_none());

        held.release(&cache).await;
        assert!(LockHandle::try_acquire(&cache, "member:p:w").await.is_some());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        let cache = CacheClient::in_memory();
        let _a = LockHandle::try_acquire(&cache, "documents_list:w1").await.unwrap();
        assert!(LockHandle::try_acquire(&cache, "documents_list:w2").await.is_some());
    }
}
