//! # Cached Read Aggregator
//!
//! `get_or_compute` is the get-or-compute primitive behind every list
//! endpoint. On a miss it elects one computation per key via the
//! distributed mutex; contenders poll the cache briefly and, past the
//! 500 ms bound, run the fetcher themselves without writing back so no user
//! request ever stalls on the lock.
//!
//! The fetcher must be pure with respect to the key: any input that changes
//! the value belongs in the key type ([`CacheKey`]).

use std::future::Future;

use super::lock::{LockHandle, MAX_RETRIES, RETRY_DELAY};
use super::{CacheClient, CacheKey};
use crate::error::AppResult;

/// Return the cached value for `key`, or compute and store it.
///
/// Exactly one caller per key computes under normal operation; when the
/// cache is unreachable every caller computes (fail-open) and nothing is
/// written back.
pub async fn get_or_compute<K, F, Fut>(cache: &CacheClient, key: &K, fetcher: F) -> AppResult<K::Value>
where
    K: CacheKey,
    F: FnOnce() -> Fut,
    Fut: Future<Output = AppResult<K::Value>>,
{
    if let Some(value) = cache.get(key).await {
        return Ok(value);
    }

    match LockHandle::try_acquire(cache, &key.render()).await {
        Some(held) => {
            // Double-check under the lock: a contender may have just
            // populated the key.
            if let Some(value) = cache.get(key).await {
                held.release(cache).await;
                return Ok(value);
            }

            let result = fetcher().await;
            if let Ok(value) = &result {
                let _ = cache.set(key, value).await;
            }
            held.release(cache).await;
            result
        }
        None => {
            for _ in 0..MAX_RETRIES {
                tokio::time::sleep(RETRY_DELAY).await;
                if let Some(value) = cache.get(key).await {
                    return Ok(value);
                }
            }
            // Bounded wait exhausted; compute without writing back.
            fetcher().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::DocumentsListKey;
    use crate::models::DocumentSummary;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    fn doc(title: &str) -> DocumentSummary {
        DocumentSummary {
            id: Uuid::new_v4(),
            title: title.to_string(),
            archived: false,
            created_by: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_miss_computes_and_stores() {
        let cache = CacheClient::in_memory();
        let key = DocumentsListKey(Uuid::new_v4());

        let value = get_or_compute(&cache, &key, || async { Ok(vec![doc("spec")]) })
            .await
            .unwrap();
        assert_eq!(value[0].title, "spec");

        // Second read is served from the cache.
        let cached = cache.get(&key).await.unwrap();
        assert_eq!(cached[0].title, "spec");
    }

    #[tokio::test]
    async fn test_hit_skips_fetcher() {
        let cache = CacheClient::in_memory();
        let key = DocumentsListKey(Uuid::new_v4());
        cache.set(&key, &vec![doc("cached")]).await.unwrap();

        let value = get_or_compute(&cache, &key, || async {
            panic!("fetcher must not run on a hit")
        })
        .await
        .unwrap();
        assert_eq!(value[0].title, "cached");
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let cache = CacheClient::in_memory();
        let key = DocumentsListKey(Uuid::new_v4());

        let result: AppResult<Vec<DocumentSummary>> = get_or_compute(&cache, &key, || async {
            Err(crate::error::AppError::database("source down"))
        })
        .await;
        assert!(result.is_err());
        assert!(cache.get(&key).await.is_none());

        // Lock released: the next caller computes.
        let value = get_or_compute(&cache, &key, || async { Ok(vec![doc("retry")]) })
            .await
            .unwrap();
        assert_eq!(value[0].title, "retry");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stampede_bound() {
        let cache = Arc::new(CacheClient::in_memory());
        let key = DocumentsListKey(Uuid::new_v4());
        let fetches = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..40 {
            let cache = Arc::clone(&cache);
            let fetches = Arc::clone(&fetches);
            handles.push(tokio::spawn(async move {
                get_or_compute(&cache, &key, || async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
                    Ok(vec![doc("shared")])
                })
                .await
                .unwrap()
            }));
        }

        for handle in handles {
            let value = handle.await.unwrap();
            assert_eq!(value[0].title, "shared");
        }

        // One election winner; contenders are served by the cache poll.
        assert!(fetches.load(Ordering::SeqCst) < 40);
        assert!(fetches.load(Ordering::SeqCst) >= 1);
    }
}
