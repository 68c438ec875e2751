//! # Membership Resolver
//!
//! The single decision point for "may principal P act on workspace W with
//! role ≥ R?". Lookups are cache-fronted under `member:{p}:{w}` with an
//! explicit negative sentinel; misses fall back to the source of truth
//! behind a per-pair stampede guard.
//!
//! Authorization never trusts a stale negative: a sentinel older than one
//! second is re-verified against the source before denying.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::invalidation;
use crate::cache::keys::{MemberKey, MembershipLookup, MembersKey, member_pattern_for_workspace};
use crate::cache::lock::{LockHandle, MAX_RETRIES, RETRY_DELAY};
use crate::cache::{CacheClient, CacheKey};
use crate::error::{AppError, AppResult};

use super::{Membership, Role};

/// Seconds a negative sentinel may be trusted without re-verification.
const NEGATIVE_TRUST_SECS: i64 = 1;
/// Warm-up resolution deadline.
const WARM_UP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// The authoritative membership store.
#[async_trait]
pub trait MembershipSource: Send + Sync {
    /// Fetch the membership row for a pair, if any.
    async fn fetch(
        &self,
        workspace_id: Uuid,
        principal_id: Uuid,
    ) -> AppResult<Option<Membership>>;
}

/// Postgres-backed source of truth.
pub struct PgMembershipSource {
    pool: PgPool,
}

impl PgMembershipSource {
    /// Wrap a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipSource for PgMembershipSource {
    async fn fetch(
        &self,
        workspace_id: Uuid,
        principal_id: Uuid,
    ) -> AppResult<Option<Membership>> {
        let membership = sqlx::query_as::<_, Membership>(
            "SELECT workspace_id, principal_id, role, joined_at \
             FROM memberships WHERE workspace_id = $1 AND principal_id = $2",
        )
        .bind(workspace_id)
        .bind(principal_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(membership)
    }
}

/// Cache-fronted membership resolver.
pub struct MembershipResolver {
    cache: Arc<CacheClient>,
    source: Arc<dyn MembershipSource>,
}

impl MembershipResolver {
    /// Create a resolver over the shared cache and a source of truth.
    pub fn new(cache: Arc<CacheClient>, source: Arc<dyn MembershipSource>) -> Self {
        Self { cache, source }
    }

    /// Resolve the pair's membership, optionally gated on a minimum role.
    ///
    /// Non-members and members below `minimum_role` both resolve to
    /// `forbidden`.
    pub async fn resolve(
        &self,
        workspace_id: Uuid,
        principal_id: Uuid,
        minimum_role: Option<Role>,
    ) -> AppResult<Membership> {
        let key = MemberKey { principal_id, workspace_id };

        let resolved = match self.cache.get(&key).await {
            Some(MembershipLookup::Present { membership }) => Some(membership),
            Some(MembershipLookup::Absent { cached_at })
                if Utc::now() - cached_at
                    <= ChronoDuration::seconds(NEGATIVE_TRUST_SECS) =>
            {
                None
            }
            // Not cached, or a negative old enough to re-verify.
            _ => self.resolve_from_source(key).await?,
        };

        let membership = resolved.ok_or_else(|| {
            AppError::forbidden("Not a member of this workspace")
                .with_field("workspaceId", workspace_id.to_string().into())
        })?;

        if let Some(minimum) = minimum_role {
            if !membership.role.at_least(minimum) {
                return Err(AppError::forbidden(format!(
                    "Requires {} role or above",
                    minimum
                ))
                .with_field("workspaceId", workspace_id.to_string().into())
                .with_field("role", membership.role.as_str().into()));
            }
        }

        Ok(membership)
    }

    /// Query the source of truth under the per-pair stampede guard and write
    /// the positive or negative sentinel back.
    async fn resolve_from_source(&self, key: MemberKey) -> AppResult<Option<Membership>> {
        let mut held = None;
        for attempt in 0..=MAX_RETRIES {
            if let Some(handle) = LockHandle::try_acquire(&self.cache, &key.render()).await {
                held = Some(handle);
                break;
            }
            if attempt < MAX_RETRIES {
                tokio::time::sleep(RETRY_DELAY).await;
                // The lock holder may have populated the key meanwhile.
                match self.cache.get(&key).await {
                    Some(MembershipLookup::Present { membership }) => {
                        return Ok(Some(membership))
                    }
                    Some(MembershipLookup::Absent { .. }) => return Ok(None),
                    None => {}
                }
            }
        }
        // Proceeding without the lock is safe: the query is idempotent.

        let fetched = self
            .source
            .fetch(key.workspace_id, key.principal_id)
            .await;

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(err) => {
                if let Some(handle) = held {
                    handle.release(&self.cache).await;
                }
                return Err(err);
            }
        };

        let lookup = match &fetched {
            Some(membership) => MembershipLookup::Present { membership: membership.clone() },
            None => MembershipLookup::Absent { cached_at: Utc::now() },
        };
        let _ = self.cache.set(&key, &lookup).await;

        if let Some(handle) = held {
            handle.release(&self.cache).await;
        }
        Ok(fetched)
    }

    /// Drop the pair's resolver entry and the workspace member listing.
    pub async fn invalidate(&self, workspace_id: Uuid, principal_id: Uuid) {
        invalidation::membership_changed(&self.cache, workspace_id, principal_id).await;
    }

    /// Invalidate, then re-resolve in a detached task so the next request
    /// hits the cache. Warm-up failures are swallowed.
    pub async fn invalidate_and_warm(&self, workspace_id: Uuid, principal_id: Uuid) {
        self.invalidate(workspace_id, principal_id).await;

        let warm = Self {
            cache: Arc::clone(&self.cache),
            source: Arc::clone(&self.source),
        };
        tokio::spawn(async move {
            let outcome = tokio::time::timeout(
                WARM_UP_TIMEOUT,
                warm.resolve_from_source(MemberKey { principal_id, workspace_id }),
            )
            .await;
            if let Ok(Err(err)) = outcome {
                tracing::debug!(
                    workspace = %workspace_id,
                    principal = %principal_id,
                    error = %err,
                    "membership warm-up failed"
                );
            }
        });
    }

    /// Workspace deletion: pattern-delete every pair entry plus the member
    /// listing.
    pub async fn workspace_deleted(&self, workspace_id: Uuid) {
        let _ = self
            .cache
            .delete_pattern(&member_pattern_for_workspace(workspace_id))
            .await;
        let _ = self.cache.delete(&MembersKey(workspace_id).render()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MapSource {
        rows: Mutex<HashMap<(Uuid, Uuid), Membership>>,
        fetches: AtomicUsize,
    }

    impl MapSource {
        fn new() -> Self {
            Self { rows: Mutex::new(HashMap::new()), fetches: AtomicUsize::new(0) }
        }

        fn grant(&self, workspace_id: Uuid, principal_id: Uuid, role: Role) {
            self.rows.lock().insert(
                (workspace_id, principal_id),
                Membership { workspace_id, principal_id, role, joined_at: Utc::now() },
            );
        }

        fn revoke(&self, workspace_id: Uuid, principal_id: Uuid) {
            self.rows.lock().remove(&(workspace_id, principal_id));
        }
    }

    #[async_trait]
    impl MembershipSource for MapSource {
        async fn fetch(&self, w: Uuid, p: Uuid) -> AppResult<Option<Membership>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.lock().get(&(w, p)).cloned())
        }
    }

    fn setup() -> (Arc<MembershipResolver>, Arc<MapSource>, Uuid, Uuid) {
        let source = Arc::new(MapSource::new());
        let resolver = Arc::new(MembershipResolver::new(
            Arc::new(CacheClient::in_memory()),
            Arc::clone(&source) as Arc<dyn MembershipSource>,
        ));
        (resolver, source, Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_resolves_and_caches_positive() {
        let (resolver, source, w, p) = setup();
        source.grant(w, p, Role::Editor);

        let first = resolver.resolve(w, p, None).await.unwrap();
        assert_eq!(first.role, Role::Editor);

        let second = resolver.resolve(w, p, None).await.unwrap();
        assert_eq!(second.role, Role::Editor);
        // Second hit served from cache.
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_minimum_role_gate() {
        let (resolver, source, w, p) = setup();
        source.grant(w, p, Role::Viewer);

        assert!(resolver.resolve(w, p, Some(Role::Viewer)).await.is_ok());
        let err = resolver.resolve(w, p, Some(Role::Editor)).await.unwrap_err();
        assert_eq!(err.kind.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_non_member_denied_with_negative_sentinel() {
        let (resolver, _source, w, p) = setup();

        let err = resolver.resolve(w, p, None).await.unwrap_err();
        assert_eq!(err.kind.code(), "FORBIDDEN");

        // A fresh negative sentinel is trusted without a source round-trip.
        let err = resolver.resolve(w, p, None).await.unwrap_err();
        assert_eq!(err.kind.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_add_then_remove_leaves_denied() {
        let (resolver, source, w, p) = setup();
        source.grant(w, p, Role::Viewer);
        assert!(resolver.resolve(w, p, None).await.is_ok());

        source.revoke(w, p);
        resolver.invalidate(w, p).await;

        let err = resolver.resolve(w, p, None).await.unwrap_err();
        assert_eq!(err.kind.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_invalidation_makes_grants_visible() {
        let (resolver, source, w, p) = setup();

        assert!(resolver.resolve(w, p, None).await.is_err());
        source.grant(w, p, Role::Admin);
        resolver.invalidate(w, p).await;

        let membership = resolver.resolve(w, p, None).await.unwrap();
        assert_eq!(membership.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_warm_up_populates_cache() {
        let (resolver, source, w, p) = setup();
        source.grant(w, p, Role::Editor);

        resolver.invalidate_and_warm(w, p).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let before = source.fetches.load(Ordering::SeqCst);
        assert!(resolver.resolve(w, p, None).await.is_ok());
        // Resolution was served by the warmed cache.
        assert_eq!(source.fetches.load(Ordering::SeqCst), before);
    }
}
