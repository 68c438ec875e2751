//! # Deterministic Invalidation
//!
//! One function per invalidation trigger in the namespace table. Handlers
//! call these immediately after a successful commit — never before, so a
//! stampede cannot repopulate pre-commit state. Overshoot is allowed;
//! undershoot is not.
//!
//! Failures are absorbed: an unreachable cache means the TTL band becomes
//! the staleness bound, which every namespace tolerates by design.

use uuid::Uuid;

use super::keys::{
    member_pattern_for_workspace, tasks_pattern_for_workspace, CacheKey, DocumentsListKey,
    MemberKey, MembersKey, ProjectsListKey, TeamsListKey, WorkspaceKey,
};
use super::CacheClient;

/// Membership mutation for `(principal, workspace)`: drop the pair's
/// resolver entry and the workspace member listing.
pub async fn membership_changed(cache: &CacheClient, workspace_id: Uuid, principal_id: Uuid) {
    let _ = cache
        .delete(&MemberKey { principal_id, workspace_id }.render())
        .await;
    let _ = cache.delete(&MembersKey(workspace_id).render()).await;
}

/// Workspace settings/name update.
pub async fn workspace_updated(cache: &CacheClient, workspace_id: Uuid) {
    let _ = cache.delete(&WorkspaceKey(workspace_id).render()).await;
}

/// Workspace deletion: every namespace scoped to the workspace goes.
pub async fn workspace_deleted(cache: &CacheClient, workspace_id: Uuid) {
    let _ = cache
        .delete_pattern(&member_pattern_for_workspace(workspace_id))
        .await;
    let _ = cache.delete(&MembersKey(workspace_id).render()).await;
    let _ = cache.delete(&WorkspaceKey(workspace_id).render()).await;
    let _ = cache.delete(&DocumentsListKey(workspace_id).render()).await;
    let _ = cache
        .delete_pattern(&tasks_pattern_for_workspace(workspace_id))
        .await;
    let _ = cache.delete(&ProjectsListKey(workspace_id).render()).await;
    let _ = cache.delete(&TeamsListKey(workspace_id).render()).await;
}

/// Document create/update/delete/archive.
pub async fn documents_changed(cache: &CacheClient, workspace_id: Uuid) {
    let _ = cache.delete(&DocumentsListKey(workspace_id).render()).await;
}

/// Task mutation: paginated keys are pattern-deleted.
pub async fn tasks_changed(cache: &CacheClient, workspace_id: Uuid) {
    let _ = cache
        .delete_pattern(&tasks_pattern_for_workspace(workspace_id))
        .await;
}

/// Project mutation.
pub async fn projects_changed(cache: &CacheClient, workspace_id: Uuid) {
    let _ = cache.delete(&ProjectsListKey(workspace_id).render()).await;
}

/// Team or team-membership mutation.
pub async fn teams_changed(cache: &CacheClient, workspace_id: Uuid) {
    let _ = cache.delete(&TeamsListKey(workspace_id).render()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::TasksListKey;
    use crate::models::TaskPage;

    #[tokio::test]
    async fn test_membership_invalidation_drops_both_keys() {
        let cache = CacheClient::in_memory();
        let (w, p) = (Uuid::new_v4(), Uuid::new_v4());

        cache
            .set(&MembersKey(w), &vec![])
            .await
            .unwrap();
        cache
            .set(
                &MemberKey { principal_id: p, workspace_id: w },
                &crate::cache::keys::MembershipLookup::Absent { cached_at: chrono::Utc::now() },
            )
            .await
            .unwrap();

        membership_changed(&cache, w, p).await;

        assert!(cache.get(&MembersKey(w)).await.is_none());
        assert!(cache
            .get(&MemberKey { principal_id: p, workspace_id: w })
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_tasks_invalidation_is_pattern_wide() {
        let cache = CacheClient::in_memory();
        let w = Uuid::new_v4();
        let other = Uuid::new_v4();
        let empty = TaskPage { items: vec![], total: 0, page: 1, limit: 20 };

        for page in 1..=3 {
            cache
                .set(&TasksListKey { workspace_id: w, page, limit: 20 }, &empty)
                .await
                .unwrap();
        }
        cache
            .set(&TasksListKey { workspace_id: other, page: 1, limit: 20 }, &empty)
            .await
            .unwrap();

        tasks_changed(&cache, w).await;

        for page in 1..=3 {
            assert!(cache
                .get(&TasksListKey { workspace_id: w, page, limit: 20 })
                .await
                .is_none());
        }
        assert!(cache
            .get(&TasksListKey { workspace_id: other, page: 1, limit: 20 })
            .await
            .is_some());
    }
}
