//! # Cache Key Namespaces
//!
//! Every cache namespace is a typed key: a struct that renders its key
//! string and pins the value DTO plus TTL band at compile time. Reading a
//! value back under the wrong namespace is a type error, not a runtime
//! surprise.
//!
//! Authoritative namespace table:
//!
//! | Namespace | TTL | Invalidated on |
//! |-----------|-----|----------------|
//! | `session:` | ≤ session expiry | logout, renewal |
//! | `member:` | 30 min | membership mutation for the pair |
//! | `members:` | 10 min | any membership mutation on the workspace |
//! | `workspace:` | 30 min | workspace update |
//! | `documents_list:` | 5 min | document create/update/delete/archive |
//! | `tasks_list:` | 5 min | task mutation (pattern delete) |
//! | `projects_list:` | 5 min | project mutation |
//! | `teams_list:` | 5 min | team or team-membership mutation |
//! | `search:` | 2 min | time-bound only |
//! | `rate_limit:` | bucket window | automatic |

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::membership::Membership;
use crate::models::{
    DocumentSummary, MemberEntry, Principal, ProjectSummary, SearchHit, SessionRecord,
    TaskPage, TeamSummary, Workspace,
};

/// A typed cache key: namespace, value shape, and TTL band in one place.
pub trait CacheKey {
    /// DTO stored under this namespace.
    type Value: Serialize + DeserializeOwned + Send + Sync;

    /// TTL band for this namespace.
    const TTL: Duration;

    /// Render the concrete key string.
    fn render(&self) -> String;
}

/// Stampede-guard key for an arbitrary cache key.
pub fn lock_key(key: &str) -> String {
    format!("lock:{}", key)
}

/// Counter key for a rate-limit bucket and principal.
pub fn rate_limit_key(bucket: &str, principal: &str) -> String {
    format!("rate_limit:{}:{}", bucket, principal)
}

// ============================================================================
// Sessions
// ============================================================================

/// Value cached under `session:{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSession {
    /// The session row
    pub session: SessionRecord,
    /// The owning principal
    pub principal: Principal,
}

/// `session:{id}` — invalidated on logout and renewal. The effective TTL is
/// capped at the session's remaining lifetime by the caller.
#[derive(Debug, Clone)]
pub struct SessionKey<'a>(pub &'a str);

impl CacheKey for SessionKey<'_> {
    type Value = CachedSession;
    const TTL: Duration = Duration::from_secs(24 * 60 * 60);

    fn render(&self) -> String {
        format!("session:{}", self.0)
    }
}

// ============================================================================
// Membership
// ============================================================================

/// Explicit presence sentinel for membership lookups: "verified absent" is
/// distinct from "not cached".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MembershipLookup {
    /// The pair is a member with the embedded role
    Present {
        /// The membership row
        membership: Membership,
    },
    /// Authoritatively verified not a member
    Absent {
        /// When the absence was verified
        cached_at: DateTime<Utc>,
    },
}

/// `member:{principal}:{workspace}` — invalidated on membership mutation for
/// the pair.
#[derive(Debug, Clone, Copy)]
pub struct MemberKey {
    /// Principal side of the pair
    pub principal_id: Uuid,
    /// Workspace side of the pair
    pub workspace_id: Uuid,
}

impl CacheKey for MemberKey {
    type Value = MembershipLookup;
    const TTL: Duration = Duration::from_secs(30 * 60);

    fn render(&self) -> String {
        format!("member:{}:{}", self.principal_id, self.workspace_id)
    }
}

/// Pattern matching every `member:` key for a workspace (workspace delete).
pub fn member_pattern_for_workspace(workspace_id: Uuid) -> String {
    format!("member:*:{}", workspace_id)
}

/// `members:{workspace}` — invalidated on any membership mutation.
#[derive(Debug, Clone, Copy)]
pub struct MembersKey(pub Uuid);

impl CacheKey for MembersKey {
    type Value = Vec<MemberEntry>;
    const TTL: Duration = Duration::from_secs(10 * 60);

    fn render(&self) -> String {
        format!("members:{}", self.0)
    }
}

// ============================================================================
// Workspaces & Resource Lists
// ============================================================================

/// `workspace:{id}` — invalidated on workspace update.
#[derive(Debug, Clone, Copy)]
pub struct WorkspaceKey(pub Uuid);

impl CacheKey for WorkspaceKey {
    type Value = Workspace;
    const TTL: Duration = Duration::from_secs(30 * 60);

    fn render(&self) -> String {
        format!("workspace:{}", self.0)
    }
}

/// `documents_list:{workspace}` — invalidated on any document mutation.
#[derive(Debug, Clone, Copy)]
pub struct DocumentsListKey(pub Uuid);

impl CacheKey for DocumentsListKey {
    type Value = Vec<DocumentSummary>;
    const TTL: Duration = Duration::from_secs(5 * 60);

    fn render(&self) -> String {
        format!("documents_list:{}", self.0)
    }
}

/// `tasks_list:workspace:{w}:page:{p}:limit:{l}` — pattern-invalidated on
/// any task mutation in the workspace.
#[derive(Debug, Clone, Copy)]
pub struct TasksListKey {
    /// Workspace
    pub workspace_id: Uuid,
    /// Page number (1-indexed)
    pub page: u32,
    /// Page size
    pub limit: u32,
}

impl CacheKey for TasksListKey {
    type Value = TaskPage;
    const TTL: Duration = Duration::from_secs(5 * 60);

    fn render(&self) -> String {
        format!(
            "tasks_list:workspace:{}:page:{}:limit:{}",
            self.workspace_id, self.page, self.limit
        )
    }
}

/// Pattern matching every tasks page for a workspace.
pub fn tasks_pattern_for_workspace(workspace_id: Uuid) -> String {
    format!("tasks_list:workspace:{}:*", workspace_id)
}

/// `projects_list:{workspace}` — invalidated on project mutation.
#[derive(Debug, Clone, Copy)]
pub struct ProjectsListKey(pub Uuid);

impl CacheKey for ProjectsListKey {
    type Value = Vec<ProjectSummary>;
    const TTL: Duration = Duration::from_secs(5 * 60);

    fn render(&self) -> String {
        format!("projects_list:{}", self.0)
    }
}

/// `teams_list:{workspace}` — invalidated on team or team-membership
/// mutation.
#[derive(Debug, Clone, Copy)]
pub struct TeamsListKey(pub Uuid);

impl CacheKey for TeamsListKey {
    type Value = Vec<TeamSummary>;
    const TTL: Duration = Duration::from_secs(5 * 60);

    fn render(&self) -> String {
        format!("teams_list:{}", self.0)
    }
}

// ============================================================================
// Search
// ============================================================================

/// `search:{digest}` — time-bound only; the digest covers every input that
/// changes the result.
#[derive(Debug, Clone)]
pub struct SearchKey {
    /// Normalized query string
    pub query: String,
    /// Workspace scope
    pub workspace_id: Uuid,
    /// Result limit
    pub limit: u32,
}

impl CacheKey for SearchKey {
    type Value = Vec<SearchHit>;
    const TTL: Duration = Duration::from_secs(2 * 60);

    fn render(&self) -> String {
        let digest = md5::compute(format!(
            "{}|{}|{}",
            self.query, self.workspace_id, self.limit
        ));
        format!("search:{:x}", digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::Role;

    #[test]
    fn test_key_shapes() {
        let p = Uuid::nil();
        let w = Uuid::nil();
        assert_eq!(
            MemberKey { principal_id: p, workspace_id: w }.render(),
            format!("member:{}:{}", p, w)
        );
        assert_eq!(MembersKey(w).render(), format!("members:{}", w));
        assert_eq!(
            TasksListKey { workspace_id: w, page: 2, limit: 20 }.render(),
            format!("tasks_list:workspace:{}:page:2:limit:20", w)
        );
        assert_eq!(rate_limit_key("auth", "anonymous"), "rate_limit:auth:anonymous");
        assert_eq!(lock_key("members:x"), "lock:members:x");
    }

    #[test]
    fn test_search_key_is_input_sensitive() {
        let w = Uuid::new_v4();
        let base = SearchKey { query: "plan".to_string(), workspace_id: w, limit: 20 };
        let other_query = SearchKey { query: "plans".to_string(), ..base.clone() };
        let other_limit = SearchKey { limit: 50, ..base.clone() };

        assert_ne!(base.render(), other_query.render());
        assert_ne!(base.render(), other_limit.render());
        assert!(base.render().starts_with("search:"));
    }

    #[test]
    fn test_sentinel_round_trip() {
        let absent = MembershipLookup::Absent { cached_at: Utc::now() };
        let json = serde_json::to_string(&absent).unwrap();
        assert!(json.contains("\"state\":\"absent\""));

        let present = MembershipLookup::Present {
            membership: Membership {
                workspace_id: Uuid::new_v4(),
                principal_id: Uuid::new_v4(),
                role: Role::Editor,
                joined_at: Utc::now(),
            },
        };
        let json = serde_json::to_string(&present).unwrap();
        let back: MembershipLookup = serde_json::from_str(&json).unwrap();
        match back {
            MembershipLookup::Present { membership } => assert_eq!(membership.role, Role::Editor),
            MembershipLookup::Absent { .. } => panic!("lost presence state"),
        }
    }

    #[test]
    fn test_ttl_bands() {
        assert_eq!(MemberKey { principal_id: Uuid::nil(), workspace_id: Uuid::nil() }
            .ttl_secs(), 30 * 60);
        assert_eq!(MembersKey(Uuid::nil()).ttl_secs(), 10 * 60);
        assert_eq!(DocumentsListKey(Uuid::nil()).ttl_secs(), 5 * 60);
        assert_eq!(
            SearchKey { query: String::new(), workspace_id: Uuid::nil(), limit: 0 }.ttl_secs(),
            2 * 60
        );
    }
}

#[cfg(test)]
trait TtlSecs {
    fn ttl_secs(&self) -> u64;
}

#[cfg(test)]
impl<K: CacheKey> TtlSecs for K {
    fn ttl_secs(&self) -> u64 {
        K::TTL.as_secs()
    }
}
