//! # Core Entities & Cached DTOs
//!
//! Row types fetched from the source of truth and the DTO shapes stored in
//! the cache. Every cached namespace has a named value type here or in
//! [`crate::cache::keys`]; the cache API is generic over these types so a
//! value can never be read back under the wrong namespace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::membership::Role;

// ============================================================================
// Principals & Sessions
// ============================================================================

/// An authenticated actor.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// Stable identifier
    pub id: Uuid,
    /// Unique email
    pub email: String,
    /// Display name
    pub name: String,
    /// Argon2 hash; never serialized into responses or the cache
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    /// Registration time
    pub created_at: DateTime<Utc>,
}

/// A session row. The id is opaque; the cookie carries `id.hmac`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Opaque session identifier
    pub id: String,
    /// Owning principal
    pub principal_id: Uuid,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Absolute expiry; a session exactly at expiry is invalid
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// I2: valid iff strictly before expiry.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

// ============================================================================
// Workspaces
// ============================================================================

/// Top-level tenancy container.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    /// Identifier
    pub id: Uuid,
    /// Globally unique slug
    pub slug: String,
    /// Display name
    pub name: String,
    /// Creating principal
    pub created_by: Uuid,
    /// Settings blob
    pub settings: serde_json::Value,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// A member row joined with principal display fields, as cached under
/// `members:{workspace}`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MemberEntry {
    /// Member principal
    pub principal_id: Uuid,
    /// Display name
    pub name: String,
    /// Email
    pub email: String,
    /// Granted role
    pub role: Role,
    /// Join time
    pub joined_at: DateTime<Utc>,
}

// ============================================================================
// Resources
// ============================================================================

/// Document row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Identifier
    pub id: Uuid,
    /// Owning workspace
    pub workspace_id: Uuid,
    /// Title
    pub title: String,
    /// Body content
    pub content: String,
    /// Archived flag
    pub archived: bool,
    /// Author
    pub created_by: Uuid,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Document listing entry, as cached under `documents_list:{workspace}`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    /// Identifier
    pub id: Uuid,
    /// Title
    pub title: String,
    /// Archived flag
    pub archived: bool,
    /// Author
    pub created_by: Uuid,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Task row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Identifier
    pub id: Uuid,
    /// Owning workspace
    pub workspace_id: Uuid,
    /// Title
    pub title: String,
    /// Status column (e.g. `todo`, `doing`, `done`)
    pub status: String,
    /// Author
    pub created_by: Uuid,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Task listing entry.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    /// Identifier
    pub id: Uuid,
    /// Title
    pub title: String,
    /// Status column
    pub status: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// One page of tasks, as cached under
/// `tasks_list:workspace:{w}:page:{p}:limit:{l}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPage {
    /// Page items
    pub items: Vec<TaskSummary>,
    /// Total task count in the workspace
    pub total: i64,
    /// Page number (1-indexed)
    pub page: u32,
    /// Page size
    pub limit: u32,
}

/// Project listing entry, as cached under `projects_list:{workspace}`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    /// Identifier
    pub id: Uuid,
    /// Name
    pub name: String,
    /// Description
    pub description: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Team listing entry, as cached under `teams_list:{workspace}`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TeamSummary {
    /// Identifier
    pub id: Uuid,
    /// Name
    pub name: String,
    /// Member count
    pub member_count: i64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Search
// ============================================================================

/// One search result, as cached under `search:{digest}`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    /// Resource kind (`document`, `task`, `project`)
    pub kind: String,
    /// Resource identifier
    pub id: Uuid,
    /// Matched title
    pub title: String,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_session_validity_boundary() {
        let now = Utc::now();
        let session = SessionRecord {
            id: "s".to_string(),
            principal_id: Uuid::new_v4(),
            created_at: now - Duration::days(1),
            expires_at: now,
        };
        // Exactly at expiry is rejected.
        assert!(!session.is_valid_at(now));
        assert!(session.is_valid_at(now - Duration::seconds(1)));
        assert!(!session.is_valid_at(now + Duration::seconds(1)));
    }

    #[test]
    fn test_principal_never_serializes_hash() {
        let principal = Principal {
            id: Uuid::new_v4(),
            email: "a@b.c".to_string(),
            name: "A".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&principal).unwrap();
        assert!(!json.contains("argon2"));
        assert!(!json.contains("passwordHash"));
    }
}
