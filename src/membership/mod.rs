//! # Workspace Membership
//!
//! The `(workspace, principal, role)` triple that authorizes every resource
//! access, plus the cache-fronted resolver built on top of it.
//!
//! Role ordering is total and monotonic: `viewer < editor < admin < owner`.
//! Every "role ≥ X" predicate in the codebase goes through [`Role`]'s `Ord`
//! implementation; nothing compares role names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod resolver;

pub use resolver::{MembershipResolver, MembershipSource, PgMembershipSource};

// ============================================================================
// Roles
// ============================================================================

/// Workspace role. Variant order defines the authorization lattice.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    /// Read-only access
    Viewer,
    /// Create and edit resources
    Editor,
    /// Manage members and workspace settings
    Admin,
    /// Full control; exactly one per workspace
    Owner,
}

impl Role {
    /// Monotonic "role ≥ minimum" predicate.
    pub fn at_least(self, minimum: Role) -> bool {
        self >= minimum
    }

    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Editor => "editor",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viewer" => Ok(Self::Viewer),
            "editor" => Ok(Self::Editor),
            "admin" => Ok(Self::Admin),
            "owner" => Ok(Self::Owner),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

// ============================================================================
// Membership
// ============================================================================

/// A principal's membership in a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    /// Workspace the membership belongs to
    pub workspace_id: Uuid,
    /// Member principal
    pub principal_id: Uuid,
    /// Granted role
    pub role: Role,
    /// When the principal joined
    pub joined_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL_ROLES: [Role; 4] = [Role::Viewer, Role::Editor, Role::Admin, Role::Owner];

    #[test]
    fn test_role_ordering() {
        assert!(Role::Viewer < Role::Editor);
        assert!(Role::Editor < Role::Admin);
        assert!(Role::Admin < Role::Owner);
    }

    #[test]
    fn test_at_least() {
        assert!(Role::Owner.at_least(Role::Viewer));
        assert!(Role::Editor.at_least(Role::Editor));
        assert!(!Role::Viewer.at_least(Role::Editor));
        assert!(!Role::Admin.at_least(Role::Owner));
    }

    #[test]
    fn test_round_trip_names() {
        for role in ALL_ROLES {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Owner).unwrap(), "\"owner\"");
        let parsed: Role = serde_json::from_str("\"viewer\"").unwrap();
        assert_eq!(parsed, Role::Viewer);
    }

    proptest! {
        // at_least is exactly the Ord relation, for every pair.
        #[test]
        fn prop_at_least_is_monotonic(a in 0usize..4, b in 0usize..4) {
            let (ra, rb) = (ALL_ROLES[a], ALL_ROLES[b]);
            prop_assert_eq!(ra.at_least(rb), a >= b);
        }
    }
}
