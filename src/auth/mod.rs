//! # Authentication
//!
//! Session lifecycle, CSRF protection, password policy, and the
//! configuration-driven system-admin override.

use std::collections::HashSet;

use crate::config::AppConfig;
use crate::models::Principal;

pub mod csrf;
pub mod password;
pub mod session;

pub use session::{AuthenticatedSession, SessionManager, SESSION_COOKIE};

/// The configured system-admin override set.
///
/// A principal whose id or email appears here is treated as holding `owner`
/// on every workspace by routes that opt into the system-admin predicate.
/// The override is evaluated before the membership resolver and never
/// touches its cache.
#[derive(Debug, Default)]
pub struct AdminSet {
    ids: HashSet<String>,
    emails: HashSet<String>,
}

impl AdminSet {
    /// Build from configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ids: config.system_admin_ids.iter().cloned().collect(),
            emails: config
                .system_admin_emails
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
        }
    }

    /// Build from explicit lists.
    pub fn new(ids: Vec<String>, emails: Vec<String>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            emails: emails.into_iter().map(|e| e.to_lowercase()).collect(),
        }
    }

    /// Whether the principal holds the override.
    pub fn is_admin(&self, principal: &Principal) -> bool {
        self.ids.contains(&principal.id.to_string())
            || self.emails.contains(&principal.email.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn principal(email: &str) -> Principal {
        Principal {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: "T".to_string(),
            password_hash: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_admin_by_email_case_insensitive() {
        let admins = AdminSet::new(vec![], vec!["Root@Kollab.App".to_string()]);
        assert!(admins.is_admin(&principal("root@kollab.app")));
        assert!(!admins.is_admin(&principal("user@kollab.app")));
    }

    #[test]
    fn test_admin_by_id() {
        let p = principal("a@b.c");
        let admins = AdminSet::new(vec![p.id.to_string()], vec![]);
        assert!(admins.is_admin(&p));
    }

    #[test]
    fn test_empty_set_grants_nothing() {
        assert!(!AdminSet::default().is_admin(&principal("a@b.c")));
    }
}
