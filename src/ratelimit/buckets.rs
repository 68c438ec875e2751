//! Static rate-limit bucket declarations.
//!
//! Buckets are fixed at compile time; routes reference them by constant.
//! The table covers the whole API surface, including collaborator routes
//! (export, upload, notifications) that mount outside this crate.

use std::time::Duration;

/// A named fixed-window configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    /// Stable bucket name; part of the counter key
    pub name: &'static str,
    /// Window length
    pub window: Duration,
    /// Maximum allowed requests per window
    pub max_requests: u32,
}

const MINUTE: Duration = Duration::from_secs(60);

/// Login and registration attempts.
pub const AUTH: Bucket = Bucket { name: "auth", window: Duration::from_secs(15 * 60), max_requests: 5 };
/// PDF/Markdown export.
pub const EXPORT: Bucket = Bucket { name: "export", window: MINUTE, max_requests: 10 };
/// Search queries.
pub const SEARCH: Bucket = Bucket { name: "search", window: MINUTE, max_requests: 100 };
/// General fallback.
pub const API: Bucket = Bucket { name: "api", window: Duration::from_secs(60 * 60), max_requests: 1000 };
/// General upload.
pub const UPLOAD: Bucket = Bucket { name: "upload", window: MINUTE, max_requests: 20 };
/// Large file upload.
pub const FILE_UPLOAD: Bucket = Bucket { name: "file_upload", window: MINUTE, max_requests: 10 };
/// Workspace creation.
pub const CREATE_WORKSPACE: Bucket = Bucket { name: "create_workspace", window: MINUTE, max_requests: 3 };
/// Document creation.
pub const CREATE_DOCUMENT: Bucket = Bucket { name: "create_document", window: MINUTE, max_requests: 30 };
/// Task creation.
pub const CREATE_TASK: Bucket = Bucket { name: "create_task", window: MINUTE, max_requests: 30 };
/// Project creation.
pub const CREATE_PROJECT: Bucket = Bucket { name: "create_project", window: MINUTE, max_requests: 10 };
/// Team creation.
pub const CREATE_TEAM: Bucket = Bucket { name: "create_team", window: MINUTE, max_requests: 10 };
/// Resource update.
pub const UPDATE: Bucket = Bucket { name: "update", window: MINUTE, max_requests: 60 };
/// Resource deletion.
pub const DELETE: Bucket = Bucket { name: "delete", window: MINUTE, max_requests: 10 };
/// Notification reads.
pub const NOTIFICATION: Bucket = Bucket { name: "notification", window: MINUTE, max_requests: 100 };

/// Every declared bucket.
pub const ALL: &[&Bucket] = &[
    &AUTH,
    &EXPORT,
    &SEARCH,
    &API,
    &UPLOAD,
    &FILE_UPLOAD,
    &CREATE_WORKSPACE,
    &CREATE_DOCUMENT,
    &CREATE_TASK,
    &CREATE_PROJECT,
    &CREATE_TEAM,
    &UPDATE,
    &DELETE,
    &NOTIFICATION,
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_unique() {
        let names: HashSet<&str> = ALL.iter().map(|b| b.name).collect();
        assert_eq!(names.len(), ALL.len());
    }

    #[test]
    fn test_windows_positive() {
        for bucket in ALL {
            assert!(bucket.window >= Duration::from_secs(1), "{}", bucket.name);
            assert!(bucket.max_requests > 0, "{}", bucket.name);
        }
    }

    #[test]
    fn test_creation_family_bounds() {
        for bucket in ALL.iter().filter(|b| b.name.starts_with("create_")) {
            assert!(
                (3..=30).contains(&bucket.max_requests),
                "{} outside the create_* band",
                bucket.name
            );
        }
    }
}
