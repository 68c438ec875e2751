//! # Configuration
//!
//! Environment-driven configuration for the Kollab server. Required
//! variables fail fast at startup; optional ones carry documented defaults.

use std::env;
use thiserror::Error;

/// Default absolute session expiry in days.
pub const DEFAULT_SESSION_EXPIRY_DAYS: u32 = 30;
/// Default search index sync batch size.
pub const DEFAULT_SEARCH_SYNC_BATCH_SIZE: u32 = 500;
/// Hard cap on the search index sync batch size.
pub const MAX_SEARCH_SYNC_BATCH_SIZE: u32 = 2000;
/// Default request body ceiling (100 MiB).
pub const DEFAULT_MAX_UPLOAD_SIZE_BYTES: u64 = 100 * 1024 * 1024;
/// Default listen port.
pub const DEFAULT_PORT: u16 = 3000;

/// Configuration errors raised during startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required environment variable is absent
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    /// A variable is present but unparsable
    #[error("Invalid value for {variable}: {reason}")]
    Invalid {
        /// Variable name
        variable: &'static str,
        /// Why parsing failed
        reason: String,
    },
}

/// Runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Human-readable logs, relaxed cookie security
    Development,
    /// JSON logs, Secure cookies, suppressed 500 details
    Production,
}

impl Environment {
    /// Whether this is the production environment.
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Server configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Source-of-truth DSN
    pub database_url: String,
    /// Cache datastore DSN
    pub cache_url: String,
    /// Session HMAC material
    pub auth_secret: String,
    /// CORS allow-list anchor
    pub frontend_url: String,
    /// Absolute session expiry in days
    pub session_expiry_days: u32,
    /// Principal ids granted the system-admin override
    pub system_admin_ids: Vec<String>,
    /// Emails granted the system-admin override
    pub system_admin_emails: Vec<String>,
    /// Search index sync batch size (capped at 2000)
    pub search_sync_batch_size: u32,
    /// Request body ceiling in bytes
    pub max_upload_size_bytes: u64,
    /// Seed a demo principal at startup
    pub enable_demo_mode: bool,
    /// Listen port
    pub port: u16,
    /// Runtime environment
    pub environment: Environment,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = required("DATABASE_URL")?;
        let cache_url = required("CACHE_URL")?;
        let auth_secret = required("AUTH_SECRET")?;
        let frontend_url = required("FRONTEND_URL")?;

        if auth_secret.len() < 16 {
            return Err(ConfigError::Invalid {
                variable: "AUTH_SECRET",
                reason: "must be at least 16 bytes".to_string(),
            });
        }

        let session_expiry_days =
            parse_or("SESSION_EXPIRY_DAYS", DEFAULT_SESSION_EXPIRY_DAYS)?;
        let search_sync_batch_size: u32 =
            parse_or("SEARCH_SYNC_BATCH_SIZE", DEFAULT_SEARCH_SYNC_BATCH_SIZE)?;
        let max_upload_size_bytes =
            parse_or("MAX_UPLOAD_SIZE_BYTES", DEFAULT_MAX_UPLOAD_SIZE_BYTES)?;
        let port = parse_or("PORT", DEFAULT_PORT)?;

        let environment = match env::var("APP_ENV").ok().as_deref() {
            Some("production") => Environment::Production,
            _ => Environment::Development,
        };

        Ok(Self {
            database_url,
            cache_url,
            auth_secret,
            frontend_url,
            session_expiry_days,
            system_admin_ids: list_var("SYSTEM_ADMIN_IDS"),
            system_admin_emails: list_var("SYSTEM_ADMIN_EMAILS"),
            search_sync_batch_size: search_sync_batch_size.min(MAX_SEARCH_SYNC_BATCH_SIZE),
            max_upload_size_bytes,
            enable_demo_mode: bool_var("ENABLE_DEMO_MODE"),
            port,
            environment,
        })
    }

    /// Absolute session lifetime.
    pub fn session_lifetime(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.session_expiry_days))
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.is_empty() => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            variable: name,
            reason: e.to_string(),
        }),
        _ => Ok(default),
    }
}

fn list_var(name: &str) -> Vec<String> {
    env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn bool_var(name: &str) -> bool {
    matches!(
        env::var(name).unwrap_or_default().to_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_flag() {
        assert!(Environment::Production.is_production());
        assert!(!Environment::Development.is_production());
    }

    #[test]
    fn test_list_parsing() {
        std::env::set_var("KOLLAB_TEST_ADMINS", "a@b.c, d@e.f,,g@h.i ");
        let parsed = list_var("KOLLAB_TEST_ADMINS");
        assert_eq!(parsed, vec!["a@b.c", "d@e.f", "g@h.i"]);
        std::env::remove_var("KOLLAB_TEST_ADMINS");
    }

    #[test]
    fn test_bool_parsing() {
        std::env::set_var("KOLLAB_TEST_FLAG", "true");
        assert!(bool_var("KOLLAB_TEST_FLAG"));
        std::env::set_var("KOLLAB_TEST_FLAG", "0");
        assert!(!bool_var("KOLLAB_TEST_FLAG"));
        std::env::remove_var("KOLLAB_TEST_FLAG");
    }
}
