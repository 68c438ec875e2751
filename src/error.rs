//! # Error Taxonomy & RFC 7807 Payloads
//!
//! Typed failures for the Kollab core. Feature code raises [`AppError`]
//! values (never string errors); the pipeline's error-context stage enriches
//! the open `details` map and the wire payload conforms to RFC 7807 Problem
//! Details.
//!
//! Mapping between kinds and HTTP status codes is fixed:
//!
//! | Kind | HTTP |
//! |------|------|
//! | `validation` | 400 |
//! | `unauthenticated` | 401 |
//! | `forbidden` | 403 |
//! | `not_found` | 404 |
//! | `conflict` | 409 |
//! | `rate_limited` | 429 |
//! | `database` | 500 |
//! | `internal` | 500 |
//! | `service_unavailable` | 503 |

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Result alias used throughout the crate.
pub type AppResult<T> = Result<T, AppError>;

/// Set once at startup; suppresses internal error messages in responses.
static PRODUCTION: AtomicBool = AtomicBool::new(false);

/// Mark the process as running in production.
pub fn set_production(production: bool) {
    PRODUCTION.store(production, Ordering::Relaxed);
}

fn is_production() -> bool {
    PRODUCTION.load(Ordering::Relaxed)
}

// ============================================================================
// Error Kinds
// ============================================================================

/// Classified failure kinds, neither HTTP- nor transport-specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input rejected by schema or semantic check
    Validation,
    /// No valid session
    Unauthenticated,
    /// Valid session, insufficient role
    Forbidden,
    /// Addressed resource does not exist
    NotFound,
    /// Uniqueness or state violation
    Conflict,
    /// Limiter blocked the request
    RateLimited,
    /// Source-of-truth failure (includes transaction timeout)
    Database,
    /// Unclassified
    Internal,
    /// Dependency unreachable (cache, search, object store)
    ServiceUnavailable,
}

impl ErrorKind {
    /// HTTP status for this kind.
    pub fn status(self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Database | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable UPPER_SNAKE error code for the wire payload.
    pub fn code(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Database => "DATABASE_ERROR",
            Self::Internal => "INTERNAL_ERROR",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    /// Human-readable title for the wire payload.
    pub fn title(self) -> &'static str {
        match self {
            Self::Validation => "Validation Failed",
            Self::Unauthenticated => "Authentication Required",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Resource Not Found",
            Self::Conflict => "Resource Conflict",
            Self::RateLimited => "Rate Limit Exceeded",
            Self::Database => "Database Error",
            Self::Internal => "Internal Server Error",
            Self::ServiceUnavailable => "Service Unavailable",
        }
    }
}

// ============================================================================
// AppError
// ============================================================================

/// A typed failure with an open `details` map.
///
/// The detail message of `database` and `internal` errors is suppressed from
/// responses in production; the original is always logged server-side.
#[derive(Debug, Clone)]
pub struct AppError {
    /// Failure classification
    pub kind: ErrorKind,
    /// Detail message (may be suppressed in production for 500s)
    pub detail: String,
    /// Open context map, enriched by the pipeline without overwrite
    pub details: Map<String, Value>,
    /// Seconds until retry, for `rate_limited`
    pub retry_after: Option<u64>,
}

impl AppError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            details: Map::new(),
            retry_after: None,
        }
    }

    /// Input rejected by schema or semantic check.
    pub fn validation(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, detail)
    }

    /// No valid session.
    pub fn unauthenticated(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, detail)
    }

    /// Valid session, insufficient role.
    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, detail)
    }

    /// Addressed resource does not exist.
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, detail)
    }

    /// Uniqueness or state violation.
    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, detail)
    }

    /// Limiter blocked the request.
    pub fn rate_limited(retry_after: u64) -> Self {
        let mut err = Self::new(
            ErrorKind::RateLimited,
            format!("Rate limit exceeded, retry after {} seconds", retry_after),
        );
        err.retry_after = Some(retry_after);
        err
    }

    /// Source-of-truth failure.
    pub fn database(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, detail)
    }

    /// Transaction deadline elapsed.
    pub fn database_timeout() -> Self {
        let mut err = Self::new(ErrorKind::Database, "Transaction timed out");
        err.details
            .insert("timeout".to_string(), Value::Bool(true));
        err
    }

    /// Unclassified failure.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, detail)
    }

    /// Dependency unreachable.
    pub fn service_unavailable(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, detail)
    }

    /// Attach a context field.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Merge context fields without overwriting existing ones.
    pub fn merge_details(&mut self, fields: Map<String, Value>) {
        for (key, value) in fields {
            self.details.entry(key).or_insert(value);
        }
    }

    /// Render the RFC 7807 payload for this error.
    pub fn to_problem(&self) -> Problem {
        let suppress = is_production()
            && matches!(self.kind, ErrorKind::Internal | ErrorKind::Database);
        let detail = if suppress {
            "An internal error occurred".to_string()
        } else {
            self.detail.clone()
        };

        Problem {
            type_: format!("https://kollab.app/errors/{}", self.kind.code()),
            title: self.kind.title().to_string(),
            status: self.kind.status().as_u16(),
            code: self.kind.code().to_string(),
            detail,
            details: self.details.clone(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.detail)
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::not_found("Resource not found"),
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                Self::conflict("Uniqueness violation")
            }
            _ => Self::database(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        Self::service_unavailable(format!("Cache unreachable: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("Serialization failure: {}", err))
    }
}

// ============================================================================
// RFC 7807 Problem Payload
// ============================================================================

/// RFC 7807 Problem Details wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    /// Stable type URI
    #[serde(rename = "type")]
    pub type_: String,
    /// Human-readable title
    pub title: String,
    /// HTTP status code
    pub status: u16,
    /// UPPER_SNAKE error code
    pub code: String,
    /// Detail message
    pub detail: String,
    /// Open context map
    pub details: Map<String, Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.kind.status().is_server_error() {
            tracing::error!(kind = self.kind.code(), detail = %self.detail, "request failed");
        }

        let problem = self.to_problem();
        let status = self.kind.status();
        let retry_after = self.retry_after;

        let mut response = (status, Json(problem)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        // The error-context stage reads this back to enrich `details`.
        response.extensions_mut().insert(self);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_status_mapping() {
        assert_eq!(ErrorKind::Validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(ErrorKind::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorKind::Database.status().as_u16(), 500);
        assert_eq!(ErrorKind::ServiceUnavailable.status().as_u16(), 503);
    }

    #[test]
    fn test_problem_shape() {
        let problem = AppError::forbidden("Requires editor role").to_problem();
        assert_eq!(problem.status, 403);
        assert_eq!(problem.code, "FORBIDDEN");
        assert!(problem.type_.ends_with("FORBIDDEN"));
        assert_eq!(problem.detail, "Requires editor role");
    }

    #[test]
    fn test_merge_does_not_overwrite() {
        let mut err = AppError::not_found("Document missing")
            .with_field("path", Value::String("/original".to_string()));

        let mut incoming = Map::new();
        incoming.insert("path".to_string(), Value::String("/enriched".to_string()));
        incoming.insert("method".to_string(), Value::String("GET".to_string()));
        err.merge_details(incoming);

        assert_eq!(err.details["path"], Value::String("/original".to_string()));
        assert_eq!(err.details["method"], Value::String("GET".to_string()));
    }

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let err = AppError::rate_limited(42);
        assert_eq!(err.retry_after, Some(42));
        assert_eq!(err.kind.code(), "RATE_LIMITED");
    }

    #[test]
    fn test_problem_serializes_rfc7807_fields() {
        let json = serde_json::to_value(AppError::conflict("Slug taken").to_problem()).unwrap();
        for field in ["type", "title", "status", "code", "detail", "details"] {
            assert!(json.get(field).is_some(), "missing field {}", field);
        }
    }
}
