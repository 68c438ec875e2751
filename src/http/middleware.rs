//! # Request Pipeline Stages
//!
//! Ordered middleware applied to API requests:
//!
//! 1. CORS preflight short-circuit (tower-http layer, assembled in
//!    [`crate::http`]).
//! 2. CSRF token issuance.
//! 3. CSRF validation for state-changing methods.
//! 4. Session authentication.
//! 5. Error-context enrichment.
//! 6. Performance logger.
//! 7. Rate limiter (per-route, with its bucket).
//!
//! Stages 1–3 are global; 4–7 are mounted selectively per router group.

use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::auth::{csrf, SESSION_COOKIE};
use crate::error::AppError;
use crate::models::Principal;
use crate::ratelimit::{Bucket, Decision};

use super::AppState;

// ============================================================================
// Request Context
// ============================================================================

/// The authenticated principal and session, attached to request extensions
/// by the session-authentication stage.
#[derive(Debug, Clone)]
pub struct CurrentPrincipal {
    /// The authenticated principal
    pub principal: Principal,
    /// Opaque id of the validated session
    pub session_id: String,
}

/// Extract a cookie value from request headers.
pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// First forwarded client address, if any.
fn forwarded_address(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .map(|addr| addr.trim().to_string())
        .filter(|addr| !addr.is_empty())
}

// ============================================================================
// Stage 1: CORS
// ============================================================================

/// CORS layer anchored on the configured frontend origin. Handles the
/// preflight short-circuit.
pub fn cors_layer(frontend_url: &str) -> CorsLayer {
    // Credentials are allowed, so the origin must be exact, never a wildcard.
    let origin = HeaderValue::from_str(frontend_url)
        .unwrap_or_else(|_| HeaderValue::from_static("http://localhost:3000"));

    CorsLayer::new()
        .allow_origin(AllowOrigin::exact(origin))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("x-csrf-token"),
        ])
        .expose_headers([
            HeaderName::from_static("x-csrf-token"),
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}

// ============================================================================
// Stages 2–3: CSRF
// ============================================================================

/// Ensure a cookie-bound CSRF token exists and validate it for
/// state-changing methods outside the exempt set.
pub async fn csrf_guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let cookie_token = cookie_value(request.headers(), csrf::CSRF_COOKIE);

    let state_changing = matches!(
        *request.method(),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    );

    if state_changing && !csrf::is_exempt(&path) {
        let header_token = request
            .headers()
            .get(csrf::CSRF_HEADER)
            .and_then(|value| value.to_str().ok());

        let valid = matches!(
            (cookie_token.as_deref(), header_token),
            (Some(cookie), Some(header)) if csrf::tokens_match(cookie, header)
        );
        if !valid {
            let mut response =
                AppError::forbidden("CSRF token missing or mismatched").into_response();
            issue_missing_token(&mut response, cookie_token.is_none(), state.secure_cookies());
            return response;
        }
    }

    let mut response = next.run(request).await;
    issue_missing_token(&mut response, cookie_token.is_none(), state.secure_cookies());
    response
}

/// Stage 2: attach a fresh cookie-bound token when none exists.
fn issue_missing_token(response: &mut Response, cookie_missing: bool, secure: bool) {
    if cookie_missing {
        let token = csrf::issue_token();
        let cookie = csrf::build_cookie(&token, secure);
        if let (Ok(cookie), Ok(header)) =
            (HeaderValue::from_str(&cookie), HeaderValue::from_str(&token))
        {
            response.headers_mut().append(header::SET_COOKIE, cookie);
            response
                .headers_mut()
                .insert(HeaderName::from_static(csrf::CSRF_HEADER), header);
        }
    }
}

// ============================================================================
// Stage 4: Session Authentication
// ============================================================================

/// Resolve the session cookie into a [`CurrentPrincipal`] or fail with
/// `unauthenticated`. Re-issues the cookie after a sliding renewal.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(cookie) = cookie_value(request.headers(), SESSION_COOKIE) else {
        return AppError::unauthenticated("Missing session cookie").into_response();
    };

    let authenticated = match state.sessions.validate(&cookie).await {
        Ok(authenticated) => authenticated,
        Err(err) => return err.into_response(),
    };

    let session_id = authenticated.session.id.clone();
    let fresh = authenticated.fresh;
    request.extensions_mut().insert(CurrentPrincipal {
        principal: authenticated.principal,
        session_id: session_id.clone(),
    });

    let mut response = next.run(request).await;

    if fresh {
        if let Ok(cookie) = HeaderValue::from_str(&state.sessions.build_cookie(&session_id)) {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
    }

    response
}

// ============================================================================
// Stage 5: Error-Context Enrichment
// ============================================================================

/// Annotate typed failures with `{path, method, principalId, timestamp}`
/// without overwriting fields the raiser set, and re-render the RFC 7807
/// body.
pub async fn error_context(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let method = request.method().to_string();
    let principal_id = request
        .extensions()
        .get::<CurrentPrincipal>()
        .map(|current| current.principal.id.to_string());

    let response = next.run(request).await;

    let Some(error) = response.extensions().get::<AppError>().cloned() else {
        return response;
    };

    let mut context = Map::new();
    context.insert("path".to_string(), Value::String(path));
    context.insert("method".to_string(), Value::String(method));
    if let Some(principal_id) = principal_id {
        context.insert("principalId".to_string(), Value::String(principal_id));
    }
    context.insert(
        "timestamp".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );

    let mut enriched = error;
    enriched.merge_details(context);

    // Rebuild the body; carry over non-entity headers (rate limit, cookies).
    let (parts, _) = response.into_parts();
    let mut rebuilt = enriched.into_response();
    for (name, value) in parts.headers.iter() {
        if name != header::CONTENT_TYPE && name != header::CONTENT_LENGTH {
            rebuilt.headers_mut().append(name, value.clone());
        }
    }
    rebuilt
}

// ============================================================================
// Stage 6: Performance Logger
// ============================================================================

/// Log level for a completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestLogLevel {
    /// 5xx
    Error,
    /// 4xx or > 1000 ms
    Warn,
    /// 500–1000 ms
    Info,
    /// everything else
    Debug,
}

pub(crate) fn request_log_level(status: u16, duration_ms: u128) -> RequestLogLevel {
    if status >= 500 {
        RequestLogLevel::Error
    } else if status >= 400 || duration_ms > 1000 {
        RequestLogLevel::Warn
    } else if duration_ms >= 500 {
        RequestLogLevel::Info
    } else {
        RequestLogLevel::Debug
    }
}

/// Time every request and emit one structured line at completion; feeds the
/// request counters and latency histograms.
pub async fn performance_logger(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let principal_id = request
        .extensions()
        .get::<CurrentPrincipal>()
        .map(|current| current.principal.id.to_string());
    let request_bytes = content_length(request.headers());

    let response = next.run(request).await;

    let duration = start.elapsed();
    let duration_ms = duration.as_millis();
    let status = response.status().as_u16();
    let response_bytes = content_length(response.headers());
    let principal_id = principal_id.as_deref().unwrap_or("-");

    state
        .metrics
        .observe_request(&route, &method, status, duration);

    match request_log_level(status, duration_ms) {
        RequestLogLevel::Error => tracing::error!(
            method = %method, route = %route, status, duration_ms = duration_ms as u64,
            principal_id, request_bytes, response_bytes, "request"
        ),
        RequestLogLevel::Warn => tracing::warn!(
            method = %method, route = %route, status, duration_ms = duration_ms as u64,
            principal_id, request_bytes, response_bytes, "request"
        ),
        RequestLogLevel::Info => tracing::info!(
            method = %method, route = %route, status, duration_ms = duration_ms as u64,
            principal_id, request_bytes, response_bytes, "request"
        ),
        RequestLogLevel::Debug => tracing::debug!(
            method = %method, route = %route, status, duration_ms = duration_ms as u64,
            principal_id, request_bytes, response_bytes, "request"
        ),
    }

    response
}

fn content_length(headers: &HeaderMap) -> u64 {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0)
}

// ============================================================================
// Stage 7: Rate Limiter
// ============================================================================

/// Per-route rate limiting with the bucket bound at mount time.
///
/// Key generation: authenticated principal id, else the forwarded client
/// address, else the literal `anonymous`.
pub async fn rate_limit(
    State((state, bucket)): State<(AppState, &'static Bucket)>,
    request: Request,
    next: Next,
) -> Response {
    let principal_key = request
        .extensions()
        .get::<CurrentPrincipal>()
        .map(|current| current.principal.id.to_string())
        .or_else(|| forwarded_address(request.headers()))
        .unwrap_or_else(|| "anonymous".to_string());

    let decision = state.limiter.check(bucket, &principal_key).await;

    if let Decision::Blocked { retry_after_secs, .. } = decision {
        state.metrics.record_block(bucket.name);
        let mut response = AppError::rate_limited(retry_after_secs).into_response();
        apply_decision_headers(&mut response, &decision);
        return response;
    }

    let mut response = next.run(request).await;
    apply_decision_headers(&mut response, &decision);
    response
}

fn apply_decision_headers(response: &mut Response, decision: &Decision) {
    for (name, value) in decision.headers() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
}

// ============================================================================
// System-Admin Guard
// ============================================================================

/// Restrict a route group to the configured system-admin set. Every access
/// is logged with principal, route, and method.
pub async fn require_system_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(current) = request.extensions().get::<CurrentPrincipal>().cloned() else {
        return AppError::unauthenticated("Missing session").into_response();
    };

    if !state.admins.is_admin(&current.principal) {
        return AppError::forbidden("System administrator access required").into_response();
    }

    tracing::info!(
        principal_id = %current.principal.id,
        route = request.uri().path(),
        method = %request.method(),
        "system admin access"
    );

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("kollab_csrf=abc; kollab_session=sid.sig; other=1"),
        );
        assert_eq!(cookie_value(&headers, "kollab_csrf"), Some("abc".to_string()));
        assert_eq!(
            cookie_value(&headers, "kollab_session"),
            Some("sid.sig".to_string())
        );
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn test_forwarded_address_takes_first() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(forwarded_address(&headers), Some("203.0.113.7".to_string()));
        assert_eq!(forwarded_address(&HeaderMap::new()), None);
    }

    #[test]
    fn test_log_level_selection() {
        assert_eq!(request_log_level(500, 10), RequestLogLevel::Error);
        assert_eq!(request_log_level(503, 2000), RequestLogLevel::Error);
        assert_eq!(request_log_level(404, 10), RequestLogLevel::Warn);
        assert_eq!(request_log_level(200, 1500), RequestLogLevel::Warn);
        assert_eq!(request_log_level(200, 700), RequestLogLevel::Info);
        assert_eq!(request_log_level(200, 499), RequestLogLevel::Debug);
        assert_eq!(request_log_level(201, 10), RequestLogLevel::Debug);
    }
}
