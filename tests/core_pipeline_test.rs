//! Core pipeline integration tests over the in-memory cache backend:
//! stampede bounds, limiter windows, resolver read-after-write, and the
//! RFC 7807 wire shape.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::response::IntoResponse;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use kollab::cache::keys::DocumentsListKey;
use kollab::cache::{get_or_compute, CacheClient};
use kollab::error::{AppError, AppResult};
use kollab::membership::{Membership, MembershipResolver, MembershipSource, Role};
use kollab::models::DocumentSummary;
use kollab::ratelimit::{buckets, Decision, RateLimiter};

// ============================================================================
// Fixtures
// ============================================================================

struct MapSource {
    rows: Mutex<HashMap<(Uuid, Uuid), Membership>>,
}

impl MapSource {
    fn new() -> Self {
        Self { rows: Mutex::new(HashMap::new()) }
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
        Ok(self.rows.lock().get(&(w, p)).cloned())
    }
}

fn sample_doc() -> DocumentSummary {
    DocumentSummary {
        id: Uuid::new_v4(),
        title: "doc".to_string(),
        archived: false,
        created_by: Uuid::new_v4(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

// ============================================================================
// Stampede bound
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn cold_cache_storm_invokes_fetcher_at_most_ten_times() {
    let cache = Arc::new(CacheClient::in_memory());
    let key = DocumentsListKey(Uuid::new_v4());
    let fetches = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..100 {
        let cache = Arc::clone(&cache);
        let fetches = Arc::clone(&fetches);
        handles.push(tokio::spawn(async move {
            get_or_compute(&cache, &key, || async {
                fetches.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(vec![sample_doc()])
            })
            .await
            .unwrap()
        }));
    }

    let mut payloads = Vec::new();
    for handle in handles {
        payloads.push(handle.await.unwrap());
    }

    // All callers observe an identical payload.
    let first: Vec<Uuid> = payloads[0].iter().map(|d| d.id).collect();
    for payload in &payloads {
        let ids: Vec<Uuid> = payload.iter().map(|d| d.id).collect();
        assert_eq!(ids, first);
    }

    assert!(
        fetches.load(Ordering::SeqCst) <= 10,
        "fetcher ran {} times",
        fetches.load(Ordering::SeqCst)
    );
}

// ============================================================================
// Limiter window
// ============================================================================

#[tokio::test]
async fn sixth_auth_attempt_blocks_with_retry_after() {
    let limiter = RateLimiter::new(Arc::new(CacheClient::in_memory()));
    let address = "198.51.100.23";

    for attempt in 1..=5 {
        let decision = limiter.check(&buckets::AUTH, address).await;
        assert!(decision.is_allowed(), "attempt {} should pass", attempt);
    }

    let decision = limiter.check(&buckets::AUTH, address).await;
    match &decision {
        Decision::Blocked { retry_after_secs, .. } => assert!(*retry_after_secs > 0),
        other => panic!("expected block, got {:?}", other),
    }

    let headers = decision.headers();
    assert!(headers
        .iter()
        .any(|(name, value)| *name == "X-RateLimit-Remaining" && value == "0"));
}

// ============================================================================
// Resolver read-after-write
// ============================================================================

#[tokio::test]
async fn membership_change_is_visible_after_invalidation() {
    let source = Arc::new(MapSource::new());
    let resolver = Arc::new(MembershipResolver::new(
        Arc::new(CacheClient::in_memory()),
        Arc::clone(&source) as Arc<dyn MembershipSource>,
    ));
    let (w, p) = (Uuid::new_v4(), Uuid::new_v4());

    // Invite as viewer: visible immediately after invalidation.
    source.grant(w, p, Role::Viewer);
    resolver.invalidate(w, p).await;
    let membership = resolver.resolve(w, p, Some(Role::Viewer)).await.unwrap();
    assert_eq!(membership.role, Role::Viewer);

    // Remove: the next resolve denies.
    source.revoke(w, p);
    resolver.invalidate(w, p).await;
    let err = resolver.resolve(w, p, None).await.unwrap_err();
    assert_eq!(err.kind.code(), "FORBIDDEN");
}

// ============================================================================
// RFC 7807 wire shape
// ============================================================================

#[tokio::test]
async fn error_responses_parse_as_problem_details() {
    let cases = [
        (AppError::validation("bad input"), 400, "VALIDATION_ERROR"),
        (AppError::unauthenticated("no session"), 401, "UNAUTHENTICATED"),
        (AppError::forbidden("no role"), 403, "FORBIDDEN"),
        (AppError::not_found("gone"), 404, "NOT_FOUND"),
        (AppError::conflict("dup"), 409, "CONFLICT"),
        (AppError::rate_limited(30), 429, "RATE_LIMITED"),
        (AppError::database("down"), 500, "DATABASE_ERROR"),
        (AppError::service_unavailable("dep"), 503, "SERVICE_UNAVAILABLE"),
    ];

    for (error, status, code) in cases {
        let response = error.into_response();
        assert_eq!(response.status().as_u16(), status);

        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let problem: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(problem["status"], status);
        assert_eq!(problem["code"], code);
        for field in ["type", "title", "detail", "details"] {
            assert!(problem.get(field).is_some(), "missing {}", field);
        }
    }
}

#[tokio::test]
async fn rate_limited_response_carries_retry_after_header() {
    let response = AppError::rate_limited(42).into_response();
    assert_eq!(
        response.headers().get("retry-after").unwrap(),
        &axum::http::HeaderValue::from_static("42")
    );
}
