//! Liveness, readiness, and the metrics exposition.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::collections::BTreeMap;

use crate::db;
use crate::http::AppState;
use crate::observability::ComponentHealth;

/// `GET /health/live` — 200 whenever the process is up.
pub async fn live() -> &'static str {
    "ok"
}

/// `GET /health/ready` — 200 when every mandatory dependency is reachable,
/// else 503 with per-component latency.
pub async fn ready(State(state): State<AppState>) -> Response {
    let mut checks = BTreeMap::new();

    let database = match db::ping(&state.db).await {
        Ok(latency) => ComponentHealth::healthy(latency),
        Err(err) => ComponentHealth::unhealthy(err.to_string()),
    };
    checks.insert("database", database);

    let cache = match state.cache.ping().await {
        Ok(latency) => ComponentHealth::healthy(latency),
        Err(err) => ComponentHealth::unhealthy(err.to_string()),
    };
    checks.insert("cache", cache);

    let ready = checks.values().all(ComponentHealth::is_healthy);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if ready { "ready" } else { "unavailable" },
            "checks": checks,
        })),
    )
        .into_response()
}

/// `GET /metrics` — Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    state
        .metrics
        .set_pool_gauges(state.db.size(), state.db.num_idle());

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}
