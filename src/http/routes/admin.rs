//! Cache administration, restricted to the system-admin set by the
//! pipeline guard.

use axum::extract::State;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use crate::cache::CacheStats;
use crate::error::{AppError, AppResult};
use crate::http::{AppState, CurrentPrincipal};

/// Purge payload: a glob over cache keys.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeRequest {
    /// Glob pattern, e.g. `documents_list:*`
    pub pattern: String,
}

/// `GET /api/admin/cache/stats`
pub async fn cache_stats(State(state): State<AppState>) -> AppResult<Json<CacheStats>> {
    let stats = state
        .cache
        .stats()
        .await
        .map_err(|err| AppError::service_unavailable(err.to_string()))?;
    Ok(Json(stats))
}

/// `POST /api/admin/cache/purge`
pub async fn cache_purge(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Json(body): Json<PurgeRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let pattern = body.pattern.trim();
    if pattern.is_empty() || pattern == "*" {
        return Err(AppError::validation(
            "Purge pattern must target a namespace",
        ));
    }

    let deleted = state
        .cache
        .delete_pattern(pattern)
        .await
        .map_err(|err| AppError::service_unavailable(err.to_string()))?;

    tracing::info!(
        principal_id = %current.principal.id,
        pattern,
        deleted,
        "cache purge"
    );
    Ok(Json(json!({ "deleted": deleted })))
}
