//! Workspace-scoped search across documents, tasks, and projects.
//!
//! Results are cached under an md5 digest of `(query, workspace, limit)`
//! for two minutes; there is no invalidation trigger, the TTL is the
//! staleness bound.

use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::cache::get_or_compute;
use crate::cache::keys::SearchKey;
use crate::error::{AppError, AppResult};
use crate::http::{AppState, CurrentPrincipal};
use crate::membership::Role;
use crate::models::SearchHit;

const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 50;

/// Search query parameters.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    /// Query string
    pub q: String,
    /// Workspace scope
    pub workspace_id: Uuid,
    /// Result limit
    pub limit: Option<u32>,
}

/// `GET /api/search`
pub async fn search(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let needle = query.q.trim().to_string();
    if needle.is_empty() {
        return Err(AppError::validation("Search query must not be empty"));
    }
    if needle.len() > 200 {
        return Err(AppError::validation("Search query too long"));
    }

    state
        .require_membership(&current, query.workspace_id, Some(Role::Viewer))
        .await?;

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let key = SearchKey {
        query: needle.to_lowercase(),
        workspace_id: query.workspace_id,
        limit,
    };

    let db = state.db.clone();
    let workspace_id = query.workspace_id;
    let hits = get_or_compute(&state.cache, &key, || async move {
        let pattern = format!("%{}%", needle.replace('%', "\\%").replace('_', "\\_"));
        let hits = sqlx::query_as::<_, SearchHit>(
            "SELECT 'document' AS kind, id, title, updated_at \
             FROM documents WHERE workspace_id = $1 AND title ILIKE $2 \
             UNION ALL \
             SELECT 'task' AS kind, id, title, updated_at \
             FROM tasks WHERE workspace_id = $1 AND title ILIKE $2 \
             UNION ALL \
             SELECT 'project' AS kind, id, name AS title, created_at AS updated_at \
             FROM projects WHERE workspace_id = $1 AND name ILIKE $2 \
             ORDER BY updated_at DESC \
             LIMIT $3",
        )
        .bind(workspace_id)
        .bind(pattern)
        .bind(i64::from(limit))
        .fetch_all(&db)
        .await?;
        Ok(hits)
    })
    .await?;

    Ok(Json(json!({ "hits": hits })))
}
