//! Document routes. The listing is cached per workspace and sliced by
//! cursor after the cache, so the fetcher stays pure with respect to the
//! key.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::cache::keys::DocumentsListKey;
use crate::cache::{get_or_compute, invalidation};
use crate::error::{AppError, AppResult};
use crate::http::pagination::{paginate, PageQuery};
use crate::http::{AppState, CurrentPrincipal};
use crate::membership::Role;
use crate::models::{Document, DocumentSummary};

/// Bound on the cached listing.
const LIST_CEILING: i64 = 200;

/// Document creation payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentRequest {
    /// Owning workspace
    pub workspace_id: Uuid,
    /// Title
    pub title: String,
    /// Optional body content
    pub content: Option<String>,
}

/// Document update payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDocumentRequest {
    /// New title
    pub title: Option<String>,
    /// New content
    pub content: Option<String>,
}

async fn document_workspace(state: &AppState, document_id: Uuid) -> AppResult<Uuid> {
    let row: Option<(Uuid,)> =
        sqlx::query_as("SELECT workspace_id FROM documents WHERE id = $1")
            .bind(document_id)
            .fetch_optional(&state.db)
            .await?;
    row.map(|(id,)| id)
        .ok_or_else(|| AppError::not_found("Document not found"))
}

/// `GET /api/workspaces/:id/documents`
pub async fn list(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Path(workspace_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<serde_json::Value>> {
    state
        .require_membership(&current, workspace_id, Some(Role::Viewer))
        .await?;

    let db = state.db.clone();
    let documents = get_or_compute(&state.cache, &DocumentsListKey(workspace_id), || async move {
        let documents = sqlx::query_as::<_, DocumentSummary>(
            "SELECT id, title, archived, created_by, created_at, updated_at \
             FROM documents WHERE workspace_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2",
        )
        .bind(workspace_id)
        .bind(LIST_CEILING)
        .fetch_all(&db)
        .await?;
        Ok(documents)
    })
    .await?;

    let limit = page.effective_limit() as usize;

    // Offset style survives behind the explicit legacy flag only.
    if page.wants_legacy_offset() {
        let offset = (page.page.unwrap_or(1).max(1) as usize - 1) * limit;
        let items: Vec<_> = documents.iter().skip(offset).take(limit).cloned().collect();
        return Ok(Json(json!({ "documents": items })));
    }

    let cursor = page.decoded_cursor()?;
    let (items, next) = paginate(&documents, cursor, page.effective_limit(), |doc| {
        (doc.created_at, doc.id)
    });

    Ok(Json(json!({
        "documents": items,
        "nextCursor": next.map(|c| c.encode()),
    })))
}

/// `POST /api/documents`
pub async fn create(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Json(body): Json<CreateDocumentRequest>,
) -> AppResult<(StatusCode, Json<Document>)> {
    state
        .require_membership(&current, body.workspace_id, Some(Role::Editor))
        .await?;
    if body.title.trim().is_empty() {
        return Err(AppError::validation("Document title must not be empty"));
    }

    let document = sqlx::query_as::<_, Document>(
        "INSERT INTO documents (id, workspace_id, title, content, archived, created_by, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, FALSE, $5, $6, $6) \
         RETURNING id, workspace_id, title, content, archived, created_by, created_at, updated_at",
    )
    .bind(Uuid::new_v4())
    .bind(body.workspace_id)
    .bind(body.title.trim())
    .bind(body.content.unwrap_or_default())
    .bind(current.principal.id)
    .bind(Utc::now())
    .fetch_one(&state.db)
    .await?;

    invalidation::documents_changed(&state.cache, body.workspace_id).await;
    Ok((StatusCode::CREATED, Json(document)))
}

/// `PATCH /api/documents/:id`
pub async fn update(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Path(document_id): Path<Uuid>,
    Json(body): Json<UpdateDocumentRequest>,
) -> AppResult<Json<Document>> {
    let workspace_id = document_workspace(&state, document_id).await?;
    state
        .require_membership(&current, workspace_id, Some(Role::Editor))
        .await?;
    if body.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(AppError::validation("Document title must not be empty"));
    }

    let document = sqlx::query_as::<_, Document>(
        "UPDATE documents \
         SET title = COALESCE($2, title), content = COALESCE($3, content), updated_at = $4 \
         WHERE id = $1 \
         RETURNING id, workspace_id, title, content, archived, created_by, created_at, updated_at",
    )
    .bind(document_id)
    .bind(body.title.map(|t| t.trim().to_string()))
    .bind(body.content)
    .bind(Utc::now())
    .fetch_one(&state.db)
    .await?;

    invalidation::documents_changed(&state.cache, workspace_id).await;
    Ok(Json(document))
}

/// `POST /api/documents/:id/archive`
pub async fn archive(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<Document>> {
    let workspace_id = document_workspace(&state, document_id).await?;
    state
        .require_membership(&current, workspace_id, Some(Role::Editor))
        .await?;

    let document = sqlx::query_as::<_, Document>(
        "UPDATE documents SET archived = TRUE, updated_at = $2 \
         WHERE id = $1 \
         RETURNING id, workspace_id, title, content, archived, created_by, created_at, updated_at",
    )
    .bind(document_id)
    .bind(Utc::now())
    .fetch_one(&state.db)
    .await?;

    invalidation::documents_changed(&state.cache, workspace_id).await;
    Ok(Json(document))
}

/// `DELETE /api/documents/:id`
pub async fn remove(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Path(document_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let workspace_id = document_workspace(&state, document_id).await?;
    state
        .require_membership(&current, workspace_id, Some(Role::Editor))
        .await?;

    sqlx::query("DELETE FROM documents WHERE id = $1")
        .bind(document_id)
        .execute(&state.db)
        .await?;

    invalidation::documents_changed(&state.cache, workspace_id).await;
    Ok(StatusCode::NO_CONTENT)
}
