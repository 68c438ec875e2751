//! Workspace CRUD and membership administration.
//!
//! Every handler resolves the caller's role first; mutations run under the
//! transactional helper and invalidate the affected namespaces strictly
//! after commit.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::cache::keys::{MembersKey, WorkspaceKey};
use crate::cache::{get_or_compute, invalidation};
use crate::db::{with_transaction, TxOptions};
use crate::error::{AppError, AppResult};
use crate::http::{AppState, CurrentPrincipal};
use crate::membership::Role;
use crate::models::{MemberEntry, Workspace};

/// Workspace creation payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkspaceRequest {
    /// Display name
    pub name: String,
    /// Optional settings blob
    pub settings: Option<serde_json::Value>,
}

/// Workspace update payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWorkspaceRequest {
    /// New display name
    pub name: Option<String>,
    /// Replacement settings blob
    pub settings: Option<serde_json::Value>,
}

/// Member invitation payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    /// Email of the principal to add
    pub email: String,
    /// Granted role; `owner` cannot be granted
    pub role: Role,
}

/// Role change payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMemberRequest {
    /// New role; `owner` cannot be granted
    pub role: Role,
}

/// `GET /api/workspaces` — every workspace the caller belongs to.
pub async fn list(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
) -> AppResult<Json<serde_json::Value>> {
    #[derive(sqlx::FromRow, serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    struct WorkspaceWithRole {
        id: Uuid,
        slug: String,
        name: String,
        role: Role,
        created_at: chrono::DateTime<Utc>,
    }

    let rows = sqlx::query_as::<_, WorkspaceWithRole>(
        "SELECT w.id, w.slug, w.name, m.role, w.created_at \
         FROM workspaces w \
         JOIN memberships m ON m.workspace_id = w.id \
         WHERE m.principal_id = $1 \
         ORDER BY w.created_at DESC",
    )
    .bind(current.principal.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({ "workspaces": rows })))
}

/// `POST /api/workspaces`
pub async fn create(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Json(body): Json<CreateWorkspaceRequest>,
) -> AppResult<(StatusCode, Json<Workspace>)> {
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::validation("Workspace name must not be empty"));
    }
    let settings = body.settings.unwrap_or_else(|| json!({}));
    if !settings.is_object() {
        return Err(AppError::validation("Workspace settings must be an object"));
    }

    let slug = format!("{}-{}", super::slugify(&name), Utc::now().timestamp());
    let creator = current.principal.id;

    let workspace = with_transaction(&state.db, TxOptions::default(), move |tx| {
        Box::pin(async move {
            let workspace = sqlx::query_as::<_, Workspace>(
                "INSERT INTO workspaces (id, slug, name, created_by, settings, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $6) \
                 RETURNING id, slug, name, created_by, settings, created_at, updated_at",
            )
            .bind(Uuid::new_v4())
            .bind(&slug)
            .bind(&name)
            .bind(creator)
            .bind(&settings)
            .bind(Utc::now())
            .fetch_one(&mut **tx)
            .await?;

            sqlx::query(
                "INSERT INTO memberships (workspace_id, principal_id, role, joined_at) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(workspace.id)
            .bind(creator)
            .bind(Role::Owner)
            .bind(Utc::now())
            .execute(&mut **tx)
            .await?;

            Ok(workspace)
        })
    })
    .await?;

    Ok((StatusCode::CREATED, Json(workspace)))
}

/// Resolve a path segment that may be an id or a slug.
async fn lookup_workspace(state: &AppState, id_or_slug: &str) -> AppResult<Workspace> {
    if let Ok(id) = id_or_slug.parse::<Uuid>() {
        let db = state.db.clone();
        return get_or_compute(&state.cache, &WorkspaceKey(id), || async move {
            sqlx::query_as::<_, Workspace>(
                "SELECT id, slug, name, created_by, settings, created_at, updated_at \
                 FROM workspaces WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&db)
            .await?
            .ok_or_else(|| AppError::not_found("Workspace not found"))
        })
        .await;
    }

    sqlx::query_as::<_, Workspace>(
        "SELECT id, slug, name, created_by, settings, created_at, updated_at \
         FROM workspaces WHERE slug = $1",
    )
    .bind(id_or_slug)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::not_found("Workspace not found"))
}

/// `GET /api/workspaces/:id` — accepts an id or slug.
pub async fn get(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Path(id_or_slug): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let workspace = lookup_workspace(&state, &id_or_slug).await?;
    let role = state
        .require_membership(&current, workspace.id, Some(Role::Viewer))
        .await?;

    Ok(Json(json!({ "workspace": workspace, "role": role })))
}

/// `PATCH /api/workspaces/:id`
pub async fn update(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Path(workspace_id): Path<Uuid>,
    Json(body): Json<UpdateWorkspaceRequest>,
) -> AppResult<Json<Workspace>> {
    state
        .require_membership(&current, workspace_id, Some(Role::Admin))
        .await?;

    if let Some(settings) = &body.settings {
        if !settings.is_object() {
            return Err(AppError::validation("Workspace settings must be an object"));
        }
    }
    if body.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(AppError::validation("Workspace name must not be empty"));
    }

    let workspace = sqlx::query_as::<_, Workspace>(
        "UPDATE workspaces \
         SET name = COALESCE($2, name), settings = COALESCE($3, settings), updated_at = $4 \
         WHERE id = $1 \
         RETURNING id, slug, name, created_by, settings, created_at, updated_at",
    )
    .bind(workspace_id)
    .bind(body.name.map(|n| n.trim().to_string()))
    .bind(body.settings)
    .bind(Utc::now())
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::not_found("Workspace not found"))?;

    invalidation::workspace_updated(&state.cache, workspace_id).await;
    Ok(Json(workspace))
}

/// `DELETE /api/workspaces/:id`
pub async fn remove(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Path(workspace_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state
        .require_membership(&current, workspace_id, Some(Role::Owner))
        .await?;

    let deleted = sqlx::query("DELETE FROM workspaces WHERE id = $1")
        .bind(workspace_id)
        .execute(&state.db)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(AppError::not_found("Workspace not found"));
    }

    invalidation::workspace_deleted(&state.cache, workspace_id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/workspaces/:id/members`
pub async fn list_members(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Path(workspace_id): Path<Uuid>,
) -> AppResult<Json<Vec<MemberEntry>>> {
    state
        .require_membership(&current, workspace_id, Some(Role::Viewer))
        .await?;

    let db = state.db.clone();
    let members = get_or_compute(&state.cache, &MembersKey(workspace_id), || async move {
        let members = sqlx::query_as::<_, MemberEntry>(
            "SELECT m.principal_id, p.name, p.email, m.role, m.joined_at \
             FROM memberships m \
             JOIN principals p ON p.id = m.principal_id \
             WHERE m.workspace_id = $1 \
             ORDER BY m.joined_at ASC",
        )
        .bind(workspace_id)
        .fetch_all(&db)
        .await?;
        Ok(members)
    })
    .await?;

    Ok(Json(members))
}

/// `POST /api/workspaces/:id/members`
pub async fn add_member(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Path(workspace_id): Path<Uuid>,
    Json(body): Json<AddMemberRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    state
        .require_membership(&current, workspace_id, Some(Role::Admin))
        .await?;
    if body.role == Role::Owner {
        return Err(AppError::validation("The owner role cannot be granted"));
    }

    let invitee: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM principals WHERE email = $1")
        .bind(body.email.to_lowercase())
        .fetch_optional(&state.db)
        .await?;
    let (principal_id,) =
        invitee.ok_or_else(|| AppError::not_found("No principal with that email"))?;
    let role = body.role;

    with_transaction(&state.db, TxOptions::default(), move |tx| {
        Box::pin(async move {
            let existing: Option<(Role,)> = sqlx::query_as(
                "SELECT role FROM memberships \
                 WHERE workspace_id = $1 AND principal_id = $2",
            )
            .bind(workspace_id)
            .bind(principal_id)
            .fetch_optional(&mut **tx)
            .await?;
            if existing.is_some() {
                return Err(AppError::conflict("Principal is already a member"));
            }

            sqlx::query(
                "INSERT INTO memberships (workspace_id, principal_id, role, joined_at) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(workspace_id)
            .bind(principal_id)
            .bind(role)
            .bind(Utc::now())
            .execute(&mut **tx)
            .await?;
            Ok(())
        })
    })
    .await?;

    state.resolver.invalidate_and_warm(workspace_id, principal_id).await;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "principalId": principal_id, "role": body.role })),
    ))
}

/// `PATCH /api/workspaces/:id/members/:principal`
pub async fn update_member_role(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Path((workspace_id, principal_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<UpdateMemberRequest>,
) -> AppResult<Json<serde_json::Value>> {
    state
        .require_membership(&current, workspace_id, Some(Role::Admin))
        .await?;
    if body.role == Role::Owner {
        return Err(AppError::validation("The owner role cannot be granted"));
    }
    let role = body.role;

    with_transaction(&state.db, TxOptions::default(), move |tx| {
        Box::pin(async move {
            let existing: Option<(Role,)> = sqlx::query_as(
                "SELECT role FROM memberships \
                 WHERE workspace_id = $1 AND principal_id = $2 FOR UPDATE",
            )
            .bind(workspace_id)
            .bind(principal_id)
            .fetch_optional(&mut **tx)
            .await?;

            match existing {
                None => Err(AppError::not_found("Membership not found")),
                Some((Role::Owner,)) => {
                    Err(AppError::conflict("The owner's role cannot be changed"))
                }
                Some(_) => {
                    sqlx::query(
                        "UPDATE memberships SET role = $3 \
                         WHERE workspace_id = $1 AND principal_id = $2",
                    )
                    .bind(workspace_id)
                    .bind(principal_id)
                    .bind(role)
                    .execute(&mut **tx)
                    .await?;
                    Ok(())
                }
            }
        })
    })
    .await?;

    state.resolver.invalidate_and_warm(workspace_id, principal_id).await;

    Ok(Json(json!({ "principalId": principal_id, "role": body.role })))
}

/// `DELETE /api/workspaces/:id/members/:principal`
///
/// Admins may remove members; any member may remove themselves. Member
/// removal runs serializable because the owner check races with role
/// changes.
pub async fn remove_member(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Path((workspace_id, principal_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    if current.principal.id != principal_id {
        state
            .require_membership(&current, workspace_id, Some(Role::Admin))
            .await?;
    }

    with_transaction(&state.db, TxOptions::serializable(), move |tx| {
        Box::pin(async move {
            let existing: Option<(Role,)> = sqlx::query_as(
                "SELECT role FROM memberships \
                 WHERE workspace_id = $1 AND principal_id = $2",
            )
            .bind(workspace_id)
            .bind(principal_id)
            .fetch_optional(&mut **tx)
            .await?;

            match existing {
                None => Err(AppError::not_found("Membership not found")),
                Some((Role::Owner,)) => {
                    Err(AppError::conflict("The workspace owner cannot be removed"))
                }
                Some(_) => {
                    sqlx::query(
                        "DELETE FROM memberships \
                         WHERE workspace_id = $1 AND principal_id = $2",
                    )
                    .bind(workspace_id)
                    .bind(principal_id)
                    .execute(&mut **tx)
                    .await?;
                    Ok(())
                }
            }
        })
    })
    .await?;

    // No warm-up for a removed pair; the next lookup caches the negative.
    state.resolver.invalidate(workspace_id, principal_id).await;

    Ok(StatusCode::NO_CONTENT)
}
