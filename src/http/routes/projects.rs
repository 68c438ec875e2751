//! Project routes. Creation can link teams; the project row and its team
//! relations land atomically.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::cache::keys::ProjectsListKey;
use crate::cache::{get_or_compute, invalidation};
use crate::db::{with_transaction, TxOptions};
use crate::error::{AppError, AppResult};
use crate::http::{AppState, CurrentPrincipal};
use crate::membership::Role;
use crate::models::ProjectSummary;

/// Project creation payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    /// Owning workspace
    pub workspace_id: Uuid,
    /// Name
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Teams to attach; each must belong to the same workspace
    #[serde(default)]
    pub team_ids: Vec<Uuid>,
}

/// `GET /api/workspaces/:id/projects`
pub async fn list(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Path(workspace_id): Path<Uuid>,
) -> AppResult<Json<Vec<ProjectSummary>>> {
    state
        .require_membership(&current, workspace_id, Some(Role::Viewer))
        .await?;

    let db = state.db.clone();
    let projects = get_or_compute(&state.cache, &ProjectsListKey(workspace_id), || async move {
        let projects = sqlx::query_as::<_, ProjectSummary>(
            "SELECT id, name, description, created_at \
             FROM projects WHERE workspace_id = $1 \
             ORDER BY created_at DESC, id DESC",
        )
        .bind(workspace_id)
        .fetch_all(&db)
        .await?;
        Ok(projects)
    })
    .await?;

    Ok(Json(projects))
}

/// `POST /api/projects`
pub async fn create(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Json(body): Json<CreateProjectRequest>,
) -> AppResult<(StatusCode, Json<ProjectSummary>)> {
    state
        .require_membership(&current, body.workspace_id, Some(Role::Editor))
        .await?;
    if body.name.trim().is_empty() {
        return Err(AppError::validation("Project name must not be empty"));
    }

    let workspace_id = body.workspace_id;
    let name = body.name.trim().to_string();
    let description = body.description.unwrap_or_default();
    let team_ids = body.team_ids;

    let project = with_transaction(&state.db, TxOptions::default(), move |tx| {
        Box::pin(async move {
            let project = sqlx::query_as::<_, ProjectSummary>(
                "INSERT INTO projects (id, workspace_id, name, description, created_at) \
                 VALUES ($1, $2, $3, $4, $5) \
                 RETURNING id, name, description, created_at",
            )
            .bind(Uuid::new_v4())
            .bind(workspace_id)
            .bind(&name)
            .bind(&description)
            .bind(Utc::now())
            .fetch_one(&mut **tx)
            .await?;

            for team_id in &team_ids {
                let related = sqlx::query(
                    "INSERT INTO project_teams (project_id, team_id) \
                     SELECT $1, id FROM teams WHERE id = $2 AND workspace_id = $3",
                )
                .bind(project.id)
                .bind(team_id)
                .bind(workspace_id)
                .execute(&mut **tx)
                .await?
                .rows_affected();

                if related == 0 {
                    return Err(AppError::validation(format!(
                        "Team {} does not belong to the workspace",
                        team_id
                    )));
                }
            }

            Ok(project)
        })
    })
    .await?;

    invalidation::projects_changed(&state.cache, workspace_id).await;
    Ok((StatusCode::CREATED, Json(project)))
}
