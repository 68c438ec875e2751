//! Task routes. Listings keep page/limit pagination because the cache key
//! shape is `tasks_list:workspace:{w}:page:{p}:limit:{l}`; creation writes
//! the task row and its tag relations in one transaction.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::cache::keys::TasksListKey;
use crate::cache::{get_or_compute, invalidation};
use crate::db::{with_transaction, TxOptions};
use crate::error::{AppError, AppResult};
use crate::http::{AppState, CurrentPrincipal};
use crate::membership::Role;
use crate::models::{Task, TaskPage, TaskSummary};

const DEFAULT_PAGE_LIMIT: u32 = 20;
const MAX_PAGE_LIMIT: u32 = 100;

const TASK_STATUSES: &[&str] = &["todo", "doing", "done"];

/// Page/limit query for the task listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListQuery {
    /// Page number, 1-indexed
    pub page: Option<u32>,
    /// Page size
    pub limit: Option<u32>,
}

/// Task creation payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    /// Owning workspace
    pub workspace_id: Uuid,
    /// Title
    pub title: String,
    /// Tags to relate; each must belong to the same workspace
    #[serde(default)]
    pub tag_ids: Vec<Uuid>,
}

/// Task update payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    /// New title
    pub title: Option<String>,
    /// New status
    pub status: Option<String>,
}

async fn task_workspace(state: &AppState, task_id: Uuid) -> AppResult<Uuid> {
    let row: Option<(Uuid,)> = sqlx::query_as("SELECT workspace_id FROM tasks WHERE id = $1")
        .bind(task_id)
        .fetch_optional(&state.db)
        .await?;
    row.map(|(id,)| id)
        .ok_or_else(|| AppError::not_found("Task not found"))
}

/// `GET /api/workspaces/:id/tasks`
pub async fn list(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Path(workspace_id): Path<Uuid>,
    Query(query): Query<TaskListQuery>,
) -> AppResult<Json<TaskPage>> {
    state
        .require_membership(&current, workspace_id, Some(Role::Viewer))
        .await?;

    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);

    let key = TasksListKey { workspace_id, page, limit };
    let db = state.db.clone();
    let tasks = get_or_compute(&state.cache, &key, || async move {
        let items = sqlx::query_as::<_, TaskSummary>(
            "SELECT id, title, status, created_at \
             FROM tasks WHERE workspace_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3",
        )
        .bind(workspace_id)
        .bind(i64::from(limit))
        .bind(i64::from((page - 1) * limit))
        .fetch_all(&db)
        .await?;

        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE workspace_id = $1")
                .bind(workspace_id)
                .fetch_one(&db)
                .await?;

        Ok(TaskPage { items, total, page, limit })
    })
    .await?;

    Ok(Json(tasks))
}

/// `POST /api/tasks` — task plus tag relations, atomically.
pub async fn create(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Json(body): Json<CreateTaskRequest>,
) -> AppResult<(StatusCode, Json<Task>)> {
    state
        .require_membership(&current, body.workspace_id, Some(Role::Editor))
        .await?;
    if body.title.trim().is_empty() {
        return Err(AppError::validation("Task title must not be empty"));
    }

    let workspace_id = body.workspace_id;
    let title = body.title.trim().to_string();
    let tag_ids = body.tag_ids.clone();
    let creator = current.principal.id;

    let task = with_transaction(&state.db, TxOptions::default(), move |tx| {
        Box::pin(async move {
            let task = sqlx::query_as::<_, Task>(
                "INSERT INTO tasks (id, workspace_id, title, status, created_by, created_at, updated_at) \
                 VALUES ($1, $2, $3, 'todo', $4, $5, $5) \
                 RETURNING id, workspace_id, title, status, created_by, created_at, updated_at",
            )
            .bind(Uuid::new_v4())
            .bind(workspace_id)
            .bind(&title)
            .bind(creator)
            .bind(Utc::now())
            .fetch_one(&mut **tx)
            .await?;

            for tag_id in &tag_ids {
                // The subselect pins the tag to the same workspace; zero
                // rows means a foreign or unknown tag and rolls back.
                let related = sqlx::query(
                    "INSERT INTO task_tags (task_id, tag_id) \
                     SELECT $1, id FROM tags WHERE id = $2 AND workspace_id = $3",
                )
                .bind(task.id)
                .bind(tag_id)
                .bind(workspace_id)
                .execute(&mut **tx)
                .await?
                .rows_affected();

                if related == 0 {
                    return Err(AppError::validation(format!(
                        "Tag {} does not belong to the workspace",
                        tag_id
                    )));
                }
            }

            Ok(task)
        })
    })
    .await?;

    invalidation::tasks_changed(&state.cache, workspace_id).await;
    Ok((StatusCode::CREATED, Json(task)))
}

/// `PATCH /api/tasks/:id`
pub async fn update(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Path(task_id): Path<Uuid>,
    Json(body): Json<UpdateTaskRequest>,
) -> AppResult<Json<Task>> {
    let workspace_id = task_workspace(&state, task_id).await?;
    state
        .require_membership(&current, workspace_id, Some(Role::Editor))
        .await?;

    if body.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(AppError::validation("Task title must not be empty"));
    }
    if let Some(status) = &body.status {
        if !TASK_STATUSES.contains(&status.as_str()) {
            return Err(AppError::validation(format!(
                "Status must be one of: {}",
                TASK_STATUSES.join(", ")
            )));
        }
    }

    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET title = COALESCE($2, title), status = COALESCE($3, status), updated_at = $4 \
         WHERE id = $1 \
         RETURNING id, workspace_id, title, status, created_by, created_at, updated_at",
    )
    .bind(task_id)
    .bind(body.title.map(|t| t.trim().to_string()))
    .bind(body.status)
    .bind(Utc::now())
    .fetch_one(&state.db)
    .await?;

    invalidation::tasks_changed(&state.cache, workspace_id).await;
    Ok(Json(task))
}

/// `DELETE /api/tasks/:id`
pub async fn remove(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Path(task_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let workspace_id = task_workspace(&state, task_id).await?;
    state
        .require_membership(&current, workspace_id, Some(Role::Editor))
        .await?;

    sqlx::query("DELETE FROM tasks WHERE id = $1")
        .bind(task_id)
        .execute(&state.db)
        .await?;

    invalidation::tasks_changed(&state.cache, workspace_id).await;
    Ok(StatusCode::NO_CONTENT)
}
