//! Team routes. Team creation inserts the team and its leader membership
//! atomically; member removal runs serializable so the last-leader
//! invariant cannot race.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::cache::keys::TeamsListKey;
use crate::cache::{get_or_compute, invalidation};
use crate::db::{with_transaction, TxOptions};
use crate::error::{AppError, AppResult};
use crate::http::{AppState, CurrentPrincipal};
use crate::membership::Role;
use crate::models::TeamSummary;

/// Team creation payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTeamRequest {
    /// Owning workspace
    pub workspace_id: Uuid,
    /// Name
    pub name: String,
    /// Leader principal; defaults to the caller
    pub leader_id: Option<Uuid>,
}

/// `GET /api/workspaces/:id/teams`
pub async fn list(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Path(workspace_id): Path<Uuid>,
) -> AppResult<Json<Vec<TeamSummary>>> {
    state
        .require_membership(&current, workspace_id, Some(Role::Viewer))
        .await?;

    let db = state.db.clone();
    let teams = get_or_compute(&state.cache, &TeamsListKey(workspace_id), || async move {
        let teams = sqlx::query_as::<_, TeamSummary>(
            "SELECT t.id, t.name, COUNT(tm.principal_id) AS member_count, t.created_at \
             FROM teams t \
             LEFT JOIN team_members tm ON tm.team_id = t.id \
             WHERE t.workspace_id = $1 \
             GROUP BY t.id, t.name, t.created_at \
             ORDER BY t.created_at DESC, t.id DESC",
        )
        .bind(workspace_id)
        .fetch_all(&db)
        .await?;
        Ok(teams)
    })
    .await?;

    Ok(Json(teams))
}

/// `POST /api/teams` — team plus leader membership, atomically.
pub async fn create(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Json(body): Json<CreateTeamRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    state
        .require_membership(&current, body.workspace_id, Some(Role::Editor))
        .await?;
    if body.name.trim().is_empty() {
        return Err(AppError::validation("Team name must not be empty"));
    }

    let workspace_id = body.workspace_id;
    let name = body.name.trim().to_string();
    let leader_id = body.leader_id.unwrap_or(current.principal.id);

    let team_id = with_transaction(&state.db, TxOptions::default(), move |tx| {
        Box::pin(async move {
            let member: Option<(Role,)> = sqlx::query_as(
                "SELECT role FROM memberships \
                 WHERE workspace_id = $1 AND principal_id = $2",
            )
            .bind(workspace_id)
            .bind(leader_id)
            .fetch_optional(&mut **tx)
            .await?;
            if member.is_none() {
                return Err(AppError::validation(
                    "The team leader must be a workspace member",
                ));
            }

            let (team_id,): (Uuid,) = sqlx::query_as(
                "INSERT INTO teams (id, workspace_id, name, created_at) \
                 VALUES ($1, $2, $3, $4) RETURNING id",
            )
            .bind(Uuid::new_v4())
            .bind(workspace_id)
            .bind(&name)
            .bind(Utc::now())
            .fetch_one(&mut **tx)
            .await?;

            sqlx::query(
                "INSERT INTO team_members (team_id, principal_id, leader, joined_at) \
                 VALUES ($1, $2, TRUE, $3)",
            )
            .bind(team_id)
            .bind(leader_id)
            .bind(Utc::now())
            .execute(&mut **tx)
            .await?;

            Ok(team_id)
        })
    })
    .await?;

    invalidation::teams_changed(&state.cache, workspace_id).await;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": team_id, "name": body.name.trim(), "leaderId": leader_id })),
    ))
}

/// `DELETE /api/teams/:id/members/:principal`
///
/// Serializable: the last-leader check must not race a concurrent removal.
pub async fn remove_member(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
    Path((team_id, principal_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let row: Option<(Uuid,)> = sqlx::query_as("SELECT workspace_id FROM teams WHERE id = $1")
        .bind(team_id)
        .fetch_optional(&state.db)
        .await?;
    let (workspace_id,) = row.ok_or_else(|| AppError::not_found("Team not found"))?;

    state
        .require_membership(&current, workspace_id, Some(Role::Admin))
        .await?;

    with_transaction(&state.db, TxOptions::serializable(), move |tx| {
        Box::pin(async move {
            let member: Option<(bool,)> = sqlx::query_as(
                "SELECT leader FROM team_members \
                 WHERE team_id = $1 AND principal_id = $2",
            )
            .bind(team_id)
            .bind(principal_id)
            .fetch_optional(&mut **tx)
            .await?;

            let (is_leader,) =
                member.ok_or_else(|| AppError::not_found("Team member not found"))?;

            if is_leader {
                let (leaders,): (i64,) = sqlx::query_as(
                    "SELECT COUNT(*) FROM team_members WHERE team_id = $1 AND leader",
                )
                .bind(team_id)
                .fetch_one(&mut **tx)
                .await?;
                if leaders <= 1 {
                    return Err(AppError::conflict(
                        "A team must retain at least one leader",
                    ));
                }
            }

            sqlx::query(
                "DELETE FROM team_members WHERE team_id = $1 AND principal_id = $2",
            )
            .bind(team_id)
            .bind(principal_id)
            .execute(&mut **tx)
            .await?;
            Ok(())
        })
    })
    .await?;

    invalidation::teams_changed(&state.cache, workspace_id).await;
    Ok(StatusCode::NO_CONTENT)
}
