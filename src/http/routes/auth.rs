//! Registration, login, logout, and the current-principal probe.
//!
//! Registration creates the principal's default workspace and owner
//! membership in one transaction; the session cookie is set on the 201.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::password;
use crate::db::{with_transaction, TxOptions};
use crate::error::{AppError, AppResult};
use crate::http::{AppState, CurrentPrincipal};
use crate::membership::Role;
use crate::models::{Principal, Workspace};

use super::slugify;

/// Registration payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Unique email
    pub email: String,
    /// Candidate password
    pub password: String,
    /// Display name
    pub name: String,
}

/// Login payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Registered email
    pub email: String,
    /// Password
    pub password: String,
}

fn validate_email(email: &str) -> AppResult<()> {
    let well_formed = email.len() <= 254
        && email.split_once('@').is_some_and(|(local, domain)| {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        });
    if well_formed {
        Ok(())
    } else {
        Err(AppError::validation("Invalid email address"))
    }
}

/// `POST /api/auth/register`
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<Response> {
    validate_email(&body.email)?;
    password::validate_policy(&body.password)?;
    if body.name.trim().is_empty() {
        return Err(AppError::validation("Name must not be empty"));
    }

    let password_hash = password::hash(&body.password)?;
    let email = body.email.to_lowercase();
    let name = body.name.trim().to_string();
    let slug = format!("{}-workspace-{}", slugify(&name), Utc::now().timestamp());

    let (principal, workspace) =
        with_transaction(&state.db, TxOptions::default(), move |tx| {
            Box::pin(async move {
                let exists: Option<(Uuid,)> =
                    sqlx::query_as("SELECT id FROM principals WHERE email = $1")
                        .bind(&email)
                        .fetch_optional(&mut **tx)
                        .await?;
                if exists.is_some() {
                    return Err(AppError::conflict("Email is already registered"));
                }

                let principal = sqlx::query_as::<_, Principal>(
                    "INSERT INTO principals (id, email, name, password_hash, created_at) \
                     VALUES ($1, $2, $3, $4, $5) \
                     RETURNING id, email, name, password_hash, created_at",
                )
                .bind(Uuid::new_v4())
                .bind(&email)
                .bind(&name)
                .bind(&password_hash)
                .bind(Utc::now())
                .fetch_one(&mut **tx)
                .await?;

                let workspace = sqlx::query_as::<_, Workspace>(
                    "INSERT INTO workspaces (id, slug, name, created_by, settings, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $6) \
                     RETURNING id, slug, name, created_by, settings, created_at, updated_at",
                )
                .bind(Uuid::new_v4())
                .bind(&slug)
                .bind(format!("{}'s Workspace", name))
                .bind(principal.id)
                .bind(json!({}))
                .bind(Utc::now())
                .fetch_one(&mut **tx)
                .await?;

                sqlx::query(
                    "INSERT INTO memberships (workspace_id, principal_id, role, joined_at) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(workspace.id)
                .bind(principal.id)
                .bind(Role::Owner)
                .bind(Utc::now())
                .execute(&mut **tx)
                .await?;

                Ok((principal, workspace))
            })
        })
        .await?;

    let session = state.sessions.create(&principal).await?;
    let cookie = state.sessions.build_cookie(&session.id);

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "principal": principal, "workspace": workspace })),
    )
        .into_response())
}

/// `POST /api/auth/login`
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Response> {
    let principal = sqlx::query_as::<_, Principal>(
        "SELECT id, email, name, password_hash, created_at FROM principals WHERE email = $1",
    )
    .bind(body.email.to_lowercase())
    .fetch_optional(&state.db)
    .await?;

    // Same failure for unknown email and wrong password.
    let principal = principal
        .filter(|p| password::verify(&body.password, &p.password_hash))
        .ok_or_else(|| AppError::unauthenticated("Invalid email or password"))?;

    let session = state.sessions.create(&principal).await?;
    let cookie = state.sessions.build_cookie(&session.id);

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "principal": principal })),
    )
        .into_response())
}

/// `POST /api/auth/logout`
pub async fn logout(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentPrincipal>,
) -> AppResult<Response> {
    state.sessions.destroy(&current.session_id).await?;
    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, state.sessions.blank_cookie())],
    )
        .into_response())
}

/// `GET /api/auth/me`
pub async fn me(Extension(current): Extension<CurrentPrincipal>) -> Json<Principal> {
    Json(current.principal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(validate_email("a@b.c").is_ok());
        assert!(validate_email("first.last@kollab.app").is_ok());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@missing.local").is_err());
        assert!(validate_email("a@nodot").is_err());
    }
}
