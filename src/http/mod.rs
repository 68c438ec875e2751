//! # HTTP Surface
//!
//! Application state, the middleware pipeline assembly, and the feature
//! route surface. Feature handlers stay thin: they orchestrate the
//! membership resolver, the cached read aggregator, and the transactional
//! write helper, and never reach around them.

use axum::extract::DefaultBodyLimit;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{delete, get, patch, post};
use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{AdminSet, SessionManager};
use crate::cache::CacheClient;
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::membership::{MembershipResolver, Role};
use crate::observability::Metrics;
use crate::ratelimit::{buckets, Bucket, RateLimiter};

pub mod middleware;
pub mod pagination;
pub mod routes;

pub use middleware::CurrentPrincipal;

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration
    pub config: Arc<AppConfig>,
    /// Source-of-truth pool
    pub db: PgPool,
    /// Shared cache client
    pub cache: Arc<CacheClient>,
    /// Fixed-window rate limiter
    pub limiter: Arc<RateLimiter>,
    /// Session authenticator
    pub sessions: Arc<SessionManager>,
    /// Membership resolver
    pub resolver: Arc<MembershipResolver>,
    /// System-admin override set
    pub admins: Arc<AdminSet>,
    /// Prometheus registry
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Whether cookies should carry the `Secure` attribute.
    pub fn secure_cookies(&self) -> bool {
        self.config.environment.is_production()
    }

    /// Resolve the caller's effective role on a workspace, gated on
    /// `minimum`.
    ///
    /// The system-admin override is evaluated first and never touches the
    /// resolver cache; every override use is logged.
    pub async fn require_membership(
        &self,
        current: &CurrentPrincipal,
        workspace_id: Uuid,
        minimum: Option<Role>,
    ) -> AppResult<Role> {
        if self.admins.is_admin(&current.principal) {
            tracing::info!(
                principal_id = %current.principal.id,
                workspace = %workspace_id,
                "system admin override applied"
            );
            return Ok(Role::Owner);
        }

        self.resolver
            .resolve(workspace_id, current.principal.id, minimum)
            .await
            .map(|membership| membership.role)
    }
}

/// Assemble the full router with the ordered pipeline.
pub fn router(state: AppState) -> Router {
    let rl = |bucket: &'static Bucket| {
        from_fn_with_state((state.clone(), bucket), middleware::rate_limit)
    };

    // Read surface; the general `api` bucket backstops it.
    let reads = Router::new()
        .route("/api/auth/me", get(routes::auth::me))
        .route("/api/auth/logout", post(routes::auth::logout))
        .route("/api/workspaces", get(routes::workspaces::list))
        .route("/api/workspaces/:id", get(routes::workspaces::get))
        .route("/api/workspaces/:id/members", get(routes::workspaces::list_members))
        .route("/api/workspaces/:id/documents", get(routes::documents::list))
        .route("/api/workspaces/:id/tasks", get(routes::tasks::list))
        .route("/api/workspaces/:id/projects", get(routes::projects::list))
        .route("/api/workspaces/:id/teams", get(routes::teams::list))
        .layer(rl(&buckets::API));

    let search = Router::new()
        .route("/api/search", get(routes::search::search))
        .layer(rl(&buckets::SEARCH));

    // Resource creation, one bucket per type.
    let create_workspaces = Router::new()
        .route("/api/workspaces", post(routes::workspaces::create))
        .layer(rl(&buckets::CREATE_WORKSPACE));
    let create_documents = Router::new()
        .route("/api/documents", post(routes::documents::create))
        .layer(rl(&buckets::CREATE_DOCUMENT));
    let create_tasks = Router::new()
        .route("/api/tasks", post(routes::tasks::create))
        .layer(rl(&buckets::CREATE_TASK));
    let create_projects = Router::new()
        .route("/api/projects", post(routes::projects::create))
        .layer(rl(&buckets::CREATE_PROJECT));
    let create_teams = Router::new()
        .route("/api/teams", post(routes::teams::create))
        .layer(rl(&buckets::CREATE_TEAM));

    let updates = Router::new()
        .route("/api/workspaces/:id", patch(routes::workspaces::update))
        .route("/api/workspaces/:id/members", post(routes::workspaces::add_member))
        .route(
            "/api/workspaces/:id/members/:principal",
            patch(routes::workspaces::update_member_role),
        )
        .route("/api/documents/:id", patch(routes::documents::update))
        .route("/api/documents/:id/archive", post(routes::documents::archive))
        .route("/api/tasks/:id", patch(routes::tasks::update))
        .layer(rl(&buckets::UPDATE));

    let deletes = Router::new()
        .route("/api/workspaces/:id", delete(routes::workspaces::remove))
        .route(
            "/api/workspaces/:id/members/:principal",
            delete(routes::workspaces::remove_member),
        )
        .route("/api/documents/:id", delete(routes::documents::remove))
        .route("/api/tasks/:id", delete(routes::tasks::remove))
        .route(
            "/api/teams/:id/members/:principal",
            delete(routes::teams::remove_member),
        )
        .layer(rl(&buckets::DELETE));

    let admin = Router::new()
        .route("/api/admin/cache/stats", get(routes::admin::cache_stats))
        .route("/api/admin/cache/purge", post(routes::admin::cache_purge))
        .layer(rl(&buckets::API))
        .layer(from_fn_with_state(state.clone(), middleware::require_system_admin));

    // Stages 4–6 wrap the protected surface; per-route buckets sit inside.
    let protected = reads
        .merge(search)
        .merge(create_workspaces)
        .merge(create_documents)
        .merge(create_tasks)
        .merge(create_projects)
        .merge(create_teams)
        .merge(updates)
        .merge(deletes)
        .merge(admin)
        .layer(from_fn_with_state(state.clone(), middleware::performance_logger))
        .layer(from_fn(middleware::error_context))
        .layer(from_fn_with_state(state.clone(), middleware::authenticate));

    // Session-establishing routes skip authentication but keep the rest.
    let public_auth = Router::new()
        .route("/api/auth/register", post(routes::auth::register))
        .route("/api/auth/login", post(routes::auth::login))
        .layer(rl(&buckets::AUTH))
        .layer(from_fn_with_state(state.clone(), middleware::performance_logger))
        .layer(from_fn(middleware::error_context));

    let system = Router::new()
        .route("/health/live", get(routes::system::live))
        .route("/health/ready", get(routes::system::ready))
        .route("/metrics", get(routes::system::metrics));

    Router::new()
        .merge(public_auth)
        .merge(system)
        .merge(protected)
        .layer(from_fn_with_state(state.clone(), middleware::csrf_guard))
        .layer(middleware::cors_layer(&state.config.frontend_url))
        .layer(DefaultBodyLimit::max(state.config.max_upload_size_bytes as usize))
        .with_state(state)
}
