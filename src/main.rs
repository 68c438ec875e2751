//! Kollab server entry point.
//!
//! Startup order: configuration, logging, source-of-truth pool (with
//! embedded migrations), cache client, then the router. Missing required
//! configuration terminates the process with a single structured log line.

use std::sync::Arc;

use kollab::auth::{AdminSet, SessionManager};
use kollab::cache::CacheClient;
use kollab::config::AppConfig;
use kollab::http::{router, AppState};
use kollab::membership::{MembershipResolver, PgMembershipSource};
use kollab::observability::Metrics;
use kollab::ratelimit::RateLimiter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match AppConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            // Logging is not up yet; emit one structured line by hand.
            eprintln!("{{\"level\":\"fatal\",\"message\":\"{}\"}}", err);
            std::process::exit(1);
        }
    };

    init_tracing(&config);
    kollab::error::set_production(config.environment.is_production());

    let db = kollab::db::connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let metrics = Arc::new(Metrics::new());
    let cache = Arc::new(
        CacheClient::connect(&config.cache_url)
            .await?
            .with_metrics(Arc::clone(&metrics)),
    );

    let sessions = Arc::new(SessionManager::new(
        db.clone(),
        Arc::clone(&cache),
        &config.auth_secret,
        config.session_expiry_days,
        config.environment.is_production(),
    ));
    let resolver = Arc::new(MembershipResolver::new(
        Arc::clone(&cache),
        Arc::new(PgMembershipSource::new(db.clone())),
    ));
    let limiter = Arc::new(RateLimiter::new(Arc::clone(&cache)));
    let admins = Arc::new(AdminSet::from_config(&config));

    if config.enable_demo_mode {
        seed_demo_principal(&db).await?;
    }

    let state = AppState {
        config: Arc::clone(&config),
        db,
        cache,
        limiter,
        sessions,
        resolver,
        admins,
        metrics,
    };

    let listener =
        tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, environment = ?config.environment, "kollab listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if config.environment.is_production() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

/// Insert the demo principal when demo mode is enabled. Idempotent.
async fn seed_demo_principal(db: &sqlx::PgPool) -> anyhow::Result<()> {
    let hash = kollab::auth::password::hash("Demo-Pass1!")
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    sqlx::query(
        "INSERT INTO principals (id, email, name, password_hash, created_at) \
         VALUES ($1, 'demo@kollab.local', 'Demo', $2, NOW()) \
         ON CONFLICT (email) DO NOTHING",
    )
    .bind(uuid::Uuid::new_v4())
    .bind(hash)
    .execute(db)
    .await?;
    tracing::info!("demo principal ready");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "shutdown signal handler failed");
    }
    tracing::info!("shutting down");
}
