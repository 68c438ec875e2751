//! # Database Layer
//!
//! Connection pool construction, the readiness probe, and the transactional
//! write helper. All multi-row writes in the crate go through
//! [`tx::with_transaction`].

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::{Duration, Instant};

use crate::error::{AppError, AppResult};

pub mod tx;

pub use tx::{with_transaction, IsolationLevel, TxOptions};

/// Default statement acquisition timeout.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the shared connection pool.
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .min_connections(2)
        .max_connections(20)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await
}

/// Round-trip latency probe for readiness checks.
pub async fn ping(pool: &PgPool) -> AppResult<Duration> {
    let start = Instant::now();
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(|e| AppError::service_unavailable(format!("Database unreachable: {}", e)))?;
    Ok(start.elapsed())
}
