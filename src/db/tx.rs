//! # Transactional Write Helper
//!
//! Scoped transactions with a deadline and explicit isolation. The body
//! receives the transaction handle; a timer races it and rolls back on
//! expiry. Commit happens only on success, and post-commit cache
//! invalidation is the caller's responsibility — strictly after commit, so
//! a stampede can never repopulate pre-commit state.
//!
//! Cancellation safety: when the request future is dropped (client
//! disconnect), the transaction handle drops and the connection rolls back.

use futures::future::BoxFuture;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Default transaction deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transaction isolation levels used by the core.
///
/// `ReadCommitted` is the default for read-modify-write sequences;
/// `Serializable` is reserved for tight race windows (member removal,
/// last-leader checks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Postgres default; sufficient for most invariants
    #[default]
    ReadCommitted,
    /// Stable snapshot for multi-read bodies
    RepeatableRead,
    /// Full serializability for tight race windows
    Serializable,
}

impl IsolationLevel {
    /// The `SET TRANSACTION` statement for this level.
    pub fn set_sql(self) -> &'static str {
        match self {
            Self::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            Self::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            Self::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
        }
    }
}

/// Options for [`with_transaction`].
#[derive(Debug, Clone, Copy)]
pub struct TxOptions {
    /// Deadline for the body; expiry rolls back and raises a database error
    pub timeout: Duration,
    /// Isolation level for the body
    pub isolation: IsolationLevel,
}

impl Default for TxOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            isolation: IsolationLevel::ReadCommitted,
        }
    }
}

impl TxOptions {
    /// Serializable isolation with the default deadline.
    pub fn serializable() -> Self {
        Self {
            isolation: IsolationLevel::Serializable,
            ..Self::default()
        }
    }

    /// Override the deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Run `body` inside a transaction: commit on success, roll back on error
/// or deadline expiry.
///
/// ```rust,ignore
/// let task = with_transaction(&pool, TxOptions::default(), |tx| {
///     Box::pin(async move {
///         let task = sqlx::query_as::<_, Task>(INSERT_TASK)
///             .bind(&title)
///             .fetch_one(&mut **tx)
///             .await?;
///         for tag_id in &tag_ids {
///             sqlx::query(INSERT_TAG_RELATION)
///                 .bind(task.id)
///                 .bind(tag_id)
///                 .execute(&mut **tx)
///                 .await?;
///         }
///         Ok(task)
///     })
/// })
/// .await?;
/// // Cache invalidation happens here, after commit.
/// ```
pub async fn with_transaction<T, F>(pool: &PgPool, opts: TxOptions, body: F) -> AppResult<T>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut Transaction<'static, Postgres>) -> BoxFuture<'t, AppResult<T>>
        + Send,
{
    let mut tx = pool.begin().await?;
    sqlx::query(opts.isolation.set_sql())
        .execute(&mut *tx)
        .await?;

    match tokio::time::timeout(opts.timeout, body(&mut tx)).await {
        Ok(Ok(value)) => {
            tx.commit().await?;
            Ok(value)
        }
        Ok(Err(err)) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "transaction rollback failed");
            }
            Err(err)
        }
        Err(_elapsed) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "transaction rollback failed after timeout");
            }
            Err(AppError::database_timeout())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_sql() {
        assert_eq!(
            IsolationLevel::ReadCommitted.set_sql(),
            "SET TRANSACTION ISOLATION LEVEL READ COMMITTED"
        );
        assert_eq!(
            IsolationLevel::Serializable.set_sql(),
            "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"
        );
    }

    #[test]
    fn test_default_options() {
        let opts = TxOptions::default();
        assert_eq!(opts.timeout, DEFAULT_TIMEOUT);
        assert_eq!(opts.isolation, IsolationLevel::ReadCommitted);

        let escalated = TxOptions::serializable().with_timeout(Duration::from_secs(5));
        assert_eq!(escalated.isolation, IsolationLevel::Serializable);
        assert_eq!(escalated.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_timeout_error_kind() {
        let err = AppError::database_timeout();
        assert_eq!(err.kind.code(), "DATABASE_ERROR");
        assert_eq!(err.details["timeout"], serde_json::Value::Bool(true));
    }
}
