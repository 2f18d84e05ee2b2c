//! The SQL capability consumed by [`crate::relational::RelationalStore`].
//!
//! The store only needs to execute statements, read rows and run a
//! transaction, so any driver exposing those four operations can back it.
//! [`crate::sqlite::SqliteExecutor`] is the bundled implementation.

use async_trait::async_trait;
use metron_common::retry::{retry_handle, Backoff, Failure, RetryError};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// A bound parameter or a column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Real(v) => Some(*v),
            SqlValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Reals are truncated; values beyond the `i64` range saturate.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            SqlValue::Real(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

pub type SqlRow = Vec<SqlValue>;

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    /// The database could not be reached or was temporarily unavailable.
    #[error("SQL connection error: {0}")]
    Connection(String),

    #[error("SQL constraint violation: {0}")]
    Constraint(String),

    /// Syntax, type and every other statement-level failure.
    #[error("SQL statement failed: {0}")]
    Statement(String),

    #[error("SQL retry timed out after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: Box<SqlError> },

    #[error("SQL operation cancelled")]
    Cancelled,
}

impl SqlError {
    pub fn is_connection(&self) -> bool {
        matches!(self, SqlError::Connection(_))
    }
}

impl From<RetryError<SqlError>> for SqlError {
    fn from(e: RetryError<SqlError>) -> Self {
        match e {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { attempts, last } => SqlError::Exhausted {
                attempts,
                last: Box::new(last),
            },
            RetryError::Cancelled { .. } => SqlError::Cancelled,
        }
    }
}

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Runs a statement and returns the number of affected rows.
    async fn exec(&self, sql: &str, params: &[SqlValue]) -> Result<usize, SqlError>;

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, SqlError>;

    /// The first row, or `None` when the query matched nothing.
    async fn query_row(&self, sql: &str, params: &[SqlValue]) -> Result<Option<SqlRow>, SqlError>;

    async fn begin(&self) -> Result<Box<dyn SqlTransaction>, SqlError>;
}

/// An open transaction. Dropping it without `commit` rolls it back.
#[async_trait]
pub trait SqlTransaction: Send {
    async fn exec(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize, SqlError>;

    async fn commit(self: Box<Self>) -> Result<(), SqlError>;

    async fn rollback(self: Box<Self>) -> Result<(), SqlError>;
}

/// Retries connection-class failures of the wrapped executor on a backoff
/// schedule. Constraint and statement errors are returned at once.
///
/// Statements inside a transaction are not retried; only `begin` is.
pub struct RetryingExecutor<E> {
    inner: E,
    backoff: Backoff,
    cancel: CancellationToken,
}

impl<E: SqlExecutor> RetryingExecutor<E> {
    pub fn new(inner: E, backoff: Backoff, cancel: CancellationToken) -> Self {
        Self {
            inner,
            backoff,
            cancel,
        }
    }

    async fn retry<T, F, Fut>(&self, mut op: F) -> Result<T, SqlError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, SqlError>> + Send,
        T: Send,
    {
        retry_handle(&self.backoff, &self.cancel, || {
            let attempt = op();
            async move {
                attempt.await.map_err(|e| {
                    if e.is_connection() {
                        Failure::Retryable(e)
                    } else {
                        Failure::Permanent(e)
                    }
                })
            }
        })
        .await
        .map_err(SqlError::from)
    }
}

#[async_trait]
impl<E: SqlExecutor> SqlExecutor for RetryingExecutor<E> {
    async fn exec(&self, sql: &str, params: &[SqlValue]) -> Result<usize, SqlError> {
        self.retry(|| self.inner.exec(sql, params)).await
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, SqlError> {
        self.retry(|| self.inner.query(sql, params)).await
    }

    async fn query_row(&self, sql: &str, params: &[SqlValue]) -> Result<Option<SqlRow>, SqlError> {
        self.retry(|| self.inner.query_row(sql, params)).await
    }

    async fn begin(&self) -> Result<Box<dyn SqlTransaction>, SqlError> {
        self.retry(|| self.inner.begin()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Fails the first `failures` calls with `error`, then succeeds.
    struct FlakyExecutor {
        failures: usize,
        error: fn() -> SqlError,
        calls: Arc<AtomicUsize>,
    }

    impl FlakyExecutor {
        fn attempt(&self) -> Result<(), SqlError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err((self.error)())
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl SqlExecutor for FlakyExecutor {
        async fn exec(&self, _sql: &str, _params: &[SqlValue]) -> Result<usize, SqlError> {
            self.attempt().map(|_| 1)
        }

        async fn query(&self, _sql: &str, _params: &[SqlValue]) -> Result<Vec<SqlRow>, SqlError> {
            self.attempt().map(|_| Vec::new())
        }

        async fn query_row(&self, _sql: &str, _params: &[SqlValue]) -> Result<Option<SqlRow>, SqlError> {
            self.attempt().map(|_| None)
        }

        async fn begin(&self) -> Result<Box<dyn SqlTransaction>, SqlError> {
            Err(SqlError::Statement("transactions unsupported".into()))
        }
    }

    fn flaky(failures: usize, error: fn() -> SqlError) -> (RetryingExecutor<FlakyExecutor>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = FlakyExecutor {
            failures,
            error,
            calls: calls.clone(),
        };
        (
            RetryingExecutor::new(executor, Backoff::default(), CancellationToken::new()),
            calls,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn connection_errors_are_retried() {
        let (db, calls) = flaky(2, || SqlError::Connection("database is locked".into()));
        assert_eq!(db.exec("UPDATE x SET y = 1", &[]).await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn statement_errors_are_not_retried() {
        let (db, calls) = flaky(5, || SqlError::Statement("syntax error".into()));
        assert!(matches!(db.query("SELEC", &[]).await, Err(SqlError::Statement(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_keep_last_error() {
        let (db, calls) = flaky(10, || SqlError::Connection("unable to open".into()));
        match db.query_row("SELECT 1", &[]).await {
            Err(SqlError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(last.is_connection());
            }
            other => panic!("expected exhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn numeric_accessors_convert_between_column_types() {
        assert_eq!(SqlValue::Integer(3).as_f64(), Some(3.0));
        assert_eq!(SqlValue::Real(2.9).as_i64(), Some(2));
        assert_eq!(SqlValue::Null.as_f64(), None);
        assert_eq!(SqlValue::from("a").as_str(), Some("a"));
    }
}
