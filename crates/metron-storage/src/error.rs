use crate::sql::SqlError;
use metron_common::types::MetricKind;

/// Errors returned by every [`crate::AggregateStore`] backend.
///
/// # Examples
///
/// ```rust
/// use metron_common::types::MetricKind;
/// use metron_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     kind: MetricKind::Gauge,
///     key: "Alloc".to_string(),
/// };
/// assert!(err.is_not_found());
/// assert!(err.to_string().contains("Alloc"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The key was never set.
    #[error("Storage: {kind} '{key}' not found")]
    NotFound { kind: MetricKind, key: String },

    /// A row exists for the key but holds no usable value.
    #[error("Storage: {kind} '{key}' has no valid value")]
    NotValid { kind: MetricKind, key: String },

    /// A uniqueness constraint rejected the write.
    #[error("Storage: conflicting write: {0}")]
    Conflict(String),

    #[error("Storage: {0}")]
    Sql(SqlError),

    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot file could not be encoded or decoded.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Shutdown was requested while waiting to retry.
    #[error("Storage: operation cancelled")]
    Cancelled,
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

impl From<SqlError> for StorageError {
    fn from(e: SqlError) -> Self {
        match e {
            SqlError::Constraint(msg) => StorageError::Conflict(msg),
            SqlError::Cancelled => StorageError::Cancelled,
            other => StorageError::Sql(other),
        }
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
