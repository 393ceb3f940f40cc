use pulsemon_common::error::{Classify, ErrorKind, InvalidMetric};
use sea_orm::{DbErr, RuntimeErr};

/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use pulsemon_common::error::{Classify, ErrorKind, InvalidMetric};
/// use pulsemon_storage::StorageError;
///
/// let err = StorageError::from(InvalidMetric::MissingId);
/// assert_eq!(err.kind(), ErrorKind::InputInvalid);
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The metric violates the encoding constraints.
    #[error("Storage: invalid metric: {0}")]
    Invalid(#[from] InvalidMetric),

    /// A database error surfaced by SeaORM.
    #[error("Storage: database error: {0}")]
    Db(#[from] DbErr),

    /// Snapshot file access failed.
    #[error("Storage: snapshot file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// Snapshot (de)serialization failure.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend has no such capability.
    #[error("Storage: {0} is not supported by this backend")]
    Unsupported(&'static str),
}

impl Classify for StorageError {
    fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Invalid(_) => ErrorKind::InputInvalid,
            StorageError::Db(e) if is_transport(e) => ErrorKind::DbTransport,
            StorageError::Io { source, .. } => ErrorKind::from_io(source),
            StorageError::Db(_) | StorageError::Json(_) | StorageError::Unsupported(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// True for connection-class failures (SQLSTATE class `08`, dropped sockets,
/// pool exhaustion), which are worth retrying.
pub fn is_transport(err: &DbErr) -> bool {
    match err {
        DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => true,
        DbErr::Exec(RuntimeErr::SqlxError(e)) | DbErr::Query(RuntimeErr::SqlxError(e)) => {
            is_sqlx_transport(e)
        }
        _ => false,
    }
}

fn is_sqlx_transport(err: &sea_orm::sqlx::Error) -> bool {
    use sea_orm::sqlx::Error;
    match err {
        Error::Io(_) | Error::PoolTimedOut | Error::PoolClosed | Error::WorkerCrashed => true,
        Error::Database(db) => db.code().is_some_and(|code| code.starts_with("08")),
        _ => false,
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
