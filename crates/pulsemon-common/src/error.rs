use crate::types::MetricKind;

/// Failure classes shared by the agent and the server.
///
/// The class decides whether a failed operation is worth another attempt
/// and which status a request path answers with.
///
/// # Examples
///
/// ```
/// use pulsemon_common::error::ErrorKind;
///
/// assert!(ErrorKind::DeadlineExceeded.is_retryable());
/// assert!(!ErrorKind::SignatureMismatch.is_retryable());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectionRefused,
    DbTransport,
    FileLocked,
    DeadlineExceeded,
    InputInvalid,
    SignatureMismatch,
    Forbidden,
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectionRefused
                | ErrorKind::DbTransport
                | ErrorKind::FileLocked
                | ErrorKind::DeadlineExceeded
        )
    }

    /// Classifies an I/O error raised by local file access or a socket.
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match err.kind() {
            Io::ConnectionRefused => ErrorKind::ConnectionRefused,
            Io::PermissionDenied | Io::ReadOnlyFilesystem => ErrorKind::FileLocked,
            Io::TimedOut => ErrorKind::DeadlineExceeded,
            _ => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::DbTransport => "db_transport",
            ErrorKind::FileLocked => "file_locked",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::InputInvalid => "input_invalid",
            ErrorKind::SignatureMismatch => "signature_mismatch",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Implemented by every error type that crosses a retry or status boundary.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

/// A metric that violates the encoding constraints.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidMetric {
    #[error("metric id is empty")]
    MissingId,

    #[error("metric id is {0} bytes long")]
    IdTooLong(usize),

    #[error("unknown metric kind: {0}")]
    UnknownKind(String),

    #[error("metric {id}: fields do not match kind {kind}")]
    FieldMismatch { id: String, kind: MetricKind },

    #[error("metric {0}: value is not finite")]
    NonFinite(String),

    #[error("cannot parse value {0:?}")]
    BadValue(String),
}

impl Classify for InvalidMetric {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InputInvalid
    }
}
