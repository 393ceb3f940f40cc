use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pulsemon_common::crypto::CryptoError;
use pulsemon_common::error::{Classify, ErrorKind, InvalidMetric};
use pulsemon_storage::StorageError;

/// Failure on a request path. Clients only ever see the status code.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Invalid(#[from] InvalidMetric),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("malformed body: {0}")]
    Malformed(String),

    #[error("cannot read body: {0}")]
    Read(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("rejected by {0}")]
    Rejected(ErrorKind),
}

impl Classify for ApiError {
    fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Storage(e) => e.kind(),
            ApiError::Invalid(e) => e.kind(),
            ApiError::Crypto(e) => e.kind(),
            ApiError::Malformed(_) => ErrorKind::InputInvalid,
            ApiError::Read(_) => ErrorKind::Internal,
            ApiError::NotFound(_) => ErrorKind::NotFound,
            ApiError::Rejected(kind) => *kind,
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Malformed(e.to_string())
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InputInvalid | ErrorKind::SignatureMismatch => StatusCode::BAD_REQUEST,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::ConnectionRefused
        | ErrorKind::DbTransport
        | ErrorKind::FileLocked
        | ErrorKind::DeadlineExceeded
        | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn grpc_status(err: &ApiError) -> tonic::Status {
    let message = err.to_string();
    match err.kind() {
        ErrorKind::InputInvalid | ErrorKind::SignatureMismatch => {
            tonic::Status::invalid_argument(message)
        }
        ErrorKind::Forbidden => tonic::Status::permission_denied(message),
        ErrorKind::NotFound => tonic::Status::not_found(message),
        _ => tonic::Status::internal(message),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            tracing::error!(kind = %kind, error = %self, "Request failed");
        } else {
            tracing::debug!(kind = %kind, error = %self, "Request rejected");
        }
        status.into_response()
    }
}
