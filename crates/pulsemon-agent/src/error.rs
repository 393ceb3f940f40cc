use pulsemon_common::crypto::CryptoError;
use pulsemon_common::error::{Classify, ErrorKind};
use std::time::Duration;

/// Why a single submission attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("compress: {0}")]
    Compress(#[from] std::io::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {0}")]
    Status(reqwest::StatusCode),

    #[error("grpc: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("grpc endpoint: {0}")]
    Endpoint(#[from] tonic::transport::Error),

    #[error("grpc metadata: {0}")]
    Metadata(#[from] tonic::metadata::errors::InvalidMetadataValue),

    #[error("no answer within {0:?}")]
    Timeout(Duration),

    #[error("response is not signed")]
    UnsignedResponse,
}

fn status_kind(status: reqwest::StatusCode) -> ErrorKind {
    match status.as_u16() {
        400 => ErrorKind::InputInvalid,
        403 => ErrorKind::Forbidden,
        404 => ErrorKind::NotFound,
        _ => ErrorKind::Internal,
    }
}

fn grpc_kind(status: &tonic::Status) -> ErrorKind {
    use tonic::Code;
    match status.code() {
        Code::Unavailable => ErrorKind::ConnectionRefused,
        Code::DeadlineExceeded => ErrorKind::DeadlineExceeded,
        Code::InvalidArgument => ErrorKind::InputInvalid,
        Code::PermissionDenied => ErrorKind::Forbidden,
        Code::NotFound => ErrorKind::NotFound,
        _ => ErrorKind::Internal,
    }
}

impl Classify for SendError {
    fn kind(&self) -> ErrorKind {
        match self {
            SendError::Encode(_)
            | SendError::Compress(_)
            | SendError::Endpoint(_)
            | SendError::Metadata(_) => ErrorKind::Internal,
            SendError::Crypto(e) => e.kind(),
            SendError::Http(e) if e.is_timeout() => ErrorKind::DeadlineExceeded,
            SendError::Http(e) if e.is_connect() => ErrorKind::ConnectionRefused,
            SendError::Http(_) => ErrorKind::Internal,
            SendError::Status(status) => status_kind(*status),
            SendError::Grpc(status) => grpc_kind(status),
            SendError::Timeout(_) => ErrorKind::DeadlineExceeded,
            SendError::UnsignedResponse => ErrorKind::SignatureMismatch,
        }
    }
}
