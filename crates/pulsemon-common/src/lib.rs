//! Shared building blocks for the pulsemon agent and server: the metric
//! model, the gRPC schema, the error taxonomy, and the signing/sealing
//! envelope both sides apply to every payload.

pub mod compress;
pub mod config;
pub mod crypto;
pub mod error;
pub mod retry;
pub mod types;

pub mod proto {
    #![allow(clippy::pedantic)]
    #![allow(clippy::missing_errors_doc)]
    #![allow(clippy::doc_markdown)]
    #![allow(clippy::default_trait_access)]
    tonic::include_proto!("pulsemon");
}

/// Header carrying the agent host's IPv4 address.
pub const REAL_IP_HEADER: &str = "X-Real-IP";

/// gRPC metadata key for the same address (metadata keys are lowercase).
pub const REAL_IP_METADATA: &str = "x-real-ip";
