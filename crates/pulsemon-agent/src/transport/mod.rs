//! The two wires a worker can submit a batch over.

pub mod grpc;
pub mod http;

use crate::config::{AgentConfig, TransportKind};
use crate::envelope::Envelope;
use crate::error::SendError;
use async_trait::async_trait;
use pulsemon_common::types::Metric;
use std::net::Ipv4Addr;
use std::sync::Arc;

pub use grpc::GrpcTransport;
pub use http::HttpTransport;

/// One submission of a metric batch. Implementations sign, seal and send;
/// retries and deadlines are the caller's job.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, metrics: &[Metric]) -> Result<(), SendError>;
}

/// Builds the transport selected in `config`.
pub fn from_config(
    config: &AgentConfig,
    envelope: Arc<Envelope>,
    real_ip: Ipv4Addr,
) -> Result<Arc<dyn Transport>, SendError> {
    Ok(match &config.transport {
        TransportKind::Http { address } => {
            Arc::new(HttpTransport::new(address, envelope, real_ip)?)
        }
        TransportKind::Grpc { address } => {
            Arc::new(GrpcTransport::new(address, envelope, real_ip)?)
        }
    })
}
