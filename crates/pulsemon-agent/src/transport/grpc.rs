use super::Transport;
use crate::config::with_scheme;
use crate::envelope::Envelope;
use crate::error::SendError;
use async_trait::async_trait;
use prost::Message;
use pulsemon_common::crypto::HASH_METADATA;
use pulsemon_common::proto::metric_service_client::MetricServiceClient;
use pulsemon_common::proto::{AddMetricRequest, MetricBatchProto};
use pulsemon_common::types::Metric;
use pulsemon_common::REAL_IP_METADATA;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tonic::codec::CompressionEncoding;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tonic::transport::{Channel, Endpoint};

/// Calls `MetricService/AddMetric` with gzip message compression.
pub struct GrpcTransport {
    client: MetricServiceClient<Channel>,
    envelope: Arc<Envelope>,
    real_ip: AsciiMetadataValue,
}

impl GrpcTransport {
    /// The channel connects on first use, so an unreachable server surfaces
    /// as a retryable `Unavailable` on the first send rather than here.
    pub fn new(address: &str, envelope: Arc<Envelope>, real_ip: Ipv4Addr) -> Result<Self, SendError> {
        let channel = Endpoint::from_shared(with_scheme(address))?.connect_lazy();
        Ok(Self::with_channel(channel, envelope, real_ip.to_string().parse()?))
    }

    pub fn with_channel(channel: Channel, envelope: Arc<Envelope>, real_ip: AsciiMetadataValue) -> Self {
        let client = MetricServiceClient::new(channel)
            .send_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Gzip);
        Self {
            client,
            envelope,
            real_ip,
        }
    }
}

fn response_hash(metadata: &MetadataMap) -> Option<String> {
    metadata
        .get(HASH_METADATA)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

#[async_trait]
impl Transport for GrpcTransport {
    fn name(&self) -> &'static str {
        "grpc"
    }

    async fn send(&self, metrics: &[Metric]) -> Result<(), SendError> {
        let sealed = self.envelope.seal_proto(metrics)?;
        let mut request = tonic::Request::new(AddMetricRequest {
            metrics: sealed.metrics,
            encrypted: sealed.encrypted,
        });
        request
            .metadata_mut()
            .insert(REAL_IP_METADATA, self.real_ip.clone());
        if let Some(hash) = &sealed.hash {
            request.metadata_mut().insert(HASH_METADATA, hash.parse()?);
        }

        let response = self.client.clone().add_metric(request).await?;
        let hash = response_hash(response.metadata());
        let echoed = MetricBatchProto {
            metrics: response.into_inner().metrics,
        };
        self.envelope.verify(&echoed.encode_to_vec(), hash.as_deref())?;
        tracing::debug!(count = metrics.len(), "Batch accepted");
        Ok(())
    }
}
