use crate::error::{grpc_status, ApiError};
use crate::state::AppState;
use crate::subnet::TrustedSubnet;
use prost::Message;
use pulsemon_common::crypto::{self, HASH_METADATA};
use pulsemon_common::error::ErrorKind;
use pulsemon_common::proto::metric_service_server::{MetricService, MetricServiceServer};
use pulsemon_common::proto::{AddMetricRequest, AddMetricResponse, MetricBatchProto};
use pulsemon_common::types::from_proto_metrics;
use pulsemon_common::REAL_IP_METADATA;
use tonic::codec::CompressionEncoding;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tonic::service::interceptor::InterceptedService;
use tonic::service::Interceptor;
use tonic::{Request, Response, Status};

/// Metadata key that, set to `none`, skips signature verification.
const HASH_BYPASS_METADATA: &str = "hash";

pub struct MetricServiceImpl {
    state: AppState,
}

impl MetricServiceImpl {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    fn open(&self, request: AddMetricRequest) -> Result<MetricBatchProto, ApiError> {
        if request.encrypted.is_empty() {
            return Ok(MetricBatchProto {
                metrics: request.metrics,
            });
        }
        let key = self
            .state
            .private_key
            .as_ref()
            .ok_or_else(|| ApiError::Malformed("encrypted batch but no private key loaded".into()))?;
        let plain = crypto::decrypt(&request.encrypted, key)?;
        MetricBatchProto::decode(plain.as_slice()).map_err(|e| ApiError::Malformed(e.to_string()))
    }

    fn check_hash(&self, metadata: &MetadataMap, batch: &MetricBatchProto) -> Result<(), ApiError> {
        let key = self.state.key();
        if key.is_empty() || metadata_str(metadata, HASH_BYPASS_METADATA).is_some_and(|v| v.eq_ignore_ascii_case("none")) {
            return Ok(());
        }
        match metadata_str(metadata, HASH_METADATA) {
            Some(expected) => Ok(crypto::verify(&batch.encode_to_vec(), expected, key)?),
            None => Ok(()),
        }
    }

    async fn ingest(&self, request: Request<AddMetricRequest>) -> Result<Response<AddMetricResponse>, ApiError> {
        let (metadata, _, body) = request.into_parts();
        let batch = self.open(body)?;
        self.check_hash(&metadata, &batch)?;

        let metrics = from_proto_metrics(batch.metrics.clone())?;
        self.state.storage.add_batch(&metrics).await?;
        tracing::debug!(count = metrics.len(), "Metrics ingested over gRPC");

        let signature = crypto::sign(&batch.encode_to_vec(), self.state.key());
        let mut response = Response::new(AddMetricResponse {
            metrics: batch.metrics,
        });
        if let Some(hash) = signature.and_then(|h| h.parse::<AsciiMetadataValue>().ok()) {
            response.metadata_mut().insert(HASH_METADATA, hash);
        }
        Ok(response)
    }
}

fn metadata_str<'a>(metadata: &'a MetadataMap, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(|v| v.to_str().ok()).map(str::trim)
}

#[tonic::async_trait]
impl MetricService for MetricServiceImpl {
    async fn add_metric(
        &self,
        request: Request<AddMetricRequest>,
    ) -> Result<Response<AddMetricResponse>, Status> {
        self.ingest(request).await.map_err(|e| {
            let status = grpc_status(&e);
            if status.code() == tonic::Code::Internal {
                tracing::error!(error = %e, "gRPC ingest failed");
            } else {
                tracing::debug!(error = %e, "gRPC ingest rejected");
            }
            status
        })
    }
}

/// Enforces the trusted subnet on gRPC calls. The `x-real-ip` metadata wins;
/// without it the peer address is used.
#[derive(Clone)]
pub struct SubnetInterceptor {
    subnet: TrustedSubnet,
}

impl SubnetInterceptor {
    pub fn new(subnet: TrustedSubnet) -> Self {
        Self { subnet }
    }
}

impl Interceptor for SubnetInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let peer = request.remote_addr().map(|a| a.ip().to_string());
        let real_ip = metadata_str(request.metadata(), REAL_IP_METADATA)
            .map(str::to_owned)
            .or(peer);
        match self.subnet.check(real_ip.as_deref()) {
            Ok(()) => Ok(request),
            Err(ErrorKind::Forbidden) => {
                tracing::warn!(real_ip = real_ip.as_deref().unwrap_or("-"), "gRPC call outside trusted subnet");
                Err(Status::permission_denied("address not in trusted subnet"))
            }
            Err(_) => Err(Status::internal("trusted subnet is misconfigured")),
        }
    }
}

pub type GrpcService = InterceptedService<MetricServiceServer<MetricServiceImpl>, SubnetInterceptor>;

/// The metric service with gzip both ways and the subnet guard in front.
pub fn grpc_service(state: AppState) -> GrpcService {
    let interceptor = SubnetInterceptor::new(state.subnet.clone());
    let server = MetricServiceServer::new(MetricServiceImpl::new(state))
        .accept_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Gzip);
    InterceptedService::new(server, interceptor)
}
