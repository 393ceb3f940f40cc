use super::Transport;
use crate::config::with_scheme;
use crate::envelope::Envelope;
use crate::error::SendError;
use async_trait::async_trait;
use pulsemon_common::crypto::HASH_HEADER;
use pulsemon_common::types::Metric;
use pulsemon_common::REAL_IP_HEADER;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Posts gzipped JSON batches to `{address}/updates/`.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    envelope: Arc<Envelope>,
    real_ip: String,
}

impl HttpTransport {
    pub fn new(address: &str, envelope: Arc<Envelope>, real_ip: Ipv4Addr) -> Result<Self, SendError> {
        // reqwest's gzip feature adds Accept-Encoding and inflates responses.
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            url: format!("{}/updates/", with_scheme(address)),
            envelope,
            real_ip: real_ip.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(&self, metrics: &[Metric]) -> Result<(), SendError> {
        let sealed = self.envelope.seal_json(metrics)?;
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .header(REAL_IP_HEADER, &self.real_ip);
        if let Some(hash) = &sealed.hash {
            request = request.header(HASH_HEADER, hash);
        }

        let response = request.body(sealed.body).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(SendError::Status(status));
        }
        let hash = response
            .headers()
            .get(HASH_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await?;
        self.envelope.verify(&body, hash.as_deref())?;
        tracing::debug!(count = metrics.len(), encrypted = sealed.encrypted, "Batch accepted");
        Ok(())
    }
}
