//! Turns a metric batch into what goes on the wire.
//!
//! The signature is always taken over the plain encoding, so switching
//! compression or encryption on or off never changes it.

use crate::error::SendError;
use prost::Message;
use pulsemon_common::compress::gzip;
use pulsemon_common::crypto::{self, CryptoError};
use pulsemon_common::proto::MetricProto;
use pulsemon_common::types::{to_proto_batch, Metric};
use rsa::RsaPublicKey;

/// A sealed HTTP body plus the headers that describe it.
#[derive(Debug)]
pub struct SealedBody {
    pub body: Vec<u8>,
    pub hash: Option<String>,
    pub encrypted: bool,
}

/// A gRPC batch: either plain metrics or RSA-sealed protobuf bytes.
#[derive(Debug)]
pub struct SealedBatch {
    pub metrics: Vec<MetricProto>,
    pub encrypted: Vec<u8>,
    pub hash: Option<String>,
}

/// Signing and sealing settings shared by every worker.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    key: String,
    public_key: Option<RsaPublicKey>,
}

impl Envelope {
    pub fn new(key: impl Into<String>, public_key: Option<RsaPublicKey>) -> Self {
        Self {
            key: key.into(),
            public_key,
        }
    }

    pub fn sign(&self, payload: &[u8]) -> Option<String> {
        crypto::sign(payload, &self.key)
    }

    /// Checks a response signature. Without a key nothing is checked; with a
    /// key an unsigned response is rejected.
    pub fn verify(&self, payload: &[u8], hash: Option<&str>) -> Result<(), SendError> {
        if self.key.is_empty() {
            return Ok(());
        }
        let hash = hash.ok_or(SendError::UnsignedResponse)?;
        crypto::verify(payload, hash, &self.key)?;
        Ok(())
    }

    /// JSON array, gzipped, then RSA-sealed when a public key is set.
    pub fn seal_json(&self, metrics: &[Metric]) -> Result<SealedBody, SendError> {
        let plain = serde_json::to_vec(metrics)?;
        let hash = self.sign(&plain);
        let mut body = gzip(&plain)?;
        if let Some(public_key) = &self.public_key {
            body = crypto::encrypt(&body, public_key)?;
        }
        Ok(SealedBody {
            body,
            hash,
            encrypted: self.public_key.is_some(),
        })
    }

    /// Protobuf batch for gRPC. Compression is left to tonic.
    pub fn seal_proto(&self, metrics: &[Metric]) -> Result<SealedBatch, CryptoError> {
        let batch = to_proto_batch(metrics);
        let encoded = batch.encode_to_vec();
        let hash = self.sign(&encoded);
        match &self.public_key {
            Some(public_key) => Ok(SealedBatch {
                metrics: Vec::new(),
                encrypted: crypto::encrypt(&encoded, public_key)?,
                hash,
            }),
            None => Ok(SealedBatch {
                metrics: batch.metrics,
                encrypted: Vec::new(),
                hash,
            }),
        }
    }
}
