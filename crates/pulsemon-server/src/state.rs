use crate::config::ServerConfig;
use crate::subnet::TrustedSubnet;
use anyhow::Context;
use pulsemon_common::crypto;
use pulsemon_storage::{MemStorage, SqlStorage, Storage};
use rsa::RsaPrivateKey;
use std::sync::Arc;

/// Shared handles for handlers, middlewares and the gRPC service.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub config: Arc<ServerConfig>,
    pub private_key: Option<Arc<RsaPrivateKey>>,
    pub subnet: TrustedSubnet,
}

impl AppState {
    pub fn new(
        storage: Arc<dyn Storage>,
        config: ServerConfig,
        private_key: Option<RsaPrivateKey>,
    ) -> Self {
        let subnet = TrustedSubnet::parse(config.trusted_subnet.as_deref());
        Self {
            storage,
            config: Arc::new(config),
            private_key: private_key.map(Arc::new),
            subnet,
        }
    }

    /// Loads key material and opens the configured backend.
    pub async fn from_config(config: ServerConfig) -> anyhow::Result<Self> {
        let private_key = crypto::load_optional_private_key(config.crypto_key.as_deref())
            .context("loading private key")?;
        let storage = open_storage(&config).await?;
        Ok(Self::new(storage, config, private_key))
    }

    pub fn key(&self) -> &str {
        &self.config.key
    }
}

/// SQL when a DSN is configured, otherwise the in-memory store (restored
/// from its snapshot when asked to).
pub async fn open_storage(config: &ServerConfig) -> anyhow::Result<Arc<dyn Storage>> {
    if let Some(dsn) = &config.database_dsn {
        let sql = SqlStorage::connect(dsn)
            .await
            .with_context(|| format!("connecting to {}", config.redacted_dsn().unwrap_or_default()))?;
        return Ok(Arc::new(sql));
    }

    let mem = match &config.file_storage_path {
        Some(path) => MemStorage::with_snapshot_file(path, config.store_interval.is_zero()),
        None => MemStorage::new(),
    };
    if config.restore {
        mem.restore().await.context("restoring metric snapshot")?;
    }
    Ok(Arc::new(mem))
}
