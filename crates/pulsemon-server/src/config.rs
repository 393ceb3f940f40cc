use anyhow::Context;
use clap::{Parser, Subcommand};
use pulsemon_common::config::{load_file, parse_duration, DurationValue};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_ADDRESS: &str = "localhost:8080";
const DEFAULT_STORE_INTERVAL: Duration = Duration::from_secs(300);
const DEFAULT_FILE_STORAGE_PATH: &str = "/tmp/metrics-db.json";

#[derive(Debug, Default, Parser)]
#[command(name = "pulsemon-server", version, about = "Collects metrics reported by pulsemon agents")]
pub struct ServerArgs {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// HTTP listen address
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// gRPC listen address; no gRPC listener when unset
    #[arg(short = 'g', long = "grpc-address", env = "GRPC_ADDRESS")]
    pub grpc_address: Option<String>,

    /// Snapshot period, 0 writes after every update
    #[arg(short = 'i', long = "store-interval", env = "STORE_INTERVAL", value_parser = parse_duration)]
    pub store_interval: Option<Duration>,

    /// Snapshot file; an empty value disables the snapshot
    #[arg(short = 'f', long = "file-storage-path", env = "FILE_STORAGE_PATH")]
    pub file_storage_path: Option<String>,

    /// Load the snapshot on start
    #[arg(short = 'r', long, env = "RESTORE", num_args = 0..=1, default_missing_value = "true")]
    pub restore: Option<bool>,

    /// Database DSN; selects the SQL backend
    #[arg(short = 'd', long = "database-dsn", env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// HMAC secret
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    /// Private key (PEM) for encrypted payloads
    #[arg(long = "crypto-key", env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// Only accept agents from this CIDR
    #[arg(short = 't', long = "trusted-subnet", env = "TRUSTED_SUBNET")]
    pub trusted_subnet: Option<String>,

    /// JSON or TOML config file
    #[arg(short = 'c', long = "config", env = "CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write a fresh RSA key pair (private.pem, public.pem)
    Keygen {
        /// Output directory
        #[arg(long, default_value = ".")]
        out: PathBuf,

        #[arg(long, default_value_t = 4096)]
        bits: usize,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    address: Option<String>,
    grpc_address: Option<String>,
    store_interval: Option<DurationValue>,
    store_file: Option<String>,
    restore: Option<bool>,
    database_dsn: Option<String>,
    key: Option<String>,
    crypto_key: Option<PathBuf>,
    trusted_subnet: Option<String>,
}

/// Resolved server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    pub grpc_address: Option<String>,
    /// Zero means the snapshot is written synchronously after each update.
    pub store_interval: Duration,
    pub file_storage_path: Option<PathBuf>,
    pub restore: bool,
    pub database_dsn: Option<String>,
    /// Empty disables request verification and response signing.
    pub key: String,
    pub crypto_key: Option<PathBuf>,
    pub trusted_subnet: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            grpc_address: None,
            store_interval: DEFAULT_STORE_INTERVAL,
            file_storage_path: Some(PathBuf::from(DEFAULT_FILE_STORAGE_PATH)),
            restore: true,
            database_dsn: None,
            key: String::new(),
            crypto_key: None,
            trusted_subnet: None,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ServerConfig {
    /// Merges flags/env over the config file over defaults.
    pub fn resolve(args: ServerArgs) -> anyhow::Result<Self> {
        let file: FileConfig = match &args.config {
            Some(path) => load_file(path)
                .with_context(|| format!("loading server config {}", path.display()))?,
            None => FileConfig::default(),
        };
        let defaults = Self::default();

        let store_interval = match args.store_interval {
            Some(interval) => interval,
            None => match file.store_interval {
                Some(value) => value.to_duration()?,
                None => defaults.store_interval,
            },
        };
        let file_storage_path = match args.file_storage_path.or(file.store_file) {
            Some(path) => non_empty(Some(path)).map(PathBuf::from),
            None => defaults.file_storage_path,
        };

        Ok(Self {
            address: args.address.or(file.address).unwrap_or(defaults.address),
            grpc_address: non_empty(args.grpc_address.or(file.grpc_address)),
            store_interval,
            file_storage_path,
            restore: args.restore.or(file.restore).unwrap_or(defaults.restore),
            database_dsn: non_empty(args.database_dsn.or(file.database_dsn)),
            key: args.key.or(file.key).unwrap_or_default(),
            crypto_key: args.crypto_key.or(file.crypto_key),
            trusted_subnet: non_empty(args.trusted_subnet.or(file.trusted_subnet)),
        })
    }

    /// DSN with the password masked, for logging.
    pub fn redacted_dsn(&self) -> Option<String> {
        let dsn = self.database_dsn.as_deref()?;
        let Some((scheme, rest)) = dsn.split_once("://") else {
            return Some(dsn.to_string());
        };
        match rest.split_once('@') {
            Some((credentials, host)) => {
                let user = credentials.split(':').next().unwrap_or_default();
                Some(format!("{scheme}://{user}:***@{host}"))
            }
            None => Some(dsn.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_input() {
        let config = ServerConfig::resolve(ServerArgs::default()).unwrap();
        assert_eq!(config.address, "localhost:8080");
        assert_eq!(config.store_interval, Duration::from_secs(300));
        assert_eq!(
            config.file_storage_path,
            Some(PathBuf::from("/tmp/metrics-db.json"))
        );
        assert!(config.restore);
        assert!(config.database_dsn.is_none());
        assert!(config.grpc_address.is_none());
    }

    #[test]
    fn flags_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            "address = \"file:1\"\nstore_interval = \"1s\"\nrestore = false\ntrusted_subnet = \"10.0.0.0/8\"\n",
        )
        .unwrap();
        let args = ServerArgs {
            address: Some("flag:2".into()),
            store_interval: Some(Duration::ZERO),
            config: Some(path),
            ..ServerArgs::default()
        };
        let config = ServerConfig::resolve(args).unwrap();
        assert_eq!(config.address, "flag:2");
        assert_eq!(config.store_interval, Duration::ZERO);
        assert!(!config.restore);
        assert_eq!(config.trusted_subnet.as_deref(), Some("10.0.0.0/8"));
    }

    #[test]
    fn empty_file_path_disables_snapshot() {
        let args = ServerArgs {
            file_storage_path: Some(String::new()),
            ..ServerArgs::default()
        };
        assert!(ServerConfig::resolve(args).unwrap().file_storage_path.is_none());
    }

    #[test]
    fn restore_flag_forms() {
        let args = ServerArgs::try_parse_from(["pulsemon-server", "-r"]).unwrap();
        assert_eq!(args.restore, Some(true));
        let args = ServerArgs::try_parse_from(["pulsemon-server", "-r", "false", "-i", "0"]).unwrap();
        assert_eq!(args.restore, Some(false));
        assert_eq!(args.store_interval, Some(Duration::ZERO));
    }

    #[test]
    fn keygen_subcommand_parses() {
        let args = ServerArgs::try_parse_from(["pulsemon-server", "keygen", "--out", "/tmp/k", "--bits", "2048"])
            .unwrap();
        assert!(matches!(
            args.command,
            Some(Command::Keygen { bits: 2048, .. })
        ));
    }

    #[test]
    fn dsn_password_is_masked() {
        let config = ServerConfig {
            database_dsn: Some("postgres://metrics:hunter2@db:5432/metrics".into()),
            ..ServerConfig::default()
        };
        assert_eq!(
            config.redacted_dsn().as_deref(),
            Some("postgres://metrics:***@db:5432/metrics")
        );
    }
}
