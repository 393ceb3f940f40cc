use anyhow::Context;
use clap::Parser;
use pulsemon_common::config::{load_file, parse_duration, DurationValue};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_ADDRESS: &str = "localhost:8080";
const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_RATE_LIMIT: usize = 1;
const DEFAULT_CONTEXT_TIMEOUT: Duration = Duration::from_millis(500);

/// Command line of the agent. Every flag can also come from the environment.
#[derive(Debug, Default, Parser)]
#[command(name = "pulsemon-agent", version, about = "Samples host metrics and ships them to a pulsemon server")]
pub struct AgentArgs {
    /// HTTP address of the server
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// gRPC address of the server; selects the gRPC transport
    #[arg(short = 'g', long = "grpc-address", env = "GRPC_ADDRESS")]
    pub grpc_address: Option<String>,

    /// Report period ("10", "10s", "1m")
    #[arg(short = 'r', long = "report-interval", env = "REPORT_INTERVAL", value_parser = parse_duration)]
    pub report_interval: Option<Duration>,

    /// Poll period
    #[arg(short = 'p', long = "poll-interval", env = "POLL_INTERVAL", value_parser = parse_duration)]
    pub poll_interval: Option<Duration>,

    /// HMAC secret
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    /// Server public key (PEM)
    #[arg(long = "crypto-key", env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// Number of concurrent senders
    #[arg(short = 'l', long = "rate-limit", env = "RATE_LIMIT")]
    pub rate_limit: Option<usize>,

    /// Per-request deadline
    #[arg(long = "context-timeout", env = "CONTEXT_TIMEOUT", value_parser = parse_duration)]
    pub context_timeout: Option<Duration>,

    /// JSON or TOML config file
    #[arg(short = 'c', long = "config", env = "CONFIG")]
    pub config: Option<PathBuf>,
}

/// Keys accepted in the agent config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    address: Option<String>,
    grpc_address: Option<String>,
    report_interval: Option<DurationValue>,
    poll_interval: Option<DurationValue>,
    key: Option<String>,
    crypto_key: Option<PathBuf>,
    rate_limit: Option<usize>,
    context_timeout: Option<DurationValue>,
}

/// Which wire the workers speak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    Http { address: String },
    Grpc { address: String },
}

/// Resolved agent settings, fixed for the life of the process.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub transport: TransportKind,
    pub report_interval: Duration,
    pub poll_interval: Duration,
    /// Empty means requests go unsigned.
    pub key: String,
    pub crypto_key: Option<PathBuf>,
    pub rate_limit: usize,
    pub context_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Http {
                address: DEFAULT_ADDRESS.to_string(),
            },
            report_interval: DEFAULT_REPORT_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            key: String::new(),
            crypto_key: None,
            rate_limit: DEFAULT_RATE_LIMIT,
            context_timeout: DEFAULT_CONTEXT_TIMEOUT,
        }
    }
}

fn file_duration(value: Option<DurationValue>) -> anyhow::Result<Option<Duration>> {
    value.map(|v| v.to_duration()).transpose().map_err(Into::into)
}

impl AgentConfig {
    /// Merges flags/env over the config file over defaults.
    pub fn resolve(args: AgentArgs) -> anyhow::Result<Self> {
        let file: FileConfig = match &args.config {
            Some(path) => load_file(path)
                .with_context(|| format!("loading agent config {}", path.display()))?,
            None => FileConfig::default(),
        };
        let defaults = Self::default();

        let grpc_address = args.grpc_address.or(file.grpc_address);
        let address = args.address.or(file.address);
        let transport = match (grpc_address, address) {
            (Some(grpc), _) if !grpc.trim().is_empty() => TransportKind::Grpc { address: grpc },
            (_, Some(http)) => TransportKind::Http { address: http },
            _ => defaults.transport,
        };

        let rate_limit = args.rate_limit.or(file.rate_limit).unwrap_or(defaults.rate_limit);
        anyhow::ensure!(rate_limit > 0, "rate limit must be at least 1");

        let config = Self {
            transport,
            report_interval: args
                .report_interval
                .or(file_duration(file.report_interval)?)
                .unwrap_or(defaults.report_interval),
            poll_interval: args
                .poll_interval
                .or(file_duration(file.poll_interval)?)
                .unwrap_or(defaults.poll_interval),
            key: args.key.or(file.key).unwrap_or_default(),
            crypto_key: args.crypto_key.or(file.crypto_key),
            rate_limit,
            context_timeout: args
                .context_timeout
                .or(file_duration(file.context_timeout)?)
                .unwrap_or(defaults.context_timeout),
        };
        anyhow::ensure!(
            !config.report_interval.is_zero() && !config.poll_interval.is_zero(),
            "poll and report intervals must be positive"
        );
        Ok(config)
    }
}

/// Prefixes `addr` with `http://` unless it already names a scheme.
pub fn with_scheme(addr: &str) -> String {
    let addr = addr.trim().trim_end_matches('/');
    if addr.contains("://") {
        return addr.to_string();
    }
    format!("http://{addr}")
}
