use anyhow::{Context, Result};
use clap::Parser;
use pulsemon_agent::envelope::Envelope;
use pulsemon_agent::{netaddr, transport, AgentArgs, AgentConfig, Pipeline, PipelineSettings};
use pulsemon_collector::RuntimeSampler;
use pulsemon_common::crypto;
use pulsemon_common::retry::RetryPolicy;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Resolves on ctrl-c, or on SIGTERM where available.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pulsemon=info".parse()?))
        .init();

    let config = AgentConfig::resolve(AgentArgs::parse())?;
    let public_key = crypto::load_optional_public_key(config.crypto_key.as_deref())
        .context("loading server public key")?;
    let real_ip = netaddr::host_ipv4();
    tracing::info!(
        transport = ?config.transport,
        report_interval = ?config.report_interval,
        poll_interval = ?config.poll_interval,
        workers = config.rate_limit,
        signed = !config.key.is_empty(),
        encrypted = public_key.is_some(),
        real_ip = %real_ip,
        "pulsemon-agent starting"
    );

    let envelope = Arc::new(Envelope::new(config.key.clone(), public_key));
    let transport = transport::from_config(&config, envelope, real_ip)
        .context("building transport")?;
    let pipeline = Pipeline::new(
        PipelineSettings {
            poll_interval: config.poll_interval,
            report_interval: config.report_interval,
            workers: config.rate_limit,
            context_timeout: config.context_timeout,
            retry: RetryPolicy::default(),
        },
        transport,
    );

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutting down gracefully");
        let _ = stop.send(true);
    });

    pipeline
        .run(RuntimeSampler::with_default_collectors(), shutdown)
        .await;
    Ok(())
}
