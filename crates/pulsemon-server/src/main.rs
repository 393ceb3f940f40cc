use anyhow::{Context, Result};
use clap::Parser;
use pulsemon_common::crypto;
use pulsemon_server::app;
use pulsemon_server::config::{Command, ServerArgs, ServerConfig};
use pulsemon_server::flusher::{spawn_flusher, wait_for_shutdown};
use pulsemon_server::grpc;
use pulsemon_server::state::AppState;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tonic::transport::Server as TonicServer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pulsemon=info".parse()?))
        .init();

    let mut args = ServerArgs::parse();
    match args.command.take() {
        Some(Command::Keygen { out, bits }) => run_keygen(&out, bits),
        None => run_server(ServerConfig::resolve(args)?).await,
    }
}

fn run_keygen(out: &Path, bits: usize) -> Result<()> {
    std::fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    let (private, public) = crypto::generate_key_pair(bits).context("generating RSA key pair")?;
    crypto::write_key_pair(out, &private, &public)?;
    tracing::info!(dir = %out.display(), bits, "Key pair written");
    Ok(())
}

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

async fn run_server(config: ServerConfig) -> Result<()> {
    tracing::info!(
        address = %config.address,
        grpc_address = config.grpc_address.as_deref().unwrap_or("-"),
        store_interval = ?config.store_interval,
        file_storage_path = ?config.file_storage_path,
        restore = config.restore,
        database = config.redacted_dsn().as_deref().unwrap_or("-"),
        signed = !config.key.is_empty(),
        encrypted = config.crypto_key.is_some(),
        trusted_subnet = config.trusted_subnet.as_deref().unwrap_or("-"),
        "pulsemon-server starting"
    );

    let state = AppState::from_config(config.clone()).await?;
    let storage = state.storage.clone();

    let (stop, shutdown) = watch::channel(false);
    let stop = Arc::new(stop);
    let on_signal = stop.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutting down gracefully");
        let _ = on_signal.send(true);
    });

    let flusher = (config.database_dsn.is_none()
        && config.file_storage_path.is_some()
        && !config.store_interval.is_zero())
    .then(|| spawn_flusher(storage.clone(), config.store_interval, shutdown.clone()));

    let grpc_task = match &config.grpc_address {
        Some(addr) => {
            let grpc_addr = tokio::net::lookup_host(addr)
                .await
                .with_context(|| format!("resolving gRPC address {addr}"))?
                .next()
                .with_context(|| format!("no socket address for {addr}"))?;
            let server = TonicServer::builder()
                .add_service(grpc::grpc_service(state.clone()))
                .serve_with_shutdown(grpc_addr, wait_for_shutdown(shutdown.clone()));
            tracing::info!(grpc = %grpc_addr, "gRPC listening");
            Some(tokio::spawn(server))
        }
        None => None,
    };

    let http_listener = tokio::net::TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("binding {}", config.address))?;
    tracing::info!(http = %http_listener.local_addr()?, "HTTP listening");
    let http_result = axum::serve(http_listener, app::build_http_app(state))
        .with_graceful_shutdown(wait_for_shutdown(shutdown.clone()))
        .await;
    if let Err(e) = &http_result {
        tracing::error!(error = %e, "HTTP server error");
    }
    let _ = stop.send(true);

    if let Some(task) = grpc_task {
        match task.await {
            Ok(Err(e)) => tracing::error!(error = %e, "gRPC server error"),
            Err(e) => tracing::error!(error = %e, "gRPC task panicked"),
            Ok(Ok(())) => {}
        }
    }
    if let Some(flusher) = flusher {
        let _ = flusher.await;
    }

    if let Err(e) = storage.snapshot().await {
        tracing::error!(error = %e, "Final snapshot failed");
    }
    storage.close().await?;
    tracing::info!("Server stopped");
    http_result.map_err(Into::into)
}
