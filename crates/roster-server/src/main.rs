//! Roster server - named presence and best-effort binary relay
//!
//! The server:
//! - Accepts long-lived client connections over TCP and TLS
//! - Tracks who is online, where they connect from, and their status line
//! - Answers presence lookups with a liveness probe of the target
//! - Relays length-prefixed binary blobs between named clients

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use roster_server::cli::Cli;
use roster_server::config::ServerConfig;
use roster_server::server::Server;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cli.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        };
        EnvFilter::new(format!("roster_server={},roster_common={}", level, level))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .json()
        .init();

    // Execute
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Fatal error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ServerConfig::load(&cli.config)?;

    tracing::info!("Starting roster server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Plain listener: {}", config.listen_addr);
    if config.tls.is_some() {
        tracing::info!("TLS listener: {}", config.tls_listen_addr);
    }
    tracing::info!("Idle timeout: {:?}", config.idle_timeout());

    let server = Arc::new(Server::new(config.clone()));

    // Plain and TLS listeners run concurrently over the same registry.
    let plain = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = server.listen_and_serve().await {
                tracing::error!("Plain listener error: {:#}", e);
            }
        })
    };

    let tls = config.tls.is_some().then(|| {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = server.listen_and_serve_tls().await {
                tracing::error!("TLS listener error: {:#}", e);
            }
        })
    });

    wait_for_shutdown().await;
    tracing::info!("Shutting down");

    plain.abort();
    if let Some(tls) = tls {
        tls.abort();
    }
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}
