//! relayd - the aether relay daemon
//!
//! Accepts signed events from clients, validates and stores them under a
//! kind-dependent retention model, and fans them out to matching
//! subscribers in real time.

use clap::Parser;
use relayd::config::Config;
use relayd::daemon::Daemon;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("relayd=info".parse().unwrap()))
        .init();

    let config = Config::parse();
    if let Err(e) = config.validate() {
        error!("invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    info!("relayd v{} - aether event relay", env!("CARGO_PKG_VERSION"));

    match Daemon::new(config) {
        Ok(daemon) => {
            let daemon = Arc::new(daemon);
            tokio::spawn(install_signal_handlers(Arc::clone(&daemon)));

            if let Err(e) = daemon.run().await {
                error!("daemon error: {}", e);
                return ExitCode::FAILURE;
            }
        }
        Err(e) => {
            error!("failed to initialize daemon: {}", e);
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}

/// Waits for SIGINT or (on unix) SIGTERM and triggers the daemon's
/// broadcast shutdown signal.
async fn install_signal_handlers(daemon: Arc<Daemon>) {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        info!("received ctrl-c");
    }
    daemon.shutdown();
}
