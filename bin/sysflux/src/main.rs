//! A lightweight agent that ships host load averages and memory usage to InfluxDB.

#![deny(warnings)]
#![deny(missing_docs)]

use anyhow::Context as _;
use clap::Parser as _;
use sysflux_core::{Agent, AgentConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod cli;
use self::cli::Cli;

mod logging;
use self::logging::initialize_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = initialize_logging() {
        fatal_and_exit(format!("failed to initialize logging: {:?}", e));
    }

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    match run(config).await {
        Ok(()) => info!("sysflux stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

async fn run(config: AgentConfig) -> Result<(), anyhow::Error> {
    info!("sysflux starting...");

    let shutdown = CancellationToken::new();
    spawn_signal_handlers(shutdown.clone()).context("Failed to configure signal handlers.")?;

    Agent::new(config).run(shutdown).await
}

fn fatal_and_exit(message: String) {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

#[cfg(unix)]
fn spawn_signal_handlers(shutdown: CancellationToken) -> Result<(), anyhow::Error> {
    use tokio::{
        select,
        signal::unix::{signal, SignalKind},
    };

    let mut sigint_handler = signal(SignalKind::interrupt()).context("Failed to set up SIGINT handler.")?;
    let mut sigterm_handler = signal(SignalKind::terminate()).context("Failed to set up SIGTERM handler.")?;

    tokio::spawn(async move {
        select! {
            _ = sigint_handler.recv() => {
                info!("Received SIGINT, shutting down...");
            }
            _ = sigterm_handler.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }

        shutdown.cancel();
    });

    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_handlers(shutdown: CancellationToken) -> Result<(), anyhow::Error> {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {:?}", e);
            return;
        }

        info!("Received Ctrl-C, shutting down...");
        shutdown.cancel();
    });

    Ok(())
}
