//! Streamgate Controller
//!
//! The control loop of the video load balancer: accepts switch sessions through the
//! fabric adapter, drives the director, polls switch counters and serves the admin API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use streamgate_admin::AdminState;
use streamgate_core::{Algorithm, ControlChannel, Director, PolicyEngine};

mod config;
mod fabric;
mod logging;
mod monitor {
    pub mod cleanup;
    pub mod poller;
}

use config::StreamgateConfig;
use fabric::FabricChannel;

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "streamgate", version, about = "SDN video load-balancing controller")]
struct Cli {
    /// Path to a TOML configuration file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the backend selection algorithm.
    #[arg(short, long)]
    algorithm: Option<Algorithm>,

    /// Log filter directive.
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Loads configuration, wires the control plane together and runs until ctrl-c.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(&cli.log_level)?;

    let mut config = match &cli.config {
        Some(path) => StreamgateConfig::load(path)?,
        None => StreamgateConfig::default(),
    };
    if let Some(algorithm) = cli.algorithm {
        config.policy.algorithm = algorithm;
    }
    config.validate()?;
    logging::log_config(&config);

    let policy = Arc::new(
        PolicyEngine::new(config.policy.algorithm, config.backends.clone())
            .context("failed to build backend registry")?,
    );
    let fabric = Arc::new(FabricChannel::new());
    let director = Arc::new(Director::new(config.director(), policy.clone(), fabric.clone()));

    let channel: Arc<dyn ControlChannel> = fabric.clone();
    let _poller = monitor::poller::spawn_stats_poller(
        director.switches().clone(),
        channel,
        config.stats_interval(),
    );
    let _cleanup = monitor::cleanup::spawn_connection_cleanup(
        policy.clone(),
        config.cleanup_interval(),
        config.connection_timeout(),
    );

    if config.admin.enabled {
        let state = AdminState {
            policy: policy.clone(),
            switches: director.switches().clone(),
            counters: director.counters().clone(),
        };
        let addr = config.admin.listen;
        tokio::spawn(async move {
            if let Err(err) = streamgate_admin::serve(addr, state).await {
                error!(%err, "Admin surface stopped");
            }
        });
    }

    let listener = TcpListener::bind(config.controller.listen)
        .await
        .with_context(|| format!("failed to bind fabric listener on {}", config.controller.listen))?;

    tokio::select! {
        result = fabric::serve(listener, director, fabric) => {
            result.context("fabric adapter failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("Shutting down gracefully.");
    Ok(())
}
