//! Tracing initialisation and the startup configuration summary.

use anyhow::{Context, Result};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::StreamgateConfig;

/// Initialize the tracing subscriber.
///
/// `level` is an `EnvFilter` directive (`info`, `streamgate_core=debug`, ...); an
/// unparsable directive falls back to `info`.
pub fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to create log filter")?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(())
}

/// Log what the controller is about to run with.
pub fn log_config(config: &StreamgateConfig) {
    info!(
        listen = %config.controller.listen,
        video_port = config.controller.video_port,
        "Fabric adapter configuration"
    );
    info!(
        algorithm = %config.policy.algorithm,
        connection_timeout_secs = config.policy.connection_timeout_secs,
        cleanup_interval_secs = config.policy.cleanup_interval_secs,
        "Policy configuration"
    );
    info!(
        forward_idle = config.rules.forward_idle_timeout,
        video_idle = config.rules.video_idle_timeout,
        video_hard = config.rules.video_hard_timeout,
        "Rule timeouts"
    );
    info!(interval_secs = config.stats.interval_secs, "Stats polling");

    info!(count = config.backends.len(), "Backends configured");
    for backend in &config.backends {
        debug!(id = %backend.id, address = %backend.address, weight = backend.weight, "Backend");
    }

    if config.admin.enabled {
        info!(listen = %config.admin.listen, "Admin API enabled");
    }
}
