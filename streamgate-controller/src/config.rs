//! Controller configuration, loaded from TOML.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use streamgate_core::director::classifier::DEFAULT_VIDEO_PORT;
use streamgate_core::{Algorithm, BackendSpec, DirectorConfig};
use thiserror::Error;

/// Default port of the fabric adapter (the OpenFlow controller port).
pub const DEFAULT_FABRIC_PORT: u16 = 6653;
/// Default port of the admin API.
pub const DEFAULT_ADMIN_PORT: u16 = 8080;
/// Default seconds between stats requests.
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 10;
/// Default seconds of inactivity before a backend connection is released.
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 300;
/// Default seconds between connection cleanup passes.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema (including unknown algorithms).
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },

    /// The values parsed but are not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Fabric adapter and classification settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerSection {
    /// Address the fabric adapter listens on.
    pub listen: SocketAddr,
    /// TCP port of the video service.
    pub video_port: u16,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_FABRIC_PORT)),
            video_port: DEFAULT_VIDEO_PORT,
        }
    }
}

/// Flow rule timeouts, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RulesSection {
    /// Idle timeout of learned forwarding rules.
    pub forward_idle_timeout: u16,
    /// Idle timeout of video redirection rules.
    pub video_idle_timeout: u16,
    /// Hard timeout of video redirection rules.
    pub video_hard_timeout: u16,
}

impl Default for RulesSection {
    fn default() -> Self {
        let director = DirectorConfig::default();
        Self {
            forward_idle_timeout: director.forward_idle_timeout,
            video_idle_timeout: director.video_idle_timeout,
            video_hard_timeout: director.video_hard_timeout,
        }
    }
}

/// Backend selection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicySection {
    /// Selection algorithm.
    pub algorithm: Algorithm,
    /// Idle time after which one connection is released per cleanup pass.
    pub connection_timeout_secs: u64,
    /// Seconds between cleanup passes.
    pub cleanup_interval_secs: u64,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
        }
    }
}

/// Stats polling settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StatsSection {
    /// Seconds between stats requests.
    pub interval_secs: u64,
}

impl Default for StatsSection {
    fn default() -> Self {
        Self { interval_secs: DEFAULT_STATS_INTERVAL_SECS }
    }
}

/// Admin API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AdminSection {
    /// Whether to serve the admin API.
    pub enabled: bool,
    /// Address to listen on.
    pub listen: SocketAddr,
}

impl Default for AdminSection {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: SocketAddr::from(([127, 0, 0, 1], DEFAULT_ADMIN_PORT)),
        }
    }
}

/// The full controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamgateConfig {
    /// Fabric adapter and classification.
    pub controller: ControllerSection,
    /// Rule timeouts.
    pub rules: RulesSection,
    /// Backend selection.
    pub policy: PolicySection,
    /// Stats polling.
    pub stats: StatsSection,
    /// Admin API.
    pub admin: AdminSection,
    /// Backend pool, in registration order.
    pub backends: Vec<BackendSpec>,
}

impl Default for StreamgateConfig {
    fn default() -> Self {
        Self {
            controller: ControllerSection::default(),
            rules: RulesSection::default(),
            policy: PolicySection::default(),
            stats: StatsSection::default(),
            admin: AdminSection::default(),
            backends: default_backends(),
        }
    }
}

/// Four single-weight servers at `10.0.{i}.2`.
fn default_backends() -> Vec<BackendSpec> {
    (1..=4u8)
        .map(|i| BackendSpec {
            id: format!("server{i}").as_str().into(),
            address: Ipv4Addr::new(10, 0, i, 2),
            weight: 1,
        })
        .collect()
}

impl StreamgateConfig {
    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without validating.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Check the values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.id.0.trim().is_empty() {
                return Err(ConfigError::Invalid("backend id must not be empty".into()));
            }
            if !seen.insert(&backend.id) {
                return Err(ConfigError::Invalid(format!("duplicate backend id `{}`", backend.id)));
            }
            if backend.weight == 0 {
                return Err(ConfigError::Invalid(format!(
                    "backend `{}` has weight 0, weights must be at least 1",
                    backend.id
                )));
            }
        }
        if self.stats.interval_secs == 0 {
            return Err(ConfigError::Invalid("stats.interval_secs must be positive".into()));
        }
        if self.policy.cleanup_interval_secs == 0 {
            return Err(ConfigError::Invalid("policy.cleanup_interval_secs must be positive".into()));
        }
        if self.controller.video_port == 0 {
            return Err(ConfigError::Invalid("controller.video_port must be positive".into()));
        }
        Ok(())
    }

    /// Settings for the packet-in director.
    pub fn director(&self) -> DirectorConfig {
        DirectorConfig {
            video_port: self.controller.video_port,
            forward_idle_timeout: self.rules.forward_idle_timeout,
            video_idle_timeout: self.rules.video_idle_timeout,
            video_hard_timeout: self.rules.video_hard_timeout,
        }
    }

    /// Interval between stats requests.
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats.interval_secs)
    }

    /// Interval between cleanup passes.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.policy.cleanup_interval_secs)
    }

    /// Idle time after which a connection is released.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.policy.connection_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = StreamgateConfig::default();
        assert_eq!(config.policy.algorithm, Algorithm::RoundRobin);
        assert_eq!(config.controller.video_port, 8000);
        assert_eq!(config.stats.interval_secs, 10);
        assert_eq!(config.backends.len(), 4);
        assert_eq!(config.backends[2].address, Ipv4Addr::new(10, 0, 3, 2));
        assert_eq!(config.controller.listen, "0.0.0.0:6653".parse().unwrap());
        assert_eq!(config.admin.listen, "127.0.0.1:8080".parse().unwrap());
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_full_file() {
        let config = StreamgateConfig::from_toml(
            r#"
            [controller]
            video_port = 8080

            [policy]
            algorithm = "bandwidth_aware"

            [rules]
            video_hard_timeout = 60

            [[backends]]
            id = "edge-a"
            address = "192.168.10.5"
            weight = 3

            [[backends]]
            id = "edge-b"
            address = "192.168.10.6"
            "#,
        )
        .unwrap();

        assert_eq!(config.policy.algorithm, Algorithm::BandwidthAware);
        assert_eq!(config.director().video_port, 8080);
        assert_eq!(config.director().video_hard_timeout, 60);
        assert_eq!(config.director().video_idle_timeout, 30);
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0].weight, 3);
        assert_eq!(config.backends[1].weight, 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        let err = StreamgateConfig::from_toml("[policy]\nalgorithm = \"fastest\"\n").unwrap_err();
        assert!(err.to_string().contains("fastest"));
    }

    #[test]
    fn test_duplicate_backend_is_rejected() {
        let mut config = StreamgateConfig::default();
        config.backends[1].id = config.backends[0].id.clone();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("duplicate")));
    }

    #[test]
    fn test_zero_weight_is_rejected() {
        let mut config = StreamgateConfig::default();
        config.backends[0].weight = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = StreamgateConfig::load(Path::new("/nonexistent/streamgate.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
