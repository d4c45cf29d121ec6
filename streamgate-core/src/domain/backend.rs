//! Backend server models.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A unique identifier for a backend server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(pub String);

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BackendId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Video quality tier recommended for, or requested from, a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QualityTier {
    /// Let the player decide.
    #[default]
    #[serde(rename = "auto")]
    Auto,
    /// Lowest tier.
    #[serde(rename = "320p")]
    Low,
    /// Middle tier.
    #[serde(rename = "480p")]
    Medium,
    /// Highest tier.
    #[serde(rename = "720p")]
    High,
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QualityTier::Auto => "auto",
            QualityTier::Low => "320p",
            QualityTier::Medium => "480p",
            QualityTier::High => "720p",
        })
    }
}

/// Requests served per concrete quality tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierCounts {
    /// Requests at 320p.
    #[serde(rename = "320p")]
    pub low: u64,
    /// Requests at 480p.
    #[serde(rename = "480p")]
    pub medium: u64,
    /// Requests at 720p.
    #[serde(rename = "720p")]
    pub high: u64,
}

impl TierCounts {
    /// Count one request at `tier`. `Auto` is not counted.
    pub fn bump(&mut self, tier: QualityTier) {
        match tier {
            QualityTier::Auto => {}
            QualityTier::Low => self.low += 1,
            QualityTier::Medium => self.medium += 1,
            QualityTier::High => self.high += 1,
        }
    }
}

/// Cumulative per-backend statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackendStatistics {
    /// Requests recorded through `update`.
    pub requests_handled: u64,
    /// Sum of all bandwidth deltas.
    pub total_bandwidth: f64,
    /// Exact running mean of the reported response times.
    pub average_response_time: f64,
    /// Requests per quality tier.
    #[serde(rename = "video_qualities")]
    pub tier_counts: TierCounts,
}

/// Live load signals of a backend together with its statistics.
///
/// Both live behind the same lock so an update is never half-applied.
#[derive(Debug, Clone, Default)]
pub struct BackendLoad {
    /// Connections believed to be open.
    pub connections: u64,
    /// Cumulative bandwidth usage.
    pub bandwidth_usage: f64,
    /// When the backend was last handed a request.
    pub last_activity: Option<Instant>,
    /// Most recently reported response time.
    pub response_time: f64,
    /// Most recently assigned quality tier.
    pub quality: QualityTier,
    /// Cumulative statistics.
    pub statistics: BackendStatistics,
}

impl BackendLoad {
    /// Account for one request served by this backend.
    pub fn record(&mut self, bandwidth: f64, response_time: f64, tier: QualityTier, now: Instant) {
        let stats = &mut self.statistics;
        stats.requests_handled += 1;
        stats.total_bandwidth += bandwidth;
        let n = stats.requests_handled as f64;
        stats.average_response_time = (stats.average_response_time * (n - 1.0) + response_time) / n;
        stats.tier_counts.bump(tier);

        self.connections += 1;
        self.bandwidth_usage += bandwidth;
        self.response_time = response_time;
        self.last_activity = Some(now);
        self.quality = tier;
    }

    /// Whether the backend has been idle for longer than `timeout` as of `now`.
    /// A backend that never served anything counts as idle.
    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        match self.last_activity {
            Some(last) => now.saturating_duration_since(last) > timeout,
            None => true,
        }
    }
}

/// Static description of a backend, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSpec {
    /// Unique identifier.
    pub id: BackendId,
    /// Network address the video service listens on.
    pub address: Ipv4Addr,
    /// Relative capacity for weighted selection.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

const fn default_weight() -> u32 {
    1
}

/// Represents a single video backend server
#[derive(Debug)]
pub struct Backend {
    /// The unique ID of the backend
    pub id: BackendId,
    /// The network address of the backend
    pub address: Ipv4Addr,
    /// Relative capacity, at least 1
    pub weight: u32,
    load: Mutex<BackendLoad>,
}

impl Backend {
    /// Create a backend with no load.
    pub fn new(spec: BackendSpec) -> Self {
        Self {
            id: spec.id,
            address: spec.address,
            weight: spec.weight,
            load: Mutex::new(BackendLoad::default()),
        }
    }

    /// A consistent copy of the current load and statistics.
    pub fn load(&self) -> BackendLoad {
        self.load.lock().clone()
    }

    /// Current connection count.
    pub fn connections(&self) -> u64 {
        self.load.lock().connections
    }

    /// Run `f` with exclusive access to the load.
    pub(crate) fn with_load<R>(&self, f: impl FnOnce(&mut BackendLoad) -> R) -> R {
        f(&mut self.load.lock())
    }

    /// A serializable view for reporting.
    pub fn view(&self) -> BackendView {
        let load = self.load();
        BackendView {
            id: self.id.clone(),
            address: self.address,
            weight: self.weight,
            connections: load.connections,
            bandwidth_usage: load.bandwidth_usage,
            response_time: load.response_time,
            quality: load.quality,
            idle_secs: load.last_activity.map(|at| at.elapsed().as_secs_f64()),
        }
    }
}

/// Point-in-time load of a backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendView {
    /// Backend id.
    pub id: BackendId,
    /// Network address.
    pub address: Ipv4Addr,
    /// Weight.
    pub weight: u32,
    /// Connection count.
    pub connections: u64,
    /// Cumulative bandwidth.
    pub bandwidth_usage: f64,
    /// Last response time.
    pub response_time: f64,
    /// Last assigned tier.
    pub quality: QualityTier,
    /// Seconds since the last request, if any.
    pub idle_secs: Option<f64>,
}

/// A thread-safe reference to a Backend.
pub type SharedBackend = Arc<Backend>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_average_is_exact() {
        let mut load = BackendLoad::default();
        let now = Instant::now();
        for rt in [100.0, 200.0, 300.0] {
            load.record(0.0, rt, QualityTier::Auto, now);
        }
        assert_eq!(load.statistics.average_response_time, 200.0);
        assert_eq!(load.statistics.requests_handled, 3);
        assert_eq!(load.connections, 3);
        assert_eq!(load.response_time, 300.0);
    }

    #[test]
    fn test_auto_tier_is_not_counted() {
        let mut load = BackendLoad::default();
        let now = Instant::now();
        load.record(1.5, 10.0, QualityTier::Auto, now);
        load.record(2.5, 10.0, QualityTier::High, now);
        load.record(0.0, 10.0, QualityTier::High, now);

        assert_eq!(load.statistics.tier_counts, TierCounts { low: 0, medium: 0, high: 2 });
        assert_eq!(load.statistics.total_bandwidth, 4.0);
        assert_eq!(load.bandwidth_usage, 4.0);
        assert_eq!(load.quality, QualityTier::High);
    }

    #[test]
    fn test_never_active_is_idle() {
        let load = BackendLoad::default();
        assert!(load.is_idle(Instant::now(), Duration::from_secs(3600)));
    }

    #[test]
    fn test_tier_serde_names() {
        assert_eq!(serde_json::to_string(&QualityTier::Low).unwrap(), "\"320p\"");
        let tier: QualityTier = serde_json::from_str("\"720p\"").unwrap();
        assert_eq!(tier, QualityTier::High);
        assert_eq!(QualityTier::Medium.to_string(), "480p");
    }
}
