//! Load Balancing Selector logic

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::domain::backend::{BackendLoad, SharedBackend};
use crate::error::AlgorithmParseError;

/// The backend selection strategies. Chosen once, at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Uniform random choice.
    Random,
    /// Registration order, cyclically.
    #[default]
    RoundRobin,
    /// Lowest connections per unit of weight.
    WeightedRoundRobin,
    /// Lowest cumulative bandwidth.
    BandwidthAware,
    /// Fewest connections, then lowest last response time.
    RequestDemand,
}

impl Algorithm {
    /// Every algorithm, in declaration order.
    pub const ALL: [Algorithm; 5] = [
        Algorithm::Random,
        Algorithm::RoundRobin,
        Algorithm::WeightedRoundRobin,
        Algorithm::BandwidthAware,
        Algorithm::RequestDemand,
    ];

    /// The configuration name of the algorithm.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Random => "random",
            Algorithm::RoundRobin => "round_robin",
            Algorithm::WeightedRoundRobin => "weighted_round_robin",
            Algorithm::BandwidthAware => "bandwidth_aware",
            Algorithm::RequestDemand => "request_demand",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = AlgorithmParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|algorithm| algorithm.as_str() == s)
            .ok_or_else(|| AlgorithmParseError(s.to_string()))
    }
}

/// Picks the next backend according to a fixed [`Algorithm`].
#[derive(Debug)]
pub struct Selector {
    algorithm: Algorithm,
    /// Next round-robin position. Always below the backend count it was last used with.
    rotation: AtomicUsize,
}

impl Selector {
    /// Create a selector for `algorithm`.
    pub const fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            rotation: AtomicUsize::new(0),
        }
    }

    /// The configured algorithm.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The round-robin position the next call will start from.
    pub fn rotation_index(&self) -> usize {
        self.rotation.load(Ordering::Relaxed)
    }

    /// Choose a backend, or `None` if there are none.
    ///
    /// Ties in the load-based strategies go to the earliest registered backend.
    pub fn select(&self, backends: &[SharedBackend]) -> Option<SharedBackend> {
        if backends.is_empty() {
            return None;
        }

        match self.algorithm {
            Algorithm::Random => backends.choose(&mut rand::thread_rng()).cloned(),
            Algorithm::RoundRobin => Some(backends[self.advance(backends.len())].clone()),
            Algorithm::WeightedRoundRobin => least_loaded(backends, |b, load| {
                load.connections as f64 / f64::from(b.weight.max(1))
            }),
            Algorithm::BandwidthAware => least_loaded(backends, |_, load| load.bandwidth_usage),
            Algorithm::RequestDemand => {
                let loads: Vec<_> = backends.iter().map(|b| (b, b.load())).collect();
                loads
                    .into_iter()
                    .min_by(|(_, a), (_, b)| {
                        a.connections
                            .cmp(&b.connections)
                            .then_with(|| a.response_time.total_cmp(&b.response_time))
                    })
                    .map(|(backend, _)| backend.clone())
            }
        }
    }

    /// Take the current rotation slot and move the index one step forward.
    ///
    /// An index left past the end by a removal is clamped to the last backend.
    fn advance(&self, len: usize) -> usize {
        let clamp = |index: usize| index.min(len - 1);
        let previous = self
            .rotation
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |index| {
                Some((clamp(index) + 1) % len)
            })
            .unwrap_or_else(|index| index);
        clamp(previous)
    }
}

/// The backend with the smallest `score`, earliest registration winning ties.
fn least_loaded<F>(backends: &[SharedBackend], score: F) -> Option<SharedBackend>
where
    F: Fn(&SharedBackend, &BackendLoad) -> f64,
{
    backends
        .iter()
        .map(|backend| (backend, score(backend, &backend.load())))
        .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(CmpOrdering::Equal))
        .map(|(backend, _)| backend.clone())
}
