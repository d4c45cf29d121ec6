//! The policy engine: backend registry, selection and live statistics.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::domain::backend::{
    Backend, BackendId, BackendSpec, BackendStatistics, BackendView, QualityTier, SharedBackend,
};
use crate::domain::routing::BackendRegistry;
use crate::error::PolicyError;
use crate::load_balancer::selector::{Algorithm, Selector};

/// Above this many connections a backend is steered to the lowest tier.
pub const CONGESTED_CONNECTIONS: u64 = 5;
/// Above this much cumulative bandwidth a backend is steered to the lowest tier.
pub const CONGESTED_BANDWIDTH: f64 = 10.0;
/// Below this response time (with few connections) the highest tier is offered.
pub const FAST_RESPONSE_TIME: f64 = 100.0;
/// Below this many connections (with a fast response) the highest tier is offered.
pub const LIGHT_CONNECTIONS: u64 = 3;

/// Read-only statistics per backend, keyed by id.
pub type StatisticsSnapshot = BTreeMap<BackendId, BackendStatistics>;

/// Selects backends and tracks their load.
///
/// All methods take `&self`: the backend list is swapped atomically and each
/// backend's load sits behind its own lock, so the per-packet path and the
/// background tasks can share one engine.
#[derive(Debug)]
pub struct PolicyEngine {
    registry: BackendRegistry,
    selector: Selector,
}

impl PolicyEngine {
    /// Create an engine and register `backends` in order.
    pub fn new<I>(algorithm: Algorithm, backends: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = BackendSpec>,
    {
        let engine = Self {
            registry: BackendRegistry::new(),
            selector: Selector::new(algorithm),
        };
        for spec in backends {
            engine.add_backend(spec)?;
        }
        Ok(engine)
    }

    /// The configured algorithm.
    pub fn algorithm(&self) -> Algorithm {
        self.selector.algorithm()
    }

    /// Register a backend with zeroed statistics.
    pub fn add_backend(&self, spec: BackendSpec) -> Result<SharedBackend, PolicyError> {
        if spec.weight == 0 {
            return Err(PolicyError::InvalidWeight { id: spec.id, weight: 0 });
        }
        let backend = self.registry.insert(Backend::new(spec))?;
        info!(
            backend = %backend.id,
            address = %backend.address,
            weight = backend.weight,
            "Backend registered"
        );
        Ok(backend)
    }

    /// Unregister a backend along with its statistics.
    pub fn remove_backend(&self, id: &BackendId) -> Result<SharedBackend, PolicyError> {
        let backend = self.registry.remove(id)?;
        info!(backend = %id, "Backend removed");
        Ok(backend)
    }

    /// Look a backend up by id.
    pub fn backend(&self, id: &BackendId) -> Option<SharedBackend> {
        self.registry.get(id)
    }

    /// Number of registered backends.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Whether no backend is registered.
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Pick the next backend.
    pub fn select(&self) -> Result<SharedBackend, PolicyError> {
        let backends = self.registry.snapshot();
        self.selector
            .select(&backends)
            .ok_or(PolicyError::NoBackendAvailable)
    }

    /// Record one request served by `id`.
    pub fn update(
        &self,
        id: &BackendId,
        bandwidth: f64,
        response_time: f64,
        tier: QualityTier,
    ) -> Result<(), PolicyError> {
        let backend = self
            .registry
            .get(id)
            .ok_or_else(|| PolicyError::UnknownBackend(id.clone()))?;

        let (connections, bandwidth_usage) = backend.with_load(|load| {
            load.record(bandwidth, response_time, tier, Instant::now());
            (load.connections, load.bandwidth_usage)
        });

        info!(
            backend = %id,
            connections,
            bandwidth = bandwidth_usage,
            response_time,
            "Updated backend stats"
        );
        Ok(())
    }

    /// The quality tier to recommend for new sessions on `id`.
    pub fn optimal_quality(&self, id: &BackendId) -> QualityTier {
        let Some(backend) = self.registry.get(id) else {
            return QualityTier::Auto;
        };
        let load = backend.load();

        if load.connections > CONGESTED_CONNECTIONS || load.bandwidth_usage > CONGESTED_BANDWIDTH {
            QualityTier::Low
        } else if load.response_time < FAST_RESPONSE_TIME && load.connections < LIGHT_CONNECTIONS {
            QualityTier::High
        } else {
            QualityTier::Medium
        }
    }

    /// Release one connection on every backend idle for longer than `timeout`.
    ///
    /// The controller never sees sessions close, so connection counts only grow.
    /// This is a coarse drift correction: one decrement per call, floored at zero,
    /// not an accurate count of open sessions. Returns how many backends changed.
    pub fn cleanup(&self, timeout: Duration) -> usize {
        self.cleanup_at(Instant::now(), timeout)
    }

    /// [`cleanup`](Self::cleanup) evaluated as of `now`.
    pub fn cleanup_at(&self, now: Instant, timeout: Duration) -> usize {
        let mut released = 0;
        for backend in self.registry.snapshot().iter() {
            let changed = backend.with_load(|load| {
                if !load.is_idle(now, timeout) || load.connections == 0 {
                    return false;
                }
                load.connections -= 1;
                true
            });
            if changed {
                released += 1;
                debug!(backend = %backend.id, "Released idle connection");
            }
        }
        released
    }

    /// Statistics of every backend.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        self.registry
            .snapshot()
            .iter()
            .map(|backend| (backend.id.clone(), backend.load().statistics))
            .collect()
    }

    /// Live load of every backend, in registration order.
    pub fn backends(&self) -> Vec<BackendView> {
        self.registry.snapshot().iter().map(|backend| backend.view()).collect()
    }
}
