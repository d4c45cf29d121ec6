//! The backend registry the policy engine selects from.

use arc_swap::ArcSwap;
use std::sync::Arc;

use crate::domain::backend::{Backend, BackendId, SharedBackend};
use crate::error::PolicyError;

/// A lock-free registry of backends, in registration order.
///
/// Uses `ArcSwap` so the per-packet selection path reads a snapshot without taking
/// a lock, while administrative add/remove publish a new list atomically.
#[derive(Debug)]
pub struct BackendRegistry {
    backends: ArcSwap<Vec<SharedBackend>>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            backends: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Append a backend. Fails if its id is already registered.
    pub fn insert(&self, backend: Backend) -> Result<SharedBackend, PolicyError> {
        let backend = Arc::new(backend);
        let mut duplicate = false;

        self.backends.rcu(|current| {
            duplicate = current.iter().any(|b| b.id == backend.id);
            if duplicate {
                return Arc::clone(current);
            }
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&backend));
            Arc::new(next)
        });

        if duplicate {
            return Err(PolicyError::DuplicateBackend(backend.id.clone()));
        }
        Ok(backend)
    }

    /// Remove a backend and return it.
    pub fn remove(&self, id: &BackendId) -> Result<SharedBackend, PolicyError> {
        let mut removed = None;

        self.backends.rcu(|current| {
            removed = current.iter().find(|b| &b.id == id).cloned();
            if removed.is_none() {
                return Arc::clone(current);
            }
            Arc::new(current.iter().filter(|b| &b.id != id).cloned().collect())
        });

        removed.ok_or_else(|| PolicyError::UnknownBackend(id.clone()))
    }

    /// Look a backend up by id.
    pub fn get(&self, id: &BackendId) -> Option<SharedBackend> {
        self.backends.load().iter().find(|b| &b.id == id).cloned()
    }

    /// Retrieve a snapshot of all current backends.
    pub fn snapshot(&self) -> Arc<Vec<SharedBackend>> {
        self.backends.load_full()
    }

    /// Number of registered backends.
    pub fn len(&self) -> usize {
        self.backends.load().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.backends.load().is_empty()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
