//! Periodic release of connections on idle backends.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;

use streamgate_core::PolicyEngine;

/// Spawns a task that runs [`PolicyEngine::cleanup`] once per `every`.
///
/// This only corrects connection-count drift; it does not track real sessions.
pub fn spawn_connection_cleanup(
    policy: Arc<PolicyEngine>,
    every: Duration,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.tick().await;

        loop {
            interval.tick().await;
            let released = policy.cleanup(timeout);
            if released > 0 {
                debug!(released, "Released idle backend connections");
            }
        }
    })
}
