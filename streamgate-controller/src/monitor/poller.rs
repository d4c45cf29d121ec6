//! Background poller that asks every switch for its counters.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;

use streamgate_core::{Command, ControlChannel, SwitchRegistry};

/// Spawns a background Tokio task that requests flow and port counters from every
/// known switch once per `every`.
///
/// Replies come back as ordinary control events and are recorded by the director;
/// they do not feed the policy engine.
pub fn spawn_stats_poller(
    switches: Arc<SwitchRegistry>,
    channel: Arc<dyn ControlChannel>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);

        // Prevent immediately ticking when spawned
        interval.tick().await;

        loop {
            interval.tick().await;
            let polled = poll_switches(&switches, channel.as_ref());
            debug!(switches = polled, "Requested switch stats");
        }
    })
}

/// Send one flow-stats and one port-stats request to each switch. Returns how many
/// switches were asked.
pub fn poll_switches(switches: &SwitchRegistry, channel: &dyn ControlChannel) -> usize {
    let ids = switches.ids();
    for &switch in &ids {
        channel.send(switch, Command::RequestFlowStats);
        channel.send(switch, Command::RequestPortStats);
    }
    ids.len()
}
