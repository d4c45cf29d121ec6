//! Switch identity, lifecycle and the latest counters each switch reported.

use std::fmt;
use std::time::SystemTime;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::flow::command::{FlowStat, PortStat};

/// A switch port number.
pub type PortNo = u32;

/// A switch (datapath) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwitchId(pub u64);

impl fmt::Display for SwitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Where a switch is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchState {
    /// Known, baseline rules not yet installed.
    Uninitialized,
    /// Baseline rules installed.
    Ready,
}

/// The set of switches currently attached to the controller.
#[derive(Debug, Default)]
pub struct SwitchRegistry {
    switches: DashMap<SwitchId, SwitchState>,
}

impl SwitchRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a switch as uninitialized, resetting it if it reconnects.
    pub fn connect(&self, switch: SwitchId) {
        self.switches.insert(switch, SwitchState::Uninitialized);
    }

    /// Register a switch only if it is unknown. Returns `true` when it was added.
    pub fn ensure(&self, switch: SwitchId) -> bool {
        let mut added = false;
        self.switches.entry(switch).or_insert_with(|| {
            added = true;
            SwitchState::Uninitialized
        });
        added
    }

    /// Mark a switch as ready once its baseline rules are out.
    pub fn mark_ready(&self, switch: SwitchId) {
        self.switches.insert(switch, SwitchState::Ready);
    }

    /// Current state, or `None` for an unknown switch.
    pub fn state(&self, switch: SwitchId) -> Option<SwitchState> {
        self.switches.get(&switch).map(|entry| *entry.value())
    }

    /// Forget a switch. Returns `true` if it was known.
    pub fn remove(&self, switch: SwitchId) -> bool {
        self.switches.remove(&switch).is_some()
    }

    /// Every known switch, in ascending id order.
    pub fn ids(&self) -> Vec<SwitchId> {
        let mut ids: Vec<SwitchId> = self.switches.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of known switches.
    pub fn len(&self) -> usize {
        self.switches.len()
    }

    /// Whether no switch is attached.
    pub fn is_empty(&self) -> bool {
        self.switches.is_empty()
    }
}

/// The most recent counters a switch reported.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SwitchCounters {
    /// Per-rule counters from the last flow-stats reply.
    pub flows: Vec<FlowStat>,
    /// Per-port counters from the last port-stats reply.
    pub ports: Vec<PortStat>,
    /// When the last reply of either kind arrived.
    pub updated_at: Option<SystemTime>,
}

/// Latest counters per switch, filled from stats replies.
///
/// Only the newest reply is kept. The policy engine does not read these.
#[derive(Debug, Default)]
pub struct CounterBook {
    switches: DashMap<SwitchId, SwitchCounters>,
}

impl CounterBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the flow counters of a switch.
    pub fn record_flows(&self, switch: SwitchId, flows: Vec<FlowStat>) {
        let mut entry = self.switches.entry(switch).or_default();
        entry.flows = flows;
        entry.updated_at = Some(SystemTime::now());
    }

    /// Replace the port counters of a switch.
    pub fn record_ports(&self, switch: SwitchId, ports: Vec<PortStat>) {
        let mut entry = self.switches.entry(switch).or_default();
        entry.ports = ports;
        entry.updated_at = Some(SystemTime::now());
    }

    /// Latest counters of a switch.
    pub fn get(&self, switch: SwitchId) -> Option<SwitchCounters> {
        self.switches.get(&switch).map(|entry| entry.value().clone())
    }

    /// Drop everything recorded for a switch.
    pub fn forget(&self, switch: SwitchId) {
        self.switches.remove(&switch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let registry = SwitchRegistry::new();
        assert_eq!(registry.state(SwitchId(1)), None);

        registry.connect(SwitchId(1));
        assert_eq!(registry.state(SwitchId(1)), Some(SwitchState::Uninitialized));
        registry.mark_ready(SwitchId(1));
        assert_eq!(registry.state(SwitchId(1)), Some(SwitchState::Ready));

        assert!(!registry.ensure(SwitchId(1)), "ensure leaves known switches alone");
        assert_eq!(registry.state(SwitchId(1)), Some(SwitchState::Ready));
        assert!(registry.ensure(SwitchId(2)));

        assert_eq!(registry.ids(), vec![SwitchId(1), SwitchId(2)]);
        assert!(registry.remove(SwitchId(1)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_counter_book_keeps_latest() {
        let book = CounterBook::new();
        let port = |rx| PortStat { port: 1, rx_bytes: rx, tx_bytes: 0, rx_packets: 0, tx_packets: 0 };

        book.record_ports(SwitchId(3), vec![port(10)]);
        book.record_ports(SwitchId(3), vec![port(25)]);

        let counters = book.get(SwitchId(3)).unwrap();
        assert_eq!(counters.ports, vec![port(25)]);
        assert!(counters.flows.is_empty());
        assert!(counters.updated_at.is_some());
    }

    #[test]
    fn test_display_is_dpid() {
        assert_eq!(SwitchId(0x1f).to_string(), "000000000000001f");
    }
}
