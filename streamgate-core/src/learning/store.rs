//! Per-switch address learning: MAC to port, and IPv4 to MAC.
//!
//! Tables grow for as long as a switch stays attached. Nothing is aged out, so a
//! switch that sees many distinct hosts keeps every one of them in memory.

use std::net::Ipv4Addr;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::domain::switch::{PortNo, SwitchId};
use crate::packet::ethernet::MacAddr;

#[derive(Debug, Default)]
struct SwitchTables {
    ports: DashMap<MacAddr, PortNo>,
    hosts: DashMap<Ipv4Addr, MacAddr>,
}

/// Address tables for every switch, built from observed traffic.
///
/// Each switch owns its own sharded maps, so learning on one switch never waits
/// on another.
#[derive(Debug, Default)]
pub struct AddressLearningStore {
    switches: DashMap<SwitchId, Arc<SwitchTables>>,
}

impl AddressLearningStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self, switch: SwitchId) -> Arc<SwitchTables> {
        self.switches.entry(switch).or_default().clone()
    }

    fn existing(&self, switch: SwitchId) -> Option<Arc<SwitchTables>> {
        self.switches.get(&switch).map(|entry| entry.value().clone())
    }

    /// Learn that `mac` is reachable through `port`.
    pub fn record(&self, switch: SwitchId, mac: MacAddr, port: PortNo) {
        let previous = self.tables(switch).ports.insert(mac, port);
        match previous {
            None => debug!(%switch, %mac, port, "Learned host location"),
            Some(old) if old != port => debug!(%switch, %mac, from = old, to = port, "Host moved"),
            Some(_) => {}
        }
    }

    /// The port `mac` was last seen on.
    pub fn lookup_port(&self, switch: SwitchId, mac: MacAddr) -> Option<PortNo> {
        self.existing(switch)?.ports.get(&mac).map(|entry| *entry.value())
    }

    /// Learn that `ip` is owned by `mac`.
    pub fn record_network_addr(&self, switch: SwitchId, ip: Ipv4Addr, mac: MacAddr) {
        if ip.is_unspecified() {
            return;
        }
        self.tables(switch).hosts.insert(ip, mac);
    }

    /// The MAC that last claimed `ip`.
    pub fn lookup_link_addr(&self, switch: SwitchId, ip: Ipv4Addr) -> Option<MacAddr> {
        self.existing(switch)?.hosts.get(&ip).map(|entry| *entry.value())
    }

    /// Drop every table of a switch.
    pub fn forget_switch(&self, switch: SwitchId) {
        self.switches.remove(&switch);
    }

    /// Number of `(MAC, IPv4)` entries learned on a switch.
    pub fn table_sizes(&self, switch: SwitchId) -> (usize, usize) {
        self.existing(switch)
            .map(|tables| (tables.ports.len(), tables.hosts.len()))
            .unwrap_or((0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC_A: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x0a]);

    #[test]
    fn test_lookup_unknown() {
        let store = AddressLearningStore::new();
        assert_eq!(store.lookup_port(SwitchId(1), MAC_A), None);
        assert_eq!(store.lookup_link_addr(SwitchId(1), Ipv4Addr::new(10, 0, 0, 1)), None);
        assert_eq!(store.table_sizes(SwitchId(1)), (0, 0));
    }

    #[test]
    fn test_record_and_overwrite() {
        let store = AddressLearningStore::new();
        store.record(SwitchId(1), MAC_A, 3);
        assert_eq!(store.lookup_port(SwitchId(1), MAC_A), Some(3));

        store.record(SwitchId(1), MAC_A, 5);
        assert_eq!(store.lookup_port(SwitchId(1), MAC_A), Some(5));
    }

    #[test]
    fn test_tables_are_per_switch() {
        let store = AddressLearningStore::new();
        let ip = Ipv4Addr::new(10, 0, 1, 2);
        store.record(SwitchId(1), MAC_A, 3);
        store.record_network_addr(SwitchId(1), ip, MAC_A);

        assert_eq!(store.lookup_port(SwitchId(2), MAC_A), None);
        assert_eq!(store.lookup_link_addr(SwitchId(2), ip), None);
        assert_eq!(store.lookup_link_addr(SwitchId(1), ip), Some(MAC_A));
        assert_eq!(store.table_sizes(SwitchId(1)), (1, 1));

        store.forget_switch(SwitchId(1));
        assert_eq!(store.lookup_port(SwitchId(1), MAC_A), None);
    }

    #[test]
    fn test_unspecified_source_is_not_learned() {
        let store = AddressLearningStore::new();
        store.record_network_addr(SwitchId(1), Ipv4Addr::UNSPECIFIED, MAC_A);
        assert_eq!(store.table_sizes(SwitchId(1)), (0, 0));
    }
}
