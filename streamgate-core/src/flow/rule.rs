//! Flow rules: match criteria, actions and the priority ladder.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::domain::switch::PortNo;
use crate::packet::ethernet::{MacAddr, ETHERTYPE_ARP, ETHERTYPE_IPV4};
use crate::packet::ipv4::IPPROTO_ICMP;

/// Rule priorities, highest first. More specific rules always outrank catch-alls.
pub mod priority {
    /// ARP is flooded so hosts can always resolve each other.
    pub const ARP_FLOOD: u16 = 400;
    /// ICMP is flooded so diagnostics work before any learning happened.
    pub const ICMP_FLOOD: u16 = 300;
    /// ARP copy to the controller.
    pub const ARP_CONTROLLER: u16 = 200;
    /// Per-connection video redirection.
    pub const VIDEO_REDIRECT: u16 = 100;
    /// Learned unicast forwarding.
    pub const LEARNED_FORWARD: u16 = 10;
    /// Table miss: everything else goes to the controller.
    pub const CATCH_ALL: u16 = 0;
}

/// Match criteria. Every `None` field is a wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowMatch {
    /// Ingress port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_port: Option<PortNo>,
    /// EtherType.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eth_type: Option<u16>,
    /// Source MAC.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eth_src: Option<MacAddr>,
    /// Destination MAC.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eth_dst: Option<MacAddr>,
    /// Source IPv4 address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4_src: Option<Ipv4Addr>,
    /// Destination IPv4 address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4_dst: Option<Ipv4Addr>,
    /// IP protocol number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_proto: Option<u8>,
    /// Transport source port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp_src: Option<u16>,
    /// Transport destination port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp_dst: Option<u16>,
}

impl FlowMatch {
    /// A match that accepts every packet.
    pub fn any() -> Self {
        Self::default()
    }

    /// Restrict to an ingress port.
    pub fn in_port(mut self, port: PortNo) -> Self {
        self.in_port = Some(port);
        self
    }

    /// Restrict to an EtherType.
    pub fn eth_type(mut self, eth_type: u16) -> Self {
        self.eth_type = Some(eth_type);
        self
    }

    /// Restrict to a source/destination MAC pair.
    pub fn eth_pair(mut self, src: MacAddr, dst: MacAddr) -> Self {
        self.eth_src = Some(src);
        self.eth_dst = Some(dst);
        self
    }

    /// Restrict to an IPv4 source/destination pair. Implies the IPv4 EtherType.
    pub fn ipv4_pair(mut self, src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        self.eth_type = Some(ETHERTYPE_IPV4);
        self.ipv4_src = Some(src);
        self.ipv4_dst = Some(dst);
        self
    }

    /// Restrict to an IP protocol. Implies the IPv4 EtherType.
    pub fn ip_proto(mut self, proto: u8) -> Self {
        self.eth_type = Some(ETHERTYPE_IPV4);
        self.ip_proto = Some(proto);
        self
    }

    /// Restrict to a transport source/destination port pair.
    pub fn tp_pair(mut self, src: u16, dst: u16) -> Self {
        self.tp_src = Some(src);
        self.tp_dst = Some(dst);
        self
    }

    /// Whether every field is wildcarded.
    pub fn is_catch_all(&self) -> bool {
        *self == Self::default()
    }
}

/// What a switch does with a matching packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Send out one port.
    Output(PortNo),
    /// Send out every port except the ingress port.
    Flood,
    /// Punt to the controller as a packet-in.
    Controller,
    /// Rewrite the IPv4 destination address.
    SetIpv4Dst(Ipv4Addr),
    /// Rewrite the Ethernet destination address.
    SetEthDst(MacAddr),
}

/// A forwarding rule to install on a switch.
///
/// Installing an identical rule twice overwrites the first copy, so duplicate
/// installs are harmless.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowRule {
    /// Priority; higher wins.
    pub priority: u16,
    /// Match criteria.
    #[serde(rename = "match")]
    pub pattern: FlowMatch,
    /// Actions applied in order.
    pub actions: Vec<Action>,
    /// Seconds of inactivity before the rule expires; 0 disables.
    pub idle_timeout: u16,
    /// Seconds after installation before the rule expires; 0 disables.
    pub hard_timeout: u16,
}

impl FlowRule {
    /// Create a permanent rule.
    pub fn new(priority: u16, pattern: FlowMatch, actions: Vec<Action>) -> Self {
        Self {
            priority,
            pattern,
            actions,
            idle_timeout: 0,
            hard_timeout: 0,
        }
    }

    /// Set the idle and hard timeouts.
    pub fn with_timeouts(mut self, idle_timeout: u16, hard_timeout: u16) -> Self {
        self.idle_timeout = idle_timeout;
        self.hard_timeout = hard_timeout;
        self
    }
}

/// The rules installed on every switch as it connects, highest priority first.
pub fn baseline_rules() -> Vec<FlowRule> {
    vec![
        FlowRule::new(
            priority::ARP_FLOOD,
            FlowMatch::any().eth_type(ETHERTYPE_ARP),
            vec![Action::Flood],
        ),
        FlowRule::new(
            priority::ICMP_FLOOD,
            FlowMatch::any().ip_proto(IPPROTO_ICMP),
            vec![Action::Flood],
        ),
        FlowRule::new(
            priority::ARP_CONTROLLER,
            FlowMatch::any().eth_type(ETHERTYPE_ARP),
            vec![Action::Controller],
        ),
        FlowRule::new(priority::CATCH_ALL, FlowMatch::any(), vec![Action::Controller]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_order_is_strictly_descending() {
        let rules = baseline_rules();
        assert_eq!(rules.len(), 4);
        assert!(rules.windows(2).all(|w| w[0].priority > w[1].priority));
        assert!(rules.last().unwrap().pattern.is_catch_all());
        assert_eq!(rules.last().unwrap().actions, vec![Action::Controller]);
    }

    #[test]
    fn test_specific_rules_outrank_catch_alls() {
        assert!(priority::ARP_FLOOD > priority::ARP_CONTROLLER);
        assert!(priority::ICMP_FLOOD > priority::CATCH_ALL);
        assert!(priority::VIDEO_REDIRECT > priority::LEARNED_FORWARD);
        assert!(priority::LEARNED_FORWARD > priority::CATCH_ALL);
    }

    #[test]
    fn test_serialized_match_omits_wildcards() {
        let rule = FlowRule::new(
            priority::LEARNED_FORWARD,
            FlowMatch::any().in_port(3),
            vec![Action::Output(7)],
        );
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["match"], serde_json::json!({ "in_port": 3 }));
        assert_eq!(json["actions"], serde_json::json!([{ "output": 7 }]));
    }
}
