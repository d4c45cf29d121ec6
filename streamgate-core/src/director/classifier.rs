//! The packet-in control loop.
//!
//! Every notification from a switch is classified and answered before the call
//! returns, and every packet-in produces exactly one forwarding decision: a rule
//! plus packet-out, a packet-out alone, or a flood. Failures on the per-packet path
//! degrade to a flood; they are never returned to the caller.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::backend::{BackendId, QualityTier};
use crate::domain::switch::{CounterBook, PortNo, SwitchId, SwitchRegistry};
use crate::flow::channel::ControlChannel;
use crate::flow::command::{Command, ControlEvent, PacketIn};
use crate::flow::rule::baseline_rules;
use crate::learning::store::AddressLearningStore;
use crate::load_balancer::engine::PolicyEngine;
use crate::packet::frame::{parse_frame, NetworkLayer};
use crate::packet::ipv4::IPPROTO_TCP;

/// Default TCP port of the video service.
pub const DEFAULT_VIDEO_PORT: u16 = 8000;

/// Tunables of the director.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectorConfig {
    /// TCP destination port that marks video traffic.
    pub video_port: u16,
    /// Idle timeout of learned forwarding rules, seconds.
    pub forward_idle_timeout: u16,
    /// Idle timeout of video redirection rules, seconds.
    pub video_idle_timeout: u16,
    /// Hard timeout of video redirection rules, seconds.
    pub video_hard_timeout: u16,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            video_port: DEFAULT_VIDEO_PORT,
            forward_idle_timeout: 10,
            video_idle_timeout: 30,
            video_hard_timeout: 120,
        }
    }
}

/// Why a packet was flooded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FloodReason {
    /// The frame had no readable Ethernet header.
    Malformed,
    /// The destination MAC has not been learned.
    UnknownDestination,
    /// An ARP request for an address nobody has claimed yet.
    UnknownArpTarget,
    /// ARP traffic that is always flooded (replies, announcements).
    ArpBroadcast,
    /// Video traffic with no backend to send it to.
    NoBackend,
    /// Video traffic whose chosen backend is not reachable from this switch yet.
    UnresolvedBackend(BackendId),
}

/// The outcome of a packet-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Answered an ARP request on behalf of `target`.
    ArpReply {
        /// The address that was resolved.
        target: Ipv4Addr,
    },
    /// Installed a forwarding rule and sent the packet out `port`.
    Forward {
        /// Egress port.
        port: PortNo,
    },
    /// Installed a redirection rule towards `backend`.
    Redirect {
        /// Chosen backend.
        backend: BackendId,
        /// Egress port towards it.
        port: PortNo,
        /// Quality tier recorded for the session.
        tier: QualityTier,
    },
    /// Flooded without installing anything.
    Flood(FloodReason),
}

/// Classifies packet-ins and steers video connections to backends.
pub struct Director {
    pub(super) config: DirectorConfig,
    pub(super) switches: Arc<SwitchRegistry>,
    pub(super) addresses: Arc<AddressLearningStore>,
    pub(super) counters: Arc<CounterBook>,
    pub(super) policy: Arc<PolicyEngine>,
    pub(super) channel: Arc<dyn ControlChannel>,
}

impl Director {
    /// Create a director with empty switch and address tables.
    pub fn new(
        config: DirectorConfig,
        policy: Arc<PolicyEngine>,
        channel: Arc<dyn ControlChannel>,
    ) -> Self {
        Self {
            config,
            switches: Arc::new(SwitchRegistry::new()),
            addresses: Arc::new(AddressLearningStore::new()),
            counters: Arc::new(CounterBook::new()),
            policy,
            channel,
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &DirectorConfig {
        &self.config
    }

    /// The switches currently attached.
    pub fn switches(&self) -> &Arc<SwitchRegistry> {
        &self.switches
    }

    /// The learned address tables.
    pub fn addresses(&self) -> &Arc<AddressLearningStore> {
        &self.addresses
    }

    /// The latest counters reported by each switch.
    pub fn counters(&self) -> &Arc<CounterBook> {
        &self.counters
    }

    /// The policy engine backends are chosen from.
    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    /// Handle one event from the control channel.
    pub fn handle_event(&self, event: ControlEvent) {
        match event {
            ControlEvent::SwitchConnected { switch } => self.switch_connected(switch),
            ControlEvent::SwitchDisconnected { switch } => self.switch_disconnected(switch),
            ControlEvent::PacketIn(packet) => {
                self.packet_in(&packet);
            }
            ControlEvent::FlowStatsReply { switch, stats } => {
                info!(%switch, flows = stats.len(), "Flow stats");
                for stat in &stats {
                    debug!(
                        %switch,
                        priority = stat.priority,
                        pattern = ?stat.pattern,
                        packets = stat.packet_count,
                        bytes = stat.byte_count,
                        "Flow counter"
                    );
                }
                self.counters.record_flows(switch, stats);
            }
            ControlEvent::PortStatsReply { switch, stats } => {
                info!(%switch, ports = stats.len(), "Port stats");
                for stat in &stats {
                    debug!(
                        %switch,
                        port = stat.port,
                        rx_bytes = stat.rx_bytes,
                        tx_bytes = stat.tx_bytes,
                        "Port counter"
                    );
                }
                self.counters.record_ports(switch, stats);
            }
        }
    }

    /// Install the baseline rules on a freshly connected switch, highest priority
    /// first, then mark it ready.
    pub fn switch_connected(&self, switch: SwitchId) {
        self.switches.connect(switch);
        for rule in baseline_rules() {
            self.channel.send(switch, Command::InstallRule(rule));
        }
        self.switches.mark_ready(switch);
        info!(%switch, "Switch ready");
    }

    /// Forget a switch whose session ended, along with everything learned on it.
    pub fn switch_disconnected(&self, switch: SwitchId) {
        let (macs, hosts) = self.addresses.table_sizes(switch);
        self.switches.remove(switch);
        self.addresses.forget_switch(switch);
        self.counters.forget(switch);
        info!(%switch, macs, hosts, "Switch disconnected");
    }

    /// Classify a packet-in and act on it.
    pub fn packet_in(&self, packet: &PacketIn) -> Decision {
        let switch = packet.switch;
        if self.switches.ensure(switch) {
            warn!(%switch, "Packet-in from a switch that never connected");
        }

        let frame = match parse_frame(&packet.frame) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(%switch, in_port = packet.in_port, %err, "Unreadable frame");
                return self.flood(packet, FloodReason::Malformed);
            }
        };
        let eth = frame.ethernet;
        self.addresses.record(switch, eth.src, packet.in_port);

        let decision = match frame.network {
            NetworkLayer::Arp(arp) => self.resolve(packet, &arp),
            NetworkLayer::Ipv4 { header, ports } => {
                self.addresses.record_network_addr(switch, header.src, eth.src);
                match ports {
                    Some(ports)
                        if header.protocol == IPPROTO_TCP && ports.dst == self.config.video_port =>
                    {
                        self.redirect_video(packet, &header, ports)
                    }
                    _ => self.forward(packet, &eth),
                }
            }
            NetworkLayer::Malformed { ether_type, ref error } => {
                debug!(%switch, ether_type, %error, "Malformed payload, forwarding at layer 2");
                self.forward(packet, &eth)
            }
            NetworkLayer::Other(_) => self.forward(packet, &eth),
        };

        debug!(%switch, in_port = packet.in_port, ?decision, "Packet-in handled");
        decision
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use bytes::Bytes;

    use super::*;
    use crate::domain::backend::BackendSpec;
    use crate::flow::command::{FlowStat, Payload, PortStat};
    use crate::flow::rule::{priority, Action, FlowMatch};
    use crate::load_balancer::selector::Algorithm;
    use crate::packet::arp::ArpPacket;
    use crate::packet::ethernet::{MacAddr, ETHERTYPE_ARP};
    use crate::testing::*;

    const SW: SwitchId = SwitchId(1);
    const CLIENT_PORT: PortNo = 1;
    const BACKEND_PORT: PortNo = 4;

    struct Harness {
        director: Director,
        channel: Arc<RecordingChannel>,
    }

    impl Harness {
        fn new(backends: Vec<BackendSpec>) -> Self {
            let policy = Arc::new(PolicyEngine::new(Algorithm::RoundRobin, backends).unwrap());
            let channel = Arc::new(RecordingChannel::default());
            let director = Director::new(DirectorConfig::default(), policy, channel.clone());
            director.switch_connected(SW);
            channel.take();
            Self { director, channel }
        }

        fn with_backend() -> Self {
            Self::new(vec![backend_spec("server1", BACKEND_IP)])
        }

        fn packet_in(&self, in_port: PortNo, frame: Bytes) -> Decision {
            self.director.packet_in(&PacketIn { switch: SW, in_port, frame, buffer_id: None })
        }

        /// Let the backend announce itself so its MAC and port are known.
        fn learn_backend(&self) {
            let frame = tcp_frame(BACKEND_MAC, CLIENT_MAC, BACKEND_IP, CLIENT_IP, 8000, 40000);
            self.packet_in(BACKEND_PORT, frame);
            self.channel.take();
        }

        fn video_request(&self) -> Decision {
            let frame = tcp_frame(CLIENT_MAC, SERVICE_MAC, CLIENT_IP, SERVICE_IP, 40000, 8000);
            self.packet_in(CLIENT_PORT, frame)
        }
    }

    #[test]
    fn test_connect_installs_baseline_in_priority_order() {
        let policy = Arc::new(PolicyEngine::new(Algorithm::RoundRobin, Vec::new()).unwrap());
        let channel = Arc::new(RecordingChannel::default());
        let director = Director::new(DirectorConfig::default(), policy, channel.clone());

        director.switch_connected(SW);

        let rules = installed_rules(&channel.take());
        let priorities: Vec<_> = rules.iter().map(|r| r.priority).collect();
        assert_eq!(
            priorities,
            vec![priority::ARP_FLOOD, priority::ICMP_FLOOD, priority::ARP_CONTROLLER, priority::CATCH_ALL]
        );
        assert_eq!(rules[0].pattern, FlowMatch::any().eth_type(ETHERTYPE_ARP));
        assert_eq!(rules[0].actions, vec![Action::Flood]);
        assert_eq!(rules[2].actions, vec![Action::Controller]);
        assert!(rules[3].pattern.is_catch_all());
        assert_eq!(director.switches().state(SW), Some(crate::SwitchState::Ready));
    }

    #[test]
    fn test_arp_request_for_known_target_is_answered_on_ingress_port() {
        let h = Harness::with_backend();
        h.learn_backend();

        let request = ArpPacket::request(CLIENT_MAC, CLIENT_IP, BACKEND_IP);
        let decision = h.packet_in(CLIENT_PORT, request.to_frame());
        assert_eq!(decision, Decision::ArpReply { target: BACKEND_IP });

        let sent = h.channel.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(flood_count(&sent), 0);
        assert!(installed_rules(&sent).is_empty());

        let Command::EmitPacket { actions, payload: Payload::Frame(frame), in_port } = &sent[0].1 else {
            panic!("expected a packet-out, got {:?}", sent[0]);
        };
        assert_eq!(actions, &vec![Action::Output(CLIENT_PORT)]);
        assert_eq!(*in_port, None);

        let reply = ArpPacket::parse(&frame[14..]).unwrap();
        assert_eq!(reply, request.answer(BACKEND_MAC));
    }

    #[test]
    fn test_arp_request_for_unknown_target_is_flooded() {
        let h = Harness::with_backend();

        let request = ArpPacket::request(CLIENT_MAC, CLIENT_IP, Ipv4Addr::new(10, 0, 9, 9));
        let frame = request.to_frame();
        let decision = h.packet_in(CLIENT_PORT, frame.clone());
        assert_eq!(decision, Decision::Flood(FloodReason::UnknownArpTarget));

        let sent = h.channel.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(flood_count(&sent), 1);
        assert!(matches!(&sent[0].1, Command::EmitPacket { payload: Payload::Frame(f), .. } if *f == frame));
    }

    #[test]
    fn test_arp_reply_is_learned_and_flooded() {
        let h = Harness::with_backend();
        let reply = ArpPacket::request(CLIENT_MAC, CLIENT_IP, BACKEND_IP).answer(BACKEND_MAC);

        let decision = h.packet_in(BACKEND_PORT, reply.to_frame());
        assert_eq!(decision, Decision::Flood(FloodReason::ArpBroadcast));
        assert_eq!(flood_count(&h.channel.take()), 1);

        let addresses = h.director.addresses();
        assert_eq!(addresses.lookup_link_addr(SW, BACKEND_IP), Some(BACKEND_MAC));
        assert_eq!(addresses.lookup_port(SW, BACKEND_MAC), Some(BACKEND_PORT));
    }

    #[test]
    fn test_gratuitous_arp_is_flooded_not_answered() {
        let h = Harness::with_backend();
        h.learn_backend();
        let announce = ArpPacket::request(BACKEND_MAC, BACKEND_IP, BACKEND_IP);

        let decision = h.packet_in(BACKEND_PORT, announce.to_frame());
        assert_eq!(decision, Decision::Flood(FloodReason::ArpBroadcast));
    }

    #[test]
    fn test_unknown_destination_floods_without_rule() {
        let h = Harness::with_backend();
        let frame = tcp_frame(CLIENT_MAC, SERVICE_MAC, CLIENT_IP, SERVICE_IP, 40000, 22);

        let decision = h.packet_in(CLIENT_PORT, frame);
        assert_eq!(decision, Decision::Flood(FloodReason::UnknownDestination));

        let sent = h.channel.take();
        assert_eq!(flood_count(&sent), 1);
        assert!(installed_rules(&sent).is_empty());
    }

    #[test]
    fn test_known_destination_installs_rule_and_forwards() {
        let h = Harness::with_backend();
        h.learn_backend();
        let frame = tcp_frame(CLIENT_MAC, BACKEND_MAC, CLIENT_IP, BACKEND_IP, 40000, 22);

        let decision = h.packet_in(CLIENT_PORT, frame);
        assert_eq!(decision, Decision::Forward { port: BACKEND_PORT });

        let sent = h.channel.take();
        assert_eq!(sent.len(), 2);
        let rules = installed_rules(&sent);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].priority, priority::LEARNED_FORWARD);
        assert_eq!(
            rules[0].pattern,
            FlowMatch::any().in_port(CLIENT_PORT).eth_pair(CLIENT_MAC, BACKEND_MAC)
        );
        assert_eq!(rules[0].actions, vec![Action::Output(BACKEND_PORT)]);
        assert_eq!(rules[0].idle_timeout, DirectorConfig::default().forward_idle_timeout);
        assert!(matches!(
            &sent[1].1,
            Command::EmitPacket { actions, in_port: Some(CLIENT_PORT), .. } if actions == &vec![Action::Output(BACKEND_PORT)]
        ));
    }

    #[test]
    fn test_buffered_packet_is_released_by_reference() {
        let h = Harness::with_backend();
        let frame = tcp_frame(CLIENT_MAC, SERVICE_MAC, CLIENT_IP, SERVICE_IP, 40000, 22);
        h.director.packet_in(&PacketIn { switch: SW, in_port: CLIENT_PORT, frame, buffer_id: Some(77) });

        let sent = h.channel.take();
        assert!(matches!(&sent[0].1, Command::EmitPacket { payload: Payload::Buffer(77), .. }));
    }

    #[test]
    fn test_video_to_unresolved_backend_floods_once() {
        let h = Harness::with_backend();

        let decision = h.video_request();
        assert_eq!(decision, Decision::Flood(FloodReason::UnresolvedBackend("server1".into())));

        let sent = h.channel.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(flood_count(&sent), 1);
        assert!(installed_rules(&sent).is_empty());
        assert_eq!(h.director.policy().backend(&"server1".into()).unwrap().connections(), 0);
    }

    #[test]
    fn test_video_without_backends_floods() {
        let h = Harness::new(Vec::new());
        assert_eq!(h.video_request(), Decision::Flood(FloodReason::NoBackend));
        let sent = h.channel.take();
        assert_eq!(flood_count(&sent), 1);
        assert!(installed_rules(&sent).is_empty());
    }

    #[test]
    fn test_video_is_redirected_to_backend() {
        let h = Harness::with_backend();
        h.learn_backend();

        let decision = h.video_request();
        assert_eq!(
            decision,
            Decision::Redirect { backend: "server1".into(), port: BACKEND_PORT, tier: QualityTier::High }
        );

        let sent = h.channel.take();
        assert_eq!(sent.len(), 2);
        assert_eq!(flood_count(&sent), 0);

        let rules = installed_rules(&sent);
        let rule = &rules[0];
        let expected_actions = vec![
            Action::SetIpv4Dst(BACKEND_IP),
            Action::SetEthDst(BACKEND_MAC),
            Action::Output(BACKEND_PORT),
        ];
        assert_eq!(rule.priority, priority::VIDEO_REDIRECT);
        assert_eq!(
            rule.pattern,
            FlowMatch::any()
                .ipv4_pair(CLIENT_IP, SERVICE_IP)
                .ip_proto(IPPROTO_TCP)
                .tp_pair(40000, 8000)
        );
        assert_eq!(rule.actions, expected_actions);
        assert!(rule.idle_timeout > 0 && rule.hard_timeout > 0);

        match &sent[1].1 {
            Command::EmitPacket { actions, .. } => assert_eq!(actions, &expected_actions),
            other => panic!("expected packet-out, got {other:?}"),
        }

        let backend = h.director.policy().backend(&"server1".into()).unwrap();
        assert_eq!(backend.connections(), 1);
        assert_eq!(backend.load().statistics.tier_counts.high, 1);
    }

    #[test]
    fn test_non_video_tcp_from_client_is_learned() {
        let h = Harness::with_backend();
        let frame = tcp_frame(CLIENT_MAC, SERVICE_MAC, CLIENT_IP, SERVICE_IP, 40000, 443);
        h.packet_in(CLIENT_PORT, frame);

        let addresses = h.director.addresses();
        assert_eq!(addresses.lookup_port(SW, CLIENT_MAC), Some(CLIENT_PORT));
        assert_eq!(addresses.lookup_link_addr(SW, CLIENT_IP), Some(CLIENT_MAC));
    }

    #[test]
    fn test_runt_frame_is_flooded() {
        let h = Harness::with_backend();
        let decision = h.packet_in(CLIENT_PORT, Bytes::from_static(&[0u8; 8]));
        assert_eq!(decision, Decision::Flood(FloodReason::Malformed));
        assert_eq!(flood_count(&h.channel.take()), 1);
    }

    #[test]
    fn test_packet_in_from_unknown_switch_is_still_handled() {
        let h = Harness::with_backend();
        let frame = tcp_frame(CLIENT_MAC, SERVICE_MAC, CLIENT_IP, SERVICE_IP, 40000, 22);
        let decision = h.director.packet_in(&PacketIn {
            switch: SwitchId(42),
            in_port: 1,
            frame,
            buffer_id: None,
        });

        assert_eq!(decision, Decision::Flood(FloodReason::UnknownDestination));
        assert_eq!(
            h.director.switches().state(SwitchId(42)),
            Some(crate::SwitchState::Uninitialized)
        );
    }

    #[test]
    fn test_stats_replies_are_recorded_and_disconnect_forgets() {
        let h = Harness::with_backend();
        h.learn_backend();
        h.director.handle_event(ControlEvent::FlowStatsReply {
            switch: SW,
            stats: vec![FlowStat {
                priority: 0,
                pattern: FlowMatch::any(),
                packet_count: 12,
                byte_count: 900,
                duration_secs: 5,
            }],
        });
        h.director.handle_event(ControlEvent::PortStatsReply {
            switch: SW,
            stats: vec![PortStat { port: 1, rx_bytes: 10, tx_bytes: 20, rx_packets: 1, tx_packets: 2 }],
        });

        let counters = h.director.counters().get(SW).unwrap();
        assert_eq!(counters.flows[0].packet_count, 12);
        assert_eq!(counters.ports[0].tx_bytes, 20);

        h.director.handle_event(ControlEvent::SwitchDisconnected { switch: SW });
        assert!(h.director.counters().get(SW).is_none());
        assert_eq!(h.director.switches().state(SW), None);
        assert_eq!(h.director.addresses().lookup_port(SW, BACKEND_MAC), None);
    }

    #[test]
    fn test_every_path_emits_exactly_one_decision() {
        let h = Harness::with_backend();
        let frames = vec![
            Bytes::from_static(&[1, 2, 3]),
            ArpPacket::request(CLIENT_MAC, CLIENT_IP, Ipv4Addr::new(10, 9, 9, 9)).to_frame(),
            tcp_frame(CLIENT_MAC, MacAddr::BROADCAST, CLIENT_IP, SERVICE_IP, 1, 8000),
            tcp_frame(CLIENT_MAC, MacAddr::BROADCAST, CLIENT_IP, SERVICE_IP, 1, 80),
        ];
        for frame in frames {
            h.packet_in(CLIENT_PORT, frame);
            let sent = h.channel.take();
            let emits = sent.iter().filter(|(_, c)| matches!(c, Command::EmitPacket { .. })).count();
            assert_eq!(emits, 1);
        }
    }
}
