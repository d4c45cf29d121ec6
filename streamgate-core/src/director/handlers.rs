//! Forwarding handlers behind each [`Decision`].

use std::net::Ipv4Addr;

use tracing::{debug, info, warn};

use super::classifier::{Decision, Director, FloodReason};
use crate::domain::backend::SharedBackend;
use crate::domain::switch::{PortNo, SwitchId};
use crate::error::RedirectError;
use crate::flow::command::{Command, PacketIn, Payload};
use crate::flow::rule::{priority, Action, FlowMatch, FlowRule};
use crate::packet::arp::{ArpOperation, ArpPacket};
use crate::packet::ethernet::{EthernetHeader, MacAddr};
use crate::packet::ipv4::{Ipv4Header, TransportPorts, IPPROTO_TCP};

/// Where a chosen backend sits on a given switch.
struct BackendRoute {
    backend: SharedBackend,
    mac: MacAddr,
    port: PortNo,
}

impl Director {
    /// ARP is always answered or flooded by the controller, never cached in a rule.
    pub(super) fn resolve(&self, packet: &PacketIn, arp: &ArpPacket) -> Decision {
        let switch = packet.switch;
        self.addresses.record_network_addr(switch, arp.sender_ip, arp.sender_mac);

        if arp.operation != ArpOperation::Request || arp.is_gratuitous() {
            return self.flood(packet, FloodReason::ArpBroadcast);
        }

        let Some(target_mac) = self.addresses.lookup_link_addr(switch, arp.target_ip) else {
            return self.flood(packet, FloodReason::UnknownArpTarget);
        };

        let reply = arp.answer(target_mac);
        debug!(%switch, target = %arp.target_ip, %target_mac, asker = %arp.sender_ip, "Answering ARP");
        self.channel.send(
            switch,
            Command::EmitPacket {
                in_port: None,
                actions: vec![Action::Output(packet.in_port)],
                payload: Payload::Frame(reply.to_frame()),
            },
        );
        Decision::ArpReply { target: arp.target_ip }
    }

    /// Layer-2 forwarding towards a learned port. Unknown destinations are flooded
    /// without a rule so the next packet is looked at again.
    pub(super) fn forward(&self, packet: &PacketIn, eth: &EthernetHeader) -> Decision {
        let switch = packet.switch;
        let Some(port) = self.addresses.lookup_port(switch, eth.dst) else {
            return self.flood(packet, FloodReason::UnknownDestination);
        };

        let actions = vec![Action::Output(port)];
        let rule = FlowRule::new(
            priority::LEARNED_FORWARD,
            FlowMatch::any().in_port(packet.in_port).eth_pair(eth.src, eth.dst),
            actions.clone(),
        )
        .with_timeouts(self.config.forward_idle_timeout, 0);

        self.channel.send(switch, Command::InstallRule(rule));
        self.emit(packet, actions);
        Decision::Forward { port }
    }

    /// Steer a new video connection to the backend the policy engine picks.
    pub(super) fn redirect_video(
        &self,
        packet: &PacketIn,
        ip: &Ipv4Header,
        ports: TransportPorts,
    ) -> Decision {
        let switch = packet.switch;
        let route = match self.route_to_backend(switch) {
            Ok(route) => route,
            Err(err) => {
                warn!(%switch, client = %ip.src, %err, "Cannot redirect video request, flooding");
                let reason = match err {
                    RedirectError::Policy(_) => FloodReason::NoBackend,
                    RedirectError::UnresolvedBackendAddress { backend, .. } => {
                        FloodReason::UnresolvedBackend(backend)
                    }
                };
                return self.flood(packet, reason);
            }
        };

        let BackendRoute { backend, mac, port } = route;
        let actions = vec![
            Action::SetIpv4Dst(backend.address),
            Action::SetEthDst(mac),
            Action::Output(port),
        ];
        let rule = FlowRule::new(
            priority::VIDEO_REDIRECT,
            FlowMatch::any()
                .ipv4_pair(ip.src, ip.dst)
                .ip_proto(IPPROTO_TCP)
                .tp_pair(ports.src, ports.dst),
            actions.clone(),
        )
        .with_timeouts(self.config.video_idle_timeout, self.config.video_hard_timeout);

        self.channel.send(switch, Command::InstallRule(rule));
        self.emit(packet, actions);

        let tier = self.policy.optimal_quality(&backend.id);
        if let Err(err) = self.policy.update(&backend.id, 0.0, 0.0, tier) {
            debug!(backend = %backend.id, %err, "Backend vanished before its stats were updated");
        }

        info!(
            %switch,
            client = %ip.src,
            client_port = ports.src,
            backend = %backend.id,
            port,
            %tier,
            "Redirected video request"
        );
        Decision::Redirect { backend: backend.id.clone(), port, tier }
    }

    fn route_to_backend(&self, switch: SwitchId) -> Result<BackendRoute, RedirectError> {
        let backend = self.policy.select()?;
        let unresolved = |address: Ipv4Addr| RedirectError::UnresolvedBackendAddress {
            backend: backend.id.clone(),
            address,
        };

        let mac = self
            .addresses
            .lookup_link_addr(switch, backend.address)
            .ok_or_else(|| unresolved(backend.address))?;
        let port = self
            .addresses
            .lookup_port(switch, mac)
            .ok_or_else(|| unresolved(backend.address))?;

        Ok(BackendRoute { backend, mac, port })
    }

    pub(super) fn flood(&self, packet: &PacketIn, reason: FloodReason) -> Decision {
        self.emit(packet, vec![Action::Flood]);
        Decision::Flood(reason)
    }

    fn emit(&self, packet: &PacketIn, actions: Vec<Action>) {
        self.channel.send(
            packet.switch,
            Command::EmitPacket {
                in_port: Some(packet.in_port),
                actions,
                payload: packet.payload(),
            },
        );
    }
}

