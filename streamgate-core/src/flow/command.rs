//! Events delivered by the control channel and the commands sent back over it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::domain::switch::{PortNo, SwitchId};
use crate::flow::rule::{Action, FlowMatch, FlowRule};

/// The packet carried by a packet-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// The full frame bytes.
    Frame(Bytes),
    /// A packet still buffered on the switch.
    Buffer(u32),
}

/// A one-way instruction to a switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Add (or overwrite) a flow rule.
    InstallRule(FlowRule),
    /// Send a packet through an action list.
    EmitPacket {
        /// Port the packet arrived on, or `None` for controller-originated packets.
        in_port: Option<PortNo>,
        /// Actions to apply.
        actions: Vec<Action>,
        /// The packet itself.
        payload: Payload,
    },
    /// Ask for per-rule counters.
    RequestFlowStats,
    /// Ask for per-port counters.
    RequestPortStats,
}

impl Command {
    /// Whether this is a packet-out that floods.
    pub fn is_flood(&self) -> bool {
        matches!(self, Command::EmitPacket { actions, .. } if actions.contains(&Action::Flood))
    }
}

/// A packet the switch could not match against a cached rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketIn {
    /// Reporting switch.
    pub switch: SwitchId,
    /// Port the packet arrived on.
    pub in_port: PortNo,
    /// Raw frame bytes.
    pub frame: Bytes,
    /// Switch-side buffer holding the packet, if any.
    #[serde(default)]
    pub buffer_id: Option<u32>,
}

impl PacketIn {
    /// The payload to reference when re-emitting this packet.
    pub fn payload(&self) -> Payload {
        match self.buffer_id {
            Some(id) => Payload::Buffer(id),
            None => Payload::Frame(self.frame.clone()),
        }
    }
}

/// Counters for a single installed rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStat {
    /// Rule priority.
    pub priority: u16,
    /// Rule match.
    #[serde(rename = "match")]
    pub pattern: FlowMatch,
    /// Packets matched.
    pub packet_count: u64,
    /// Bytes matched.
    pub byte_count: u64,
    /// Seconds the rule has been installed.
    #[serde(default)]
    pub duration_secs: u32,
}

/// Counters for a single switch port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStat {
    /// Port number.
    pub port: PortNo,
    /// Bytes received.
    pub rx_bytes: u64,
    /// Bytes transmitted.
    pub tx_bytes: u64,
    /// Packets received.
    #[serde(default)]
    pub rx_packets: u64,
    /// Packets transmitted.
    #[serde(default)]
    pub tx_packets: u64,
}

/// A notification from the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControlEvent {
    /// A switch completed its handshake.
    SwitchConnected {
        /// The switch.
        switch: SwitchId,
    },
    /// A switch session ended.
    SwitchDisconnected {
        /// The switch.
        switch: SwitchId,
    },
    /// A table miss.
    PacketIn(PacketIn),
    /// Answer to [`Command::RequestFlowStats`].
    FlowStatsReply {
        /// The switch.
        switch: SwitchId,
        /// Per-rule counters.
        stats: Vec<FlowStat>,
    },
    /// Answer to [`Command::RequestPortStats`].
    PortStatsReply {
        /// The switch.
        switch: SwitchId,
        /// Per-port counters.
        stats: Vec<PortStat>,
    },
}

impl ControlEvent {
    /// The switch this event concerns.
    pub fn switch(&self) -> SwitchId {
        match self {
            ControlEvent::SwitchConnected { switch }
            | ControlEvent::SwitchDisconnected { switch }
            | ControlEvent::FlowStatsReply { switch, .. }
            | ControlEvent::PortStatsReply { switch, .. } => *switch,
            ControlEvent::PacketIn(packet) => packet.switch,
        }
    }
}
