//! Whole-frame classification for packet-in payloads.

use crate::error::PacketError;
use crate::packet::arp::ArpPacket;
use crate::packet::ethernet::{EthernetHeader, ETHERTYPE_ARP, ETHERTYPE_IPV4};
use crate::packet::ipv4::{Ipv4Header, TransportPorts};

/// What sits on top of the Ethernet header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkLayer {
    /// An Ethernet/IPv4 ARP packet.
    Arp(ArpPacket),
    /// An IPv4 packet, with ports when it carries TCP or UDP.
    Ipv4 {
        /// The IPv4 header.
        header: Ipv4Header,
        /// Transport ports, if present.
        ports: Option<TransportPorts>,
    },
    /// A protocol the controller does not classify.
    Other(u16),
    /// A recognised EtherType whose payload failed to decode.
    Malformed {
        /// The advertised EtherType.
        ether_type: u16,
        /// Why decoding failed.
        error: PacketError,
    },
}

/// A decoded packet-in frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Link-layer header.
    pub ethernet: EthernetHeader,
    /// Network-layer view of the payload.
    pub network: NetworkLayer,
}

/// Decode a raw frame.
///
/// Only a missing Ethernet header is an error. Anything wrong above it is reported
/// as [`NetworkLayer::Malformed`] so the frame can still be forwarded.
pub fn parse_frame(raw: &[u8]) -> Result<Frame, PacketError> {
    let (ethernet, payload) = EthernetHeader::parse(raw)?;

    let network = match ethernet.ether_type {
        ETHERTYPE_ARP => match ArpPacket::parse(payload) {
            Ok(arp) => NetworkLayer::Arp(arp),
            Err(error) => NetworkLayer::Malformed { ether_type: ETHERTYPE_ARP, error },
        },
        ETHERTYPE_IPV4 => match Ipv4Header::parse(payload) {
            Ok((header, transport)) => NetworkLayer::Ipv4 {
                ports: header.transport_ports(transport),
                header,
            },
            Err(error) => NetworkLayer::Malformed { ether_type: ETHERTYPE_IPV4, error },
        },
        other => NetworkLayer::Other(other),
    };

    Ok(Frame { ethernet, network })
}
