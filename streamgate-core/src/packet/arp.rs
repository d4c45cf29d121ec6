//! ARP over Ethernet/IPv4: decoding requests and replies, and synthesizing answers.

use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::PacketError;
use crate::packet::ethernet::{EthernetHeader, MacAddr, ETHERTYPE_ARP, ETHERTYPE_IPV4, HEADER_LEN};

/// Length of an Ethernet/IPv4 ARP payload.
pub const ARP_LEN: usize = 28;

const HTYPE_ETHERNET: u16 = 1;
const OP_REQUEST: u16 = 1;
const OP_REPLY: u16 = 2;

/// The ARP opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpOperation {
    /// Who-has.
    Request,
    /// Is-at.
    Reply,
    /// Any other opcode (RARP, InARP, ...).
    Other(u16),
}

impl ArpOperation {
    fn from_code(code: u16) -> Self {
        match code {
            OP_REQUEST => Self::Request,
            OP_REPLY => Self::Reply,
            other => Self::Other(other),
        }
    }

    fn code(self) -> u16 {
        match self {
            Self::Request => OP_REQUEST,
            Self::Reply => OP_REPLY,
            Self::Other(code) => code,
        }
    }
}

/// A decoded Ethernet/IPv4 ARP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    /// Request or reply.
    pub operation: ArpOperation,
    /// Sender hardware address.
    pub sender_mac: MacAddr,
    /// Sender protocol address.
    pub sender_ip: Ipv4Addr,
    /// Target hardware address (zero in requests).
    pub target_mac: MacAddr,
    /// Target protocol address.
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Decode an ARP payload that follows the Ethernet header.
    pub fn parse(payload: &[u8]) -> Result<Self, PacketError> {
        if payload.len() < ARP_LEN {
            return Err(PacketError::Truncated {
                layer: "arp",
                needed: ARP_LEN,
                actual: payload.len(),
            });
        }

        let htype = u16::from_be_bytes([payload[0], payload[1]]);
        let ptype = u16::from_be_bytes([payload[2], payload[3]]);
        let (hlen, plen) = (payload[4], payload[5]);
        if htype != HTYPE_ETHERNET || ptype != ETHERTYPE_IPV4 || hlen != 6 || plen != 4 {
            return Err(PacketError::UnsupportedArp { htype, ptype, hlen, plen });
        }

        let mac = |at: usize| {
            let mut octets = [0u8; 6];
            octets.copy_from_slice(&payload[at..at + 6]);
            MacAddr(octets)
        };
        let ip = |at: usize| Ipv4Addr::new(payload[at], payload[at + 1], payload[at + 2], payload[at + 3]);

        Ok(Self {
            operation: ArpOperation::from_code(u16::from_be_bytes([payload[6], payload[7]])),
            sender_mac: mac(8),
            sender_ip: ip(14),
            target_mac: mac(18),
            target_ip: ip(24),
        })
    }

    /// Build a who-has request for `target_ip`.
    pub fn request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            operation: ArpOperation::Request,
            sender_mac,
            sender_ip,
            target_mac: MacAddr::ZERO,
            target_ip,
        }
    }

    /// Build the is-at reply that answers this request on behalf of its target,
    /// which is known to live at `target_mac`.
    pub fn answer(&self, target_mac: MacAddr) -> Self {
        Self {
            operation: ArpOperation::Reply,
            sender_mac: target_mac,
            sender_ip: self.target_ip,
            target_mac: self.sender_mac,
            target_ip: self.sender_ip,
        }
    }

    /// Whether the sender is announcing its own address.
    pub fn is_gratuitous(&self) -> bool {
        self.sender_ip == self.target_ip
    }

    /// Encode as a complete Ethernet frame.
    ///
    /// Requests go to broadcast; replies are unicast back to their target.
    pub fn to_frame(&self) -> Bytes {
        let dst = match self.operation {
            ArpOperation::Request => MacAddr::BROADCAST,
            _ => self.target_mac,
        };

        let mut buf = BytesMut::with_capacity(HEADER_LEN + ARP_LEN);
        EthernetHeader { dst, src: self.sender_mac, ether_type: ETHERTYPE_ARP }.write(&mut buf);
        buf.put_u16(HTYPE_ETHERNET);
        buf.put_u16(ETHERTYPE_IPV4);
        buf.put_u8(6);
        buf.put_u8(4);
        buf.put_u16(self.operation.code());
        buf.put_slice(&self.sender_mac.0);
        buf.put_slice(&self.sender_ip.octets());
        buf.put_slice(&self.target_mac.0);
        buf.put_slice(&self.target_ip.octets());
        buf.freeze()
    }
}
