//! IPv4 header decoding plus the transport ports that flow rules match on.

use std::net::Ipv4Addr;

use crate::error::PacketError;

/// IP protocol number for ICMP.
pub const IPPROTO_ICMP: u8 = 1;
/// IP protocol number for TCP.
pub const IPPROTO_TCP: u8 = 6;
/// IP protocol number for UDP.
pub const IPPROTO_UDP: u8 = 17;

const MIN_HEADER_LEN: usize = 20;
const FRAGMENT_OFFSET_MASK: u16 = 0x1fff;

/// The IPv4 fields the controller classifies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Source address.
    pub src: Ipv4Addr,
    /// Destination address.
    pub dst: Ipv4Addr,
    /// Transport protocol number.
    pub protocol: u8,
    /// Header length in bytes, options included.
    pub header_len: usize,
    /// Fragment offset in 8-byte units; non-zero for trailing fragments.
    pub fragment_offset: u16,
}

/// Source and destination ports of a TCP or UDP segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportPorts {
    /// Source port.
    pub src: u16,
    /// Destination port.
    pub dst: u16,
}

impl Ipv4Header {
    /// Decode the header and return it with the transport payload.
    pub fn parse(payload: &[u8]) -> Result<(Self, &[u8]), PacketError> {
        if payload.len() < MIN_HEADER_LEN {
            return Err(PacketError::Truncated {
                layer: "ipv4",
                needed: MIN_HEADER_LEN,
                actual: payload.len(),
            });
        }

        let version = payload[0] >> 4;
        let ihl = payload[0] & 0x0f;
        let header_len = usize::from(ihl) * 4;
        if version != 4 || header_len < MIN_HEADER_LEN {
            return Err(PacketError::MalformedIpv4 { version, ihl });
        }
        if payload.len() < header_len {
            return Err(PacketError::Truncated {
                layer: "ipv4",
                needed: header_len,
                actual: payload.len(),
            });
        }

        let header = Self {
            src: Ipv4Addr::new(payload[12], payload[13], payload[14], payload[15]),
            dst: Ipv4Addr::new(payload[16], payload[17], payload[18], payload[19]),
            protocol: payload[9],
            header_len,
            fragment_offset: u16::from_be_bytes([payload[6], payload[7]]) & FRAGMENT_OFFSET_MASK,
        };
        Ok((header, &payload[header_len..]))
    }

    /// Read the TCP/UDP ports from the transport payload.
    ///
    /// Trailing fragments carry no transport header, so they yield `None`, as do
    /// other protocols and segments too short to hold both ports.
    pub fn transport_ports(&self, transport: &[u8]) -> Option<TransportPorts> {
        if self.fragment_offset != 0 || !matches!(self.protocol, IPPROTO_TCP | IPPROTO_UDP) {
            return None;
        }
        if transport.len() < 4 {
            return None;
        }
        Some(TransportPorts {
            src: u16::from_be_bytes([transport[0], transport[1]]),
            dst: u16::from_be_bytes([transport[2], transport[3]]),
        })
    }
}
