//! Ethernet II framing and link-layer addresses.

use std::fmt;
use std::str::FromStr;

use bytes::BufMut;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PacketError;

/// EtherType for IPv4 payloads.
pub const ETHERTYPE_IPV4: u16 = 0x0800;
/// EtherType for ARP payloads.
pub const ETHERTYPE_ARP: u16 = 0x0806;
/// Length of an untagged Ethernet II header.
pub const HEADER_LEN: usize = 14;

/// A 48-bit IEEE 802 MAC address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// The all-ones broadcast address.
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    /// The all-zero address used as the unknown target in ARP requests.
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    /// Raw address bytes.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Whether the group bit is set (broadcast or multicast).
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    fn from_slice(bytes: &[u8]) -> Self {
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&bytes[..6]);
        MacAddr(octets)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MacAddr {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| PacketError::InvalidMac(s.to_string()))?;
            *octet =
                u8::from_str_radix(part, 16).map_err(|_| PacketError::InvalidMac(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(PacketError::InvalidMac(s.to_string()));
        }
        Ok(MacAddr(octets))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// The fixed Ethernet II header at the start of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    /// Destination address.
    pub dst: MacAddr,
    /// Source address.
    pub src: MacAddr,
    /// Payload protocol.
    pub ether_type: u16,
}

impl EthernetHeader {
    /// Decode the header and return it together with the remaining payload.
    pub fn parse(frame: &[u8]) -> Result<(Self, &[u8]), PacketError> {
        if frame.len() < HEADER_LEN {
            return Err(PacketError::Truncated {
                layer: "ethernet",
                needed: HEADER_LEN,
                actual: frame.len(),
            });
        }

        let header = Self {
            dst: MacAddr::from_slice(&frame[0..6]),
            src: MacAddr::from_slice(&frame[6..12]),
            ether_type: u16::from_be_bytes([frame[12], frame[13]]),
        };
        Ok((header, &frame[HEADER_LEN..]))
    }

    /// Append the encoded header to `buf`.
    pub fn write<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(&self.dst.0);
        buf.put_slice(&self.src.0);
        buf.put_u16(self.ether_type);
    }
}
