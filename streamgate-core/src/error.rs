//! Error types shared across the core crate.

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::domain::backend::BackendId;

/// Errors raised by the policy engine and its backend registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// Selection was requested while the registry holds no backends.
    #[error("no backend available")]
    NoBackendAvailable,

    /// The referenced backend is not registered.
    #[error("unknown backend: {0}")]
    UnknownBackend(BackendId),

    /// A backend with the same identifier is already registered.
    #[error("duplicate backend: {0}")]
    DuplicateBackend(BackendId),

    /// Backend weights must be strictly positive.
    #[error("backend {id} has invalid weight {weight}, weights must be at least 1")]
    InvalidWeight {
        /// Offending backend.
        id: BackendId,
        /// The rejected weight.
        weight: u32,
    },
}

/// An algorithm selector that does not name one of the supported strategies.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "unknown load balancing algorithm `{0}` (expected random, round_robin, \
     weighted_round_robin, bandwidth_aware or request_demand)"
)]
pub struct AlgorithmParseError(pub String);

/// Errors raised while decoding frames received in packet-in notifications.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PacketError {
    /// The buffer ended before a complete header could be read.
    #[error("{layer} header truncated: need {needed} bytes, got {actual}")]
    Truncated {
        /// Protocol layer being decoded.
        layer: &'static str,
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        actual: usize,
    },

    /// ARP for something other than Ethernet/IPv4.
    #[error("unsupported ARP format: htype={htype} ptype={ptype:#06x} hlen={hlen} plen={plen}")]
    UnsupportedArp {
        /// Hardware type.
        htype: u16,
        /// Protocol type.
        ptype: u16,
        /// Hardware address length.
        hlen: u8,
        /// Protocol address length.
        plen: u8,
    },

    /// IPv4 header with a bad version or header length.
    #[error("malformed IPv4 header: version={version} ihl={ihl}")]
    MalformedIpv4 {
        /// IP version nibble.
        version: u8,
        /// Header length in 32-bit words.
        ihl: u8,
    },

    /// A textual MAC address that could not be parsed.
    #[error("invalid MAC address `{0}`")]
    InvalidMac(String),
}

/// Reasons a video connection could not be steered to a backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RedirectError {
    /// Backend selection failed, typically because the registry is empty.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// The chosen backend has not been seen on this switch yet.
    #[error("backend {backend} ({address}) has no learned link address or port")]
    UnresolvedBackendAddress {
        /// The backend the policy engine picked.
        backend: BackendId,
        /// Its configured network address.
        address: Ipv4Addr,
    },
}
