//! Shared fixtures for unit tests.

use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;

use crate::domain::backend::BackendSpec;
use crate::domain::switch::SwitchId;
use crate::flow::channel::ControlChannel;
use crate::flow::command::Command;
use crate::flow::rule::FlowRule;
use crate::packet::ethernet::{EthernetHeader, MacAddr, ETHERTYPE_IPV4};
use crate::packet::ipv4::IPPROTO_TCP;

pub const CLIENT_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
pub const CLIENT_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const SERVICE_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x64]);
pub const SERVICE_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 100);
pub const BACKEND_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0x01, 0x02]);
pub const BACKEND_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 2);

/// Captures every command instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<(SwitchId, Command)>>,
}

impl RecordingChannel {
    /// Drain what was recorded so far.
    pub fn take(&self) -> Vec<(SwitchId, Command)> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl ControlChannel for RecordingChannel {
    fn send(&self, switch: SwitchId, command: Command) {
        self.sent.lock().push((switch, command));
    }
}

pub fn backend_spec(id: &str, address: Ipv4Addr) -> BackendSpec {
    BackendSpec { id: id.into(), address, weight: 1 }
}

/// A minimal Ethernet/IPv4/TCP SYN.
pub fn tcp_frame(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(54);
    EthernetHeader { dst: dst_mac, src: src_mac, ether_type: ETHERTYPE_IPV4 }.write(&mut buf);

    buf.put_u8(0x45);
    buf.put_u8(0);
    buf.put_u16(40);
    buf.put_u16(0);
    buf.put_u16(0x4000);
    buf.put_u8(64);
    buf.put_u8(IPPROTO_TCP);
    buf.put_u16(0);
    buf.put_slice(&src_ip.octets());
    buf.put_slice(&dst_ip.octets());

    buf.put_u16(src_port);
    buf.put_u16(dst_port);
    buf.put_u32(1);
    buf.put_u32(0);
    buf.put_u8(0x50);
    buf.put_u8(0x02);
    buf.put_u16(64240);
    buf.put_u16(0);
    buf.put_u16(0);
    buf.freeze()
}

pub fn installed_rules(sent: &[(SwitchId, Command)]) -> Vec<FlowRule> {
    sent.iter()
        .filter_map(|(_, command)| match command {
            Command::InstallRule(rule) => Some(rule.clone()),
            _ => None,
        })
        .collect()
}

pub fn flood_count(sent: &[(SwitchId, Command)]) -> usize {
    sent.iter().filter(|(_, command)| command.is_flood()).count()
}
