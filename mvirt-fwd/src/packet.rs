//! Per-packet header parsing and in-place header mutation.
//!
//! Frames are validated with smoltcp's checked wire views; the fields the
//! pipeline needs are copied into a [`PacketContext`] so the frame can be
//! mutated afterwards.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use smoltcp::wire::{EthernetFrame, EthernetProtocol, Ipv4Packet, Ipv6Packet};

use crate::family::{AddressFamily, MacAddr};

/// Ethernet header: dst_mac[6] + src_mac[6] + ethertype[2]
pub const ETH_HEADER_LEN: usize = 14;

const IPV4_TTL_OFFSET: usize = 8;
const IPV4_CHECKSUM_OFFSET: usize = 10;
const IPV4_SRC_OFFSET: usize = 12;
const IPV6_HOP_LIMIT_OFFSET: usize = 7;
const IPV6_SRC_OFFSET: usize = 8;

/// Parsed IP header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpHeader {
    pub family: AddressFamily,
    pub src: IpAddr,
    pub dst: IpAddr,
    /// IPv4 TTL or IPv6 Hop Limit as received.
    pub hop_limit: u8,
}

/// One Ethernet frame being processed, plus its parsed headers.
pub struct PacketContext<'a> {
    frame: &'a mut [u8],
    pub ingress_port: usize,
    pub ethertype: EthernetProtocol,
    /// Present for IPv4/IPv6 frames.
    pub ip: Option<IpHeader>,
}

impl<'a> PacketContext<'a> {
    /// Parse `frame`. Returns `None` if the frame is too short for an Ethernet
    /// header or carries an IPv4/IPv6 header that fails validation.
    pub fn parse(frame: &'a mut [u8], ingress_port: usize) -> Option<Self> {
        let (ethertype, ip) = {
            let eth = EthernetFrame::new_checked(&frame[..]).ok()?;
            let ethertype = eth.ethertype();
            let ip = match ethertype {
                EthernetProtocol::Ipv4 => Some(parse_ipv4(eth.payload())?),
                EthernetProtocol::Ipv6 => Some(parse_ipv6(eth.payload())?),
                _ => None,
            };
            (ethertype, ip)
        };

        Some(PacketContext {
            frame,
            ingress_port,
            ethertype,
            ip,
        })
    }

    pub fn frame(&self) -> &[u8] {
        self.frame
    }

    /// Decrement the hop count, updating the IPv4 header checksum incrementally.
    pub fn decrement_hop_limit(&mut self) {
        let ip_packet = &mut self.frame[ETH_HEADER_LEN..];
        match self.ip.map(|ip| ip.family) {
            Some(AddressFamily::Ipv4) => decrement_ipv4_ttl(ip_packet),
            Some(AddressFamily::Ipv6) => decrement_ipv6_hop_limit(ip_packet),
            None => return,
        }
        if let Some(ip) = self.ip.as_mut() {
            ip.hop_limit = ip.hop_limit.saturating_sub(1);
        }
    }

    /// Address the frame from `src_mac` to `dst_mac`.
    pub fn rewrite_ethernet(&mut self, dst_mac: MacAddr, src_mac: MacAddr) {
        rewrite_ethernet_header(self.frame, dst_mac, src_mac);
    }
}

fn parse_ipv4(payload: &[u8]) -> Option<IpHeader> {
    let packet = Ipv4Packet::new_checked(payload).ok()?;
    if packet.version() != 4 {
        return None;
    }

    let mut src = [0u8; 4];
    let mut dst = [0u8; 4];
    src.copy_from_slice(&payload[IPV4_SRC_OFFSET..IPV4_SRC_OFFSET + 4]);
    dst.copy_from_slice(&payload[IPV4_SRC_OFFSET + 4..IPV4_SRC_OFFSET + 8]);

    Some(IpHeader {
        family: AddressFamily::Ipv4,
        src: IpAddr::V4(Ipv4Addr::from(src)),
        dst: IpAddr::V4(Ipv4Addr::from(dst)),
        hop_limit: packet.hop_limit(),
    })
}

fn parse_ipv6(payload: &[u8]) -> Option<IpHeader> {
    let packet = Ipv6Packet::new_checked(payload).ok()?;
    if packet.version() != 6 {
        return None;
    }

    let mut src = [0u8; 16];
    let mut dst = [0u8; 16];
    src.copy_from_slice(&payload[IPV6_SRC_OFFSET..IPV6_SRC_OFFSET + 16]);
    dst.copy_from_slice(&payload[IPV6_SRC_OFFSET + 16..IPV6_SRC_OFFSET + 32]);

    Some(IpHeader {
        family: AddressFamily::Ipv6,
        src: IpAddr::V6(Ipv6Addr::from(src)),
        dst: IpAddr::V6(Ipv6Addr::from(dst)),
        hop_limit: packet.hop_limit(),
    })
}

fn rewrite_ethernet_header(frame: &mut [u8], dst_mac: MacAddr, src_mac: MacAddr) {
    if frame.len() < ETH_HEADER_LEN {
        return;
    }
    frame[0..6].copy_from_slice(&dst_mac);
    frame[6..12].copy_from_slice(&src_mac);
}

/// TTL is the high byte of its checksum word, so a decrement by one adds
/// 0x0100 to the one's complement checksum.
fn decrement_ipv4_ttl(ip_packet: &mut [u8]) {
    if ip_packet.len() < 20 {
        return;
    }

    ip_packet[IPV4_TTL_OFFSET] = ip_packet[IPV4_TTL_OFFSET].saturating_sub(1);

    let csum = &mut ip_packet[IPV4_CHECKSUM_OFFSET..IPV4_CHECKSUM_OFFSET + 2];
    let mut sum = u16::from_be_bytes([csum[0], csum[1]]) as u32 + 0x0100;
    // End-around carry
    if sum > 0xFFFF {
        sum = (sum & 0xFFFF) + 1;
    }
    csum.copy_from_slice(&(sum as u16).to_be_bytes());
}

fn decrement_ipv6_hop_limit(ip_packet: &mut [u8]) {
    if ip_packet.len() < 40 {
        return;
    }
    ip_packet[IPV6_HOP_LIMIT_OFFSET] = ip_packet[IPV6_HOP_LIMIT_OFFSET].saturating_sub(1);
}
