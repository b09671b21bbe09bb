//! Frame builders and checks

use std::net::{Ipv4Addr, Ipv6Addr};

pub const ETH_HEADER_LEN: usize = 14;
pub const IPV4_TTL: usize = ETH_HEADER_LEN + 8;
pub const IPV6_HOP_LIMIT: usize = ETH_HEADER_LEN + 7;

/// Ethernet + IPv4 + UDP-ish payload with a valid header checksum.
pub fn ipv4_frame(src: Ipv4Addr, dst: Ipv4Addr, ttl: u8) -> Vec<u8> {
    let payload = [0xde, 0xad, 0xbe, 0xef, 0x00, 0x00, 0x00, 0x00];
    let total_len = (20 + payload.len()) as u16;

    let mut frame = Vec::with_capacity(ETH_HEADER_LEN + total_len as usize);
    frame.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x10]); // router port
    frame.extend_from_slice(&[0x52, 0x54, 0x00, 0x12, 0x34, 0x56]); // sender
    frame.extend_from_slice(&[0x08, 0x00]);

    frame.extend_from_slice(&[0x45, 0x00]);
    frame.extend_from_slice(&total_len.to_be_bytes());
    frame.extend_from_slice(&[0x12, 0x34, 0x40, 0x00]); // ID, DF
    frame.extend_from_slice(&[ttl, 17, 0x00, 0x00]);
    frame.extend_from_slice(&src.octets());
    frame.extend_from_slice(&dst.octets());
    frame.extend_from_slice(&payload);

    let checksum = ipv4_header_checksum(&frame[ETH_HEADER_LEN..ETH_HEADER_LEN + 20]);
    frame[ETH_HEADER_LEN + 10..ETH_HEADER_LEN + 12].copy_from_slice(&checksum.to_be_bytes());
    frame
}

pub fn ipv6_frame(src: Ipv6Addr, dst: Ipv6Addr, hop_limit: u8) -> Vec<u8> {
    let payload = [0u8; 8];

    let mut frame = Vec::new();
    frame.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x10]);
    frame.extend_from_slice(&[0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
    frame.extend_from_slice(&[0x86, 0xdd]);

    frame.extend_from_slice(&[0x60, 0x00, 0x00, 0x00]);
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(&[17, hop_limit]);
    frame.extend_from_slice(&src.octets());
    frame.extend_from_slice(&dst.octets());
    frame.extend_from_slice(&payload);
    frame
}

/// One's complement checksum over a header. Zero for a header whose
/// checksum field is valid.
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = header
        .chunks(2)
        .map(|word| u16::from_be_bytes([word[0], word[1]]) as u32)
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

pub fn ipv4_checksum_valid(frame: &[u8]) -> bool {
    ipv4_header_checksum(&frame[ETH_HEADER_LEN..ETH_HEADER_LEN + 20]) == 0
}
