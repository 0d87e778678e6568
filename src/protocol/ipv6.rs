//! IPv6 header layout - RFC 8200
//!
//! Offsets are absolute from the start of an Ethernet frame.

use std::net::Ipv6Addr;

use super::ethernet::HEADER_LEN as ETH_HEADER_LEN;

pub const HEADER_SIZE: usize = 40;

/// Low traffic-class bits and flow label.
pub const FLOW_LABEL_OFFSET: u32 = ETH_HEADER_LEN as u32 + 1;
pub const FLOW_LABEL_LEN: u32 = 3;
pub const PAYLOAD_LENGTH_OFFSET: u32 = ETH_HEADER_LEN as u32 + 4;
pub const NEXT_HEADER_OFFSET: u32 = ETH_HEADER_LEN as u32 + 6;
pub const SRC_ADDR_OFFSET: u32 = ETH_HEADER_LEN as u32 + 8;
pub const DEST_ADDR_OFFSET: u32 = ETH_HEADER_LEN as u32 + 24;
/// First byte after the fixed header.
pub const PAYLOAD_OFFSET: u32 = ETH_HEADER_LEN as u32 + HEADER_SIZE as u32;

pub const ALL_NODES_ADDRESS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);
/// First byte of every multicast destination.
pub const MULTICAST_PREFIX: u32 = 0xff;

/// Next header values the filter inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NextHeader {
    Tcp = 6,
    Udp = 17,
    Icmpv6 = 58,
}

/// Builder for constructing IPv6 packets
#[derive(Debug, Clone)]
pub struct Ipv6Builder {
    flow_label: u32,
    next_header: u8,
    hop_limit: u8,
    src_addr: Ipv6Addr,
    dst_addr: Ipv6Addr,
    payload: Vec<u8>,
}

impl Ipv6Builder {
    pub fn new() -> Self {
        Self {
            flow_label: 0,
            next_header: 0,
            hop_limit: 255,
            src_addr: Ipv6Addr::UNSPECIFIED,
            dst_addr: Ipv6Addr::UNSPECIFIED,
            payload: Vec::new(),
        }
    }

    pub fn flow_label(mut self, label: u32) -> Self {
        self.flow_label = label & 0x000f_ffff;
        self
    }

    pub fn next_header(mut self, next_header: u8) -> Self {
        self.next_header = next_header;
        self
    }

    pub fn hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = hop_limit;
        self
    }

    pub fn src_addr(mut self, addr: Ipv6Addr) -> Self {
        self.src_addr = addr;
        self
    }

    pub fn dst_addr(mut self, addr: Ipv6Addr) -> Self {
        self.dst_addr = addr;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        let first_word = (6u32 << 28) | self.flow_label;
        buffer.extend_from_slice(&first_word.to_be_bytes());
        buffer.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buffer.push(self.next_header);
        buffer.push(self.hop_limit);
        buffer.extend_from_slice(&self.src_addr.octets());
        buffer.extend_from_slice(&self.dst_addr.octets());
        buffer.extend_from_slice(&self.payload);
        buffer
    }
}

impl Default for Ipv6Builder {
    fn default() -> Self {
        Self::new()
    }
}
