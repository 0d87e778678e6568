//! IPv4 header layout - RFC 791
//!
//! Offsets are absolute from the start of an Ethernet frame, which is how the
//! filter program addresses packet bytes.

use std::net::Ipv4Addr;

use super::ethernet::HEADER_LEN as ETH_HEADER_LEN;

/// IPv4 header size without options
pub const MIN_HEADER_SIZE: usize = 20;

pub const VERSION_IHL_OFFSET: u32 = ETH_HEADER_LEN as u32;
pub const TOTAL_LENGTH_OFFSET: u32 = ETH_HEADER_LEN as u32 + 2;
pub const FRAGMENT_OFFSET_OFFSET: u32 = ETH_HEADER_LEN as u32 + 6;
pub const FRAGMENT_OFFSET_MASK: u32 = 0x1fff;
pub const PROTOCOL_OFFSET: u32 = ETH_HEADER_LEN as u32 + 9;
pub const SRC_ADDR_OFFSET: u32 = ETH_HEADER_LEN as u32 + 12;
pub const DEST_ADDR_OFFSET: u32 = ETH_HEADER_LEN as u32 + 16;

pub const BROADCAST_ADDRESS: u32 = 0xffff_ffff;
/// Top nibble of a class D destination.
pub const MULTICAST_PREFIX: u32 = 0xe0;

/// IP protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    Tcp = 6,
    Udp = 17,
}

/// Subnet broadcast address for `addr/prefix`.
///
/// Prefix lengths of 32 or more yield the address itself.
pub fn broadcast_address(addr: Ipv4Addr, prefix: u8) -> Ipv4Addr {
    let host_bits = u32::MAX.checked_shr(u32::from(prefix)).unwrap_or(0);
    Ipv4Addr::from(u32::from(addr) | host_bits)
}

/// Calculate the Internet checksum over a header
pub fn checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in header.chunks(2) {
        let word = match chunk {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [hi] => u16::from_be_bytes([*hi, 0]),
            _ => 0,
        };
        sum = sum.wrapping_add(u32::from(word));
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Builder for constructing IPv4 packets
#[derive(Debug, Clone)]
pub struct Ipv4Builder {
    fragment_offset: u16,
    ttl: u8,
    protocol: u8,
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
    options: Vec<u8>,
    payload: Vec<u8>,
}

impl Ipv4Builder {
    pub fn new() -> Self {
        Self {
            fragment_offset: 0,
            ttl: 64,
            protocol: 0,
            src_addr: Ipv4Addr::UNSPECIFIED,
            dst_addr: Ipv4Addr::UNSPECIFIED,
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn fragment_offset(mut self, offset: u16) -> Self {
        self.fragment_offset = offset & FRAGMENT_OFFSET_MASK as u16;
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn src_addr(mut self, addr: Ipv4Addr) -> Self {
        self.src_addr = addr;
        self
    }

    pub fn dst_addr(mut self, addr: Ipv4Addr) -> Self {
        self.dst_addr = addr;
        self
    }

    /// Header options, padded to a multiple of 4 bytes.
    pub fn options(mut self, options: &[u8]) -> Self {
        self.options = options.to_vec();
        while self.options.len() % 4 != 0 {
            self.options.push(0);
        }
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let header_len = MIN_HEADER_SIZE + self.options.len();
        let total_length = (header_len + self.payload.len()) as u16;
        let mut buffer = vec![0u8; header_len];

        buffer[0] = 0x40 | (header_len / 4) as u8;
        buffer[2..4].copy_from_slice(&total_length.to_be_bytes());
        buffer[6..8].copy_from_slice(&self.fragment_offset.to_be_bytes());
        buffer[8] = self.ttl;
        buffer[9] = self.protocol;
        buffer[12..16].copy_from_slice(&self.src_addr.octets());
        buffer[16..20].copy_from_slice(&self.dst_addr.octets());
        buffer[MIN_HEADER_SIZE..].copy_from_slice(&self.options);

        let csum = checksum(&buffer);
        buffer[10..12].copy_from_slice(&csum.to_be_bytes());

        buffer.extend_from_slice(&self.payload);
        buffer
    }
}

impl Default for Ipv4Builder {
    fn default() -> Self {
        Self::new()
    }
}
