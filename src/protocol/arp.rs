//! ARP (Address Resolution Protocol) - RFC 826
//!
//! Offsets are absolute from the start of an Ethernet frame.

use std::net::Ipv4Addr;

use super::ethernet::HEADER_LEN as ETH_HEADER_LEN;
use super::MacAddr;

/// ARP packet size (for Ethernet/IPv4)
pub const ARP_PACKET_SIZE: usize = 28;

pub const HEADER_OFFSET: u32 = ETH_HEADER_LEN as u32;
/// htype=1 (Ethernet), ptype=0x0800, hlen=6, plen=4
pub const IPV4_HEADER: [u8; 6] = [0, 1, 8, 0, 6, 4];
pub const OPCODE_OFFSET: u32 = ETH_HEADER_LEN as u32 + 6;
pub const SOURCE_IP_OFFSET: u32 = ETH_HEADER_LEN as u32 + 14;
pub const TARGET_IP_OFFSET: u32 = ETH_HEADER_LEN as u32 + 24;

/// ARP operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ArpOp {
    Request = 1,
    Reply = 2,
}

/// ARP packet (Ethernet/IPv4)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: u16,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    pub fn request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            operation: ArpOp::Request as u16,
            sender_mac,
            sender_ip,
            target_mac: MacAddr::ZERO,
            target_ip,
        }
    }

    pub fn reply(
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        Self {
            operation: ArpOp::Reply as u16,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        }
    }

    /// Serialize ARP packet to bytes
    pub fn to_bytes(&self) -> [u8; ARP_PACKET_SIZE] {
        let mut buf = [0u8; ARP_PACKET_SIZE];
        buf[0..6].copy_from_slice(&IPV4_HEADER);
        buf[6..8].copy_from_slice(&self.operation.to_be_bytes());
        buf[8..14].copy_from_slice(&self.sender_mac.0);
        buf[14..18].copy_from_slice(&self.sender_ip.octets());
        buf[18..24].copy_from_slice(&self.target_mac.0);
        buf[24..28].copy_from_slice(&self.target_ip.octets());
        buf
    }
}
