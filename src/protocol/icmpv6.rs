//! ICMPv6 - RFC 4443, NDP - RFC 4861
//!
//! Offsets are absolute from the start of an Ethernet frame carrying an IPv6
//! header without extension headers.

use std::net::Ipv6Addr;

use super::ipv6::PAYLOAD_OFFSET;

pub const TYPE_OFFSET: u32 = PAYLOAD_OFFSET;
pub const CHECKSUM_OFFSET: u32 = PAYLOAD_OFFSET + 2;
pub const CHECKSUM_LEN: u32 = 2;

/// Fixed part of a Router Advertisement
pub const RA_HEADER_LEN: usize = 16;
pub const RA_ROUTER_LIFETIME_OFFSET: u32 = PAYLOAD_OFFSET + 6;
pub const RA_ROUTER_LIFETIME_LEN: u32 = 2;
pub const RA_OPTION_OFFSET: u32 = PAYLOAD_OFFSET + RA_HEADER_LEN as u32;

/// ICMPv6 message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Icmpv6Type {
    EchoRequest = 128,
    RouterSolicitation = 133,
    RouterAdvertisement = 134,
    NeighborAdvertisement = 136,
}

impl Icmpv6Type {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            128 => Some(Icmpv6Type::EchoRequest),
            133 => Some(Icmpv6Type::RouterSolicitation),
            134 => Some(Icmpv6Type::RouterAdvertisement),
            136 => Some(Icmpv6Type::NeighborAdvertisement),
            _ => None,
        }
    }
}

/// RA option types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NdpOptionType {
    PrefixInformation = 3,
    /// RFC 4191
    RouteInformation = 24,
    /// RFC 8106
    Rdnss = 25,
    /// RFC 8106
    Dnssl = 31,
}

impl NdpOptionType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            3 => Some(NdpOptionType::PrefixInformation),
            24 => Some(NdpOptionType::RouteInformation),
            25 => Some(NdpOptionType::Rdnss),
            31 => Some(NdpOptionType::Dnssl),
            _ => None,
        }
    }
}

/// Prefix Information option length
pub const PIO_LEN: usize = 32;
/// Offset of the 4-byte lifetime in RDNSS, RIO and DNSSL options.
pub const OPTION_LIFETIME_OFFSET: usize = 4;
pub const OPTION_LIFETIME_LEN: usize = 4;

/// Builder for Router Advertisement messages (ICMPv6 part only)
#[derive(Debug, Clone, Default)]
pub struct RaBuilder {
    hop_limit: u8,
    flags: u8,
    router_lifetime: u16,
    reachable_time: u32,
    retrans_timer: u32,
    checksum: u16,
    options: Vec<u8>,
}

impl RaBuilder {
    pub fn new() -> Self {
        Self {
            hop_limit: 64,
            ..Default::default()
        }
    }

    pub fn hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = hop_limit;
        self
    }

    pub fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn router_lifetime(mut self, seconds: u16) -> Self {
        self.router_lifetime = seconds;
        self
    }

    pub fn reachable_time(mut self, ms: u32) -> Self {
        self.reachable_time = ms;
        self
    }

    pub fn retrans_timer(mut self, ms: u32) -> Self {
        self.retrans_timer = ms;
        self
    }

    /// Checksum is not computed; the filter ignores it.
    pub fn checksum(mut self, checksum: u16) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn prefix_info(mut self, prefix: Ipv6Addr, prefix_len: u8, valid: u32, preferred: u32) -> Self {
        self.options.extend_from_slice(&[
            NdpOptionType::PrefixInformation as u8,
            (PIO_LEN / 8) as u8,
            prefix_len,
            0xc0,
        ]);
        self.options.extend_from_slice(&valid.to_be_bytes());
        self.options.extend_from_slice(&preferred.to_be_bytes());
        self.options.extend_from_slice(&[0; 4]);
        self.options.extend_from_slice(&prefix.octets());
        self
    }

    pub fn rdnss(mut self, lifetime: u32, servers: &[Ipv6Addr]) -> Self {
        let len = 1 + 2 * servers.len();
        self.options
            .extend_from_slice(&[NdpOptionType::Rdnss as u8, len as u8, 0, 0]);
        self.options.extend_from_slice(&lifetime.to_be_bytes());
        for server in servers {
            self.options.extend_from_slice(&server.octets());
        }
        self
    }

    /// Route Information option, carrying as many prefix bytes as `prefix_len` needs.
    pub fn route_info(mut self, prefix: Ipv6Addr, prefix_len: u8, lifetime: u32) -> Self {
        let prefix_bytes = match prefix_len {
            0 => 0,
            1..=64 => 8,
            _ => 16,
        };
        let len = 1 + prefix_bytes / 8;
        self.options.extend_from_slice(&[
            NdpOptionType::RouteInformation as u8,
            len as u8,
            prefix_len,
            0,
        ]);
        self.options.extend_from_slice(&lifetime.to_be_bytes());
        self.options.extend_from_slice(&prefix.octets()[..prefix_bytes]);
        self
    }

    /// DNS Search List option with pre-encoded domain names.
    pub fn dnssl(mut self, lifetime: u32, encoded_names: &[u8]) -> Self {
        let mut body = vec![0, 0];
        body.extend_from_slice(&lifetime.to_be_bytes());
        body.extend_from_slice(encoded_names);
        self.push_option(NdpOptionType::Dnssl as u8, &body);
        self
    }

    /// Arbitrary option, zero-padded to a multiple of 8 bytes.
    pub fn raw_option(mut self, option_type: u8, body: &[u8]) -> Self {
        self.push_option(option_type, body);
        self
    }

    fn push_option(&mut self, option_type: u8, body: &[u8]) {
        let padded = (2 + body.len()).div_ceil(8) * 8;
        self.options.push(option_type);
        self.options.push((padded / 8) as u8);
        self.options.extend_from_slice(body);
        self.options.resize(self.options.len() + padded - 2 - body.len(), 0);
    }

    pub fn build(self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(RA_HEADER_LEN + self.options.len());
        buffer.push(Icmpv6Type::RouterAdvertisement as u8);
        buffer.push(0);
        buffer.extend_from_slice(&self.checksum.to_be_bytes());
        buffer.push(self.hop_limit);
        buffer.push(self.flags);
        buffer.extend_from_slice(&self.router_lifetime.to_be_bytes());
        buffer.extend_from_slice(&self.reachable_time.to_be_bytes());
        buffer.extend_from_slice(&self.retrans_timer.to_be_bytes());
        buffer.extend_from_slice(&self.options);
        buffer
    }
}
