//! Keepalive ack descriptors
//!
//! Built from the keepalive the host sent; each describes the reply the
//! peer will send back so the firmware can drop it.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use super::compiler::ProgramBuilder;
use crate::apf::{Counter, Register};
use crate::apf::generator::IPV4_HEADER_SIZE_MEMORY_SLOT;
use crate::protocol::{ethernet, ipv4, tcp, udp};
use crate::{Error, Result};

/// A TCP keepalive the host sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpKeepalivePacket {
    pub src_address: IpAddr,
    pub src_port: u16,
    pub dst_address: IpAddr,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
}

/// A NAT-T keepalive the host sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NattKeepalivePacket {
    pub src_address: IpAddr,
    pub src_port: u16,
    pub dst_address: IpAddr,
    pub dst_port: u16,
}

fn address_bytes(addr: &IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

fn same_family(a: &IpAddr, b: &IpAddr) -> bool {
    a.is_ipv4() == b.is_ipv4()
}

/// The ack the peer sends in response to a TCP keepalive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpKeepaliveAck {
    src: SocketAddr,
    dst: SocketAddr,
    seq: u32,
    ack: u32,
}

impl TcpKeepaliveAck {
    fn from_sent(sent: &TcpKeepalivePacket) -> Self {
        Self {
            src: SocketAddr::new(sent.dst_address, sent.dst_port),
            dst: SocketAddr::new(sent.src_address, sent.src_port),
            seq: sent.ack,
            ack: sent.seq.wrapping_add(1),
        }
    }

    pub fn src(&self) -> SocketAddr {
        self.src
    }

    pub fn dst(&self) -> SocketAddr {
        self.dst
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn ack(&self) -> u32 {
        self.ack
    }

    /// `src ‖ dst`
    pub fn address_fingerprint(&self) -> Vec<u8> {
        let mut fp = address_bytes(&self.src.ip());
        fp.extend(address_bytes(&self.dst.ip()));
        fp
    }

    /// `srcPort ‖ dstPort ‖ seq ‖ ack`, big-endian.
    pub fn port_seq_ack_fingerprint(&self) -> [u8; 12] {
        let mut fp = [0u8; 12];
        fp[0..2].copy_from_slice(&self.src.port().to_be_bytes());
        fp[2..4].copy_from_slice(&self.dst.port().to_be_bytes());
        fp[4..8].copy_from_slice(&self.seq.to_be_bytes());
        fp[8..12].copy_from_slice(&self.ack.to_be_bytes());
        fp
    }
}

impl fmt::Display for TcpKeepaliveAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} , seq={}, ack={}",
            self.src, self.dst, self.seq, self.ack
        )
    }
}

/// The keepalive a NAT-T peer sends back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NattKeepaliveResponse {
    src: SocketAddr,
    dst: SocketAddr,
}

impl NattKeepaliveResponse {
    fn from_sent(sent: &NattKeepalivePacket) -> Self {
        Self {
            src: SocketAddr::new(sent.dst_address, sent.dst_port),
            dst: SocketAddr::new(sent.src_address, sent.src_port),
        }
    }

    pub fn address_fingerprint(&self) -> Vec<u8> {
        let mut fp = address_bytes(&self.src.ip());
        fp.extend(address_bytes(&self.dst.ip()));
        fp
    }

    pub fn port_fingerprint(&self) -> [u8; 4] {
        let mut fp = [0u8; 4];
        fp[0..2].copy_from_slice(&self.src.port().to_be_bytes());
        fp[2..4].copy_from_slice(&self.dst.port().to_be_bytes());
        fp
    }
}

impl fmt::Display for NattKeepaliveResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// A registered keepalive filter, keyed by slot in the filter state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepaliveFilter {
    TcpAckV4(TcpKeepaliveAck),
    /// Can be constructed but not compiled.
    TcpAckV6(TcpKeepaliveAck),
    Natt(NattKeepaliveResponse),
}

impl KeepaliveFilter {
    pub fn tcp(sent: &TcpKeepalivePacket) -> Result<Self> {
        if !same_family(&sent.src_address, &sent.dst_address) {
            return Err(Error::InvalidKeepalive(format!(
                "mixed address families {} and {}",
                sent.src_address, sent.dst_address
            )));
        }
        let ack = TcpKeepaliveAck::from_sent(sent);
        Ok(if sent.src_address.is_ipv4() {
            KeepaliveFilter::TcpAckV4(ack)
        } else {
            KeepaliveFilter::TcpAckV6(ack)
        })
    }

    pub fn natt(sent: &NattKeepalivePacket) -> Result<Self> {
        if !sent.src_address.is_ipv4() || !sent.dst_address.is_ipv4() {
            return Err(Error::InvalidKeepalive(
                "NAT-T keepalive is only supported on IPv4".into(),
            ));
        }
        Ok(KeepaliveFilter::Natt(NattKeepaliveResponse::from_sent(sent)))
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self, KeepaliveFilter::TcpAckV4(_) | KeepaliveFilter::TcpAckV6(_))
    }

    /// Append the code dropping this keepalive. Falls through on mismatch.
    pub(crate) fn emit(&self, builder: &mut ProgramBuilder) -> Result<()> {
        match self {
            KeepaliveFilter::TcpAckV4(ack) => emit_tcp_v4(ack, builder),
            KeepaliveFilter::TcpAckV6(_) => Err(Error::Unsupported(
                "IPv6 TCP keepalive filtering".into(),
            )),
            KeepaliveFilter::Natt(response) => emit_natt(response, builder),
        }
    }
}

impl fmt::Display for KeepaliveFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeepaliveFilter::TcpAckV4(ack) | KeepaliveFilter::TcpAckV6(ack) => ack.fmt(f),
            KeepaliveFilter::Natt(response) => response.fmt(f),
        }
    }
}

fn emit_tcp_v4(ack: &TcpKeepaliveAck, builder: &mut ProgramBuilder) -> Result<()> {
    let drop = builder.count_and_drop();
    let gen = builder.gen();
    let next = gen.new_label();

    gen.add_load_immediate(Register::R0, ipv4::SRC_ADDR_OFFSET as i32);
    gen.add_jump_if_bytes_not_equal(Register::R0, &ack.address_fingerprint(), next)?;

    // An ack carries no payload: total length == IPv4 header + TCP header
    gen.add_load_from_memory(Register::R1, IPV4_HEADER_SIZE_MEMORY_SLOT)?;
    // data offset is the high nibble in 32-bit words
    gen.add_load8_indexed(Register::R0, tcp::HEADER_SIZE_OFFSET);
    gen.add_right_shift(2);
    gen.add_add_r1();
    gen.add_load16(Register::R1, ipv4::TOTAL_LENGTH_OFFSET);
    gen.add_neg(Register::R0);
    gen.add_add_r1();
    gen.add_jump_if_r0_not_equals(0, next);

    gen.add_load_from_memory(Register::R1, IPV4_HEADER_SIZE_MEMORY_SLOT)?;
    gen.add_load_immediate(Register::R0, ethernet::HEADER_LEN as i32);
    gen.add_add_r1();
    gen.add_jump_if_bytes_not_equal(Register::R0, &ack.port_seq_ack_fingerprint(), next)?;

    builder.setup_counter(Counter::DroppedIpv4KeepaliveAck);
    builder.gen().add_jump(drop);
    builder.gen().define_label(next)?;
    Ok(())
}

fn emit_natt(response: &NattKeepaliveResponse, builder: &mut ProgramBuilder) -> Result<()> {
    let drop = builder.count_and_drop();
    let gen = builder.gen();
    let next = gen.new_label();

    gen.add_load_immediate(Register::R0, ipv4::SRC_ADDR_OFFSET as i32);
    gen.add_jump_if_bytes_not_equal(Register::R0, &response.address_fingerprint(), next)?;

    // UDP payload length: total length - IPv4 header - UDP header
    gen.add_load_from_memory(Register::R0, IPV4_HEADER_SIZE_MEMORY_SLOT)?;
    gen.add_add(udp::HEADER_SIZE as u32);
    gen.add_swap();
    gen.add_load16(Register::R0, ipv4::TOTAL_LENGTH_OFFSET);
    gen.add_neg(Register::R1);
    gen.add_add_r1();
    gen.add_jump_if_r0_not_equals(1, next);

    gen.add_load_from_memory(Register::R0, IPV4_HEADER_SIZE_MEMORY_SLOT)?;
    gen.add_add(ethernet::HEADER_LEN as u32);
    gen.add_jump_if_bytes_not_equal(Register::R0, &response.port_fingerprint(), next)?;

    gen.add_add(udp::HEADER_SIZE as u32);
    gen.add_jump_if_bytes_not_equal(Register::R0, &[udp::NATT_KEEPALIVE_PAYLOAD], next)?;

    builder.setup_counter(Counter::DroppedIpv4NattKeepalive);
    builder.gen().add_jump(drop);
    builder.gen().define_label(next)?;
    Ok(())
}
