//! UDP - RFC 768

/// UDP header size (fixed)
pub const HEADER_SIZE: usize = 8;

/// Destination port, relative to the start of the IP payload plus the
/// Ethernet header. Add the IPv4 header length to get the frame offset.
pub const DEST_PORT_OFFSET: u32 = super::ethernet::HEADER_LEN as u32 + 2;

pub const DHCP_CLIENT_PORT: u16 = 68;
pub const DHCP_SERVER_PORT: u16 = 67;
/// DHCP `chaddr`, relative like [`DEST_PORT_OFFSET`].
pub const DHCP_CLIENT_MAC_OFFSET: u32 = super::ethernet::HEADER_LEN as u32 + HEADER_SIZE as u32 + 28;

/// NAT-T keepalive payload (RFC 3948)
pub const NATT_KEEPALIVE_PAYLOAD: u8 = 0xff;

/// Builder for UDP datagrams
///
/// The checksum is left at zero, which IPv4 receivers accept.
#[derive(Debug, Clone, Default)]
pub struct UdpBuilder {
    src_port: u16,
    dst_port: u16,
    payload: Vec<u8>,
}

impl UdpBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src_port(mut self, port: u16) -> Self {
        self.src_port = port;
        self
    }

    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    pub fn payload(mut self, data: &[u8]) -> Self {
        self.payload = data.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let length = (HEADER_SIZE + self.payload.len()) as u16;
        let mut buffer = Vec::with_capacity(length as usize);
        buffer.extend_from_slice(&self.src_port.to_be_bytes());
        buffer.extend_from_slice(&self.dst_port.to_be_bytes());
        buffer.extend_from_slice(&length.to_be_bytes());
        buffer.extend_from_slice(&[0, 0]);
        buffer.extend_from_slice(&self.payload);
        buffer
    }
}
