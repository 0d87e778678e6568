//! TCP - RFC 793

/// TCP header size without options
pub const MIN_HEADER_SIZE: usize = 20;

/// Data offset byte, relative to the start of the IP payload plus the
/// Ethernet header.
pub const HEADER_SIZE_OFFSET: u32 = super::ethernet::HEADER_LEN as u32 + 12;

pub const FLAG_ACK: u8 = 0x10;

/// Builder for TCP segments
///
/// Produces a header without options and with a zero checksum.
#[derive(Debug, Clone, Default)]
pub struct TcpBuilder {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    payload: Vec<u8>,
}

impl TcpBuilder {
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

    pub fn seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    pub fn ack(mut self, ack: u32) -> Self {
        self.ack = ack;
        self.flags |= FLAG_ACK;
        self
    }

    pub fn payload(mut self, data: &[u8]) -> Self {
        self.payload = data.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(MIN_HEADER_SIZE + self.payload.len());
        buffer.extend_from_slice(&self.src_port.to_be_bytes());
        buffer.extend_from_slice(&self.dst_port.to_be_bytes());
        buffer.extend_from_slice(&self.seq.to_be_bytes());
        buffer.extend_from_slice(&self.ack.to_be_bytes());
        buffer.push(((MIN_HEADER_SIZE / 4) as u8) << 4);
        buffer.push(self.flags);
        // window, checksum, urgent pointer
        buffer.extend_from_slice(&[0xff, 0xff, 0, 0, 0, 0]);
        buffer.extend_from_slice(&self.payload);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_builder_ack() {
        let segment = TcpBuilder::new()
            .src_port(443)
            .dst_port(50000)
            .seq(0x01020304)
            .ack(0x0a0b0c0d)
            .build();
        assert_eq!(segment.len(), MIN_HEADER_SIZE);
        assert_eq!(&segment[..4], &[0x01, 0xbb, 0xc3, 0x50]);
        assert_eq!(&segment[4..12], &[1, 2, 3, 4, 0x0a, 0x0b, 0x0c, 0x0d]);
        assert_eq!(segment[12], 0x50);
        assert_eq!(segment[13], FLAG_ACK);
    }

    #[test]
    fn test_tcp_builder_payload() {
        let segment = TcpBuilder::new().payload(b"hi").build();
        assert_eq!(segment.len(), MIN_HEADER_SIZE + 2);
        assert_eq!(segment[13], 0);
    }
}
