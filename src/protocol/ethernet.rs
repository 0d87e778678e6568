//! Ethernet II framing

use super::MacAddr;

pub const HEADER_LEN: usize = 14;
/// Largest frame the receive loop reads (without FCS).
pub const MAX_FRAME_SIZE: usize = 1514;

pub const DEST_ADDR_OFFSET: u32 = 0;
pub const SRC_ADDR_OFFSET: u32 = 6;
pub const ETHERTYPE_OFFSET: u32 = 12;

/// EtherType values below this are 802.3 length fields.
pub const ETH_TYPE_MIN: u16 = 0x0600;
pub const ETH_TYPE_MAX: u16 = 0xffff;

/// EtherType of a frame, if it has a full header.
pub fn ethertype(frame: &[u8]) -> Option<u16> {
    let at = ETHERTYPE_OFFSET as usize;
    frame
        .get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
}

/// Builder for constructing Ethernet frames
pub struct FrameBuilder {
    buffer: Vec<u8>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_FRAME_SIZE),
        }
    }

    pub fn dst_mac(mut self, mac: MacAddr) -> Self {
        self.buffer.extend_from_slice(&mac.0);
        self
    }

    pub fn src_mac(mut self, mac: MacAddr) -> Self {
        self.buffer.extend_from_slice(&mac.0);
        self
    }

    pub fn ethertype(mut self, ethertype: u16) -> Self {
        self.buffer.extend_from_slice(&ethertype.to_be_bytes());
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.buffer.extend_from_slice(payload);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}
