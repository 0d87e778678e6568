//! RA capture
//!
//! The receive loop reads frames through the [`Capture`] trait; the daemon
//! uses an AF_PACKET socket filtered to Router Advertisements in the kernel.

mod af_packet;

pub use af_packet::AfPacketSocket;

use crate::Result;
use std::future::Future;

/// Information about a received packet
#[derive(Debug, Clone)]
pub struct RxInfo {
    /// Number of bytes received
    pub len: usize,
}

/// Packet capture backend trait
pub trait Capture: Send + Sync {
    /// Receive a packet into the provided buffer.
    ///
    /// A capture that is closed for good reports `BrokenPipe` (or `EBADF`);
    /// other errors are retried by the receive loop.
    fn recv(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<RxInfo>> + Send;
}
