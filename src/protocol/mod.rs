//! Frame layouts the filter program inspects
//!
//! Constants here are absolute offsets into an Ethernet frame. The builders
//! construct frames with the same layout.

pub mod arp;
pub mod ethernet;
pub mod icmpv6;
pub mod ipv4;
pub mod ipv6;
pub mod ra;
pub mod tcp;
pub mod types;
pub mod udp;

pub use types::*;
