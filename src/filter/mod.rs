//! Packet filter management
//!
//! Compiles filter state into APF programs, installs them and keeps them
//! fresh as RAs come and go.

mod apf_filter;
pub mod clock;
pub mod compiler;
pub mod installer;
pub mod keepalive;
mod receiver;

pub use apf_filter::{
    find_ipv4_link_address, ApfFilter, InstalledProgram, InterfaceParams, ProcessRaResult,
    MAX_ETHERTYPE_BLACKLIST_LEN, MAX_PROGRAM_LIFETIME_WORTH_REFRESHING,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use compiler::{CompiledProgram, FilterCompiler, FilterInputs};
pub use installer::{FileInstaller, ProgramInstaller};
pub use keepalive::{KeepaliveFilter, NattKeepalivePacket, TcpKeepalivePacket};

pub use crate::apf::decode_counter;
pub use crate::protocol::ipv4::broadcast_address as ipv4_broadcast_address;
