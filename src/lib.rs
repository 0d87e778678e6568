//! apfd - Android Packet Filter daemon
//!
//! Compiles the host's packet filtering policy into APF bytecode and keeps
//! the program in firmware up to date. Repeated IPv6 Router Advertisements,
//! unwanted ARP, IPv4 and IPv6 traffic and keepalive acks are dropped before
//! they wake the application processor.

pub mod apf;
pub mod capture;
pub mod config;
pub mod error;
pub mod filter;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};
