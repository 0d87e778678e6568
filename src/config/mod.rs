//! Configuration management
//!
//! Handles apfd.toml (user-defined) and the resolved view printed by
//! `apfd config show` (all defaults filled in).

mod types;
mod validation;

pub use types::*;
pub use validation::{validate, ValidationResult};

use crate::protocol::MacAddr;
use crate::{Error, Result};
use std::net::IpAddr;
use std::path::Path;

/// Load configuration from a TOML file
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    let config: Config = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
    Ok(config)
}

/// Fill in all defaults for display
pub fn resolve(config: &Config) -> ResolvedConfig {
    ResolvedConfig::from_config(config)
}

/// Parse `address/prefix` notation.
pub fn parse_cidr(s: &str) -> Result<(IpAddr, u8)> {
    let (addr, prefix) = s
        .trim()
        .split_once('/')
        .ok_or_else(|| Error::Parse(format!("missing prefix length in '{}'", s)))?;
    let addr: IpAddr = addr
        .parse()
        .map_err(|_| Error::Parse(format!("invalid address in '{}'", s)))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| Error::Parse(format!("invalid prefix length in '{}'", s)))?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(Error::Parse(format!(
            "prefix length {} out of range in '{}'",
            prefix, s
        )));
    }
    Ok((addr, prefix))
}

/// Parse every entry of `[link] addresses`.
pub fn link_addresses(config: &Config) -> Result<Vec<(IpAddr, u8)>> {
    config.link.addresses.iter().map(|a| parse_cidr(a)).collect()
}

/// The configured hardware address, reading sysfs when set to "auto".
pub fn resolve_mac(config: &Config) -> Result<MacAddr> {
    if !config.mac.eq_ignore_ascii_case("auto") {
        return config.mac.parse();
    }
    let path = format!("/sys/class/net/{}/address", config.interface);
    let content = std::fs::read_to_string(&path).map_err(|_| Error::InterfaceNotFound {
        name: config.interface.clone(),
    })?;
    content.parse()
}
