//! Configuration types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::telemetry::LogConfig;

/// Smallest program buffer the filter will generate for.
pub const MIN_PROGRAM_SIZE: usize = 512;

/// User-defined configuration (apfd.toml)
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub interface: String,
    /// Hardware address, or "auto" to read it from sysfs.
    #[serde(default = "default_mac")]
    pub mac: String,
    pub capabilities: ApfCapabilities,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub installer: InstallerConfig,
    #[serde(default)]
    pub logging: Option<LogConfig>,
}

fn default_mac() -> String {
    "auto".to_string()
}

/// What the firmware interpreter can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApfCapabilities {
    pub apf_version: u32,
    pub max_program_size: usize,
    #[serde(default)]
    pub packet_format: PacketFormat,
}

impl ApfCapabilities {
    pub fn new(apf_version: u32, max_program_size: usize) -> Self {
        Self {
            apf_version,
            max_program_size,
            packet_format: PacketFormat::Ethernet,
        }
    }

    /// LDDW/STDW and the data region counters exist from APFv4.
    pub fn has_data_access(&self) -> bool {
        self.apf_version >= 4
    }
}

impl fmt::Display for ApfCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ApfCapabilities{{version: {}, maxSize: {}, format: {}}}",
            self.apf_version, self.max_program_size, self.packet_format
        )
    }
}

/// Link-layer framing the firmware hands to the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketFormat {
    #[default]
    Ethernet,
    Rawip,
}

impl fmt::Display for PacketFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketFormat::Ethernet => f.write_str("ethernet"),
            PacketFormat::Rawip => f.write_str("rawip"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_true")]
    pub multicast_filter: bool,
    #[serde(default)]
    pub drop_802_3_frames: bool,
    /// Raw values; out-of-range entries and duplicates are skipped.
    #[serde(default)]
    pub ethertype_blacklist: Vec<u32>,
    /// Non-zero RDNSS lifetimes below this many seconds are not filtered on.
    #[serde(default)]
    pub min_rdnss_lifetime: u32,
}

fn default_true() -> bool {
    true
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            multicast_filter: true,
            drop_802_3_frames: false,
            ethertype_blacklist: Vec::new(),
            min_rdnss_lifetime: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// CIDR strings, e.g. "192.168.1.10/24" or "2001:db8::1/64".
    #[serde(default)]
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerConfig {
    #[serde(default = "default_installer_path")]
    pub path: PathBuf,
}

fn default_installer_path() -> PathBuf {
    PathBuf::from("/run/apfd/program.bin")
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            path: default_installer_path(),
        }
    }
}

// ============================================================================
// Resolved configuration (`config show`)
// ============================================================================

/// Configuration with every default filled in
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub generated_at: String,
    pub interface: String,
    pub mac: String,
    pub capabilities: ApfCapabilities,
    pub filter: FilterConfig,
    pub link: LinkConfig,
    pub installer: InstallerConfig,
    pub logging: LogConfig,
}

impl ResolvedConfig {
    pub fn from_config(config: &Config) -> Self {
        ResolvedConfig {
            generated_at: chrono::Utc::now().to_rfc3339(),
            interface: config.interface.clone(),
            mac: config.mac.clone(),
            capabilities: config.capabilities,
            filter: config.filter.clone(),
            link: config.link.clone(),
            installer: config.installer.clone(),
            logging: config.logging.clone().unwrap_or_default(),
        }
    }
}
