//! Configuration validation

use std::collections::HashSet;
use std::net::IpAddr;

use super::{parse_cidr, Config, PacketFormat, MIN_PROGRAM_SIZE};
use crate::apf::ApfGenerator;
use crate::filter::MAX_ETHERTYPE_BLACKLIST_LEN;
use crate::protocol::ethernet::{ETH_TYPE_MAX, ETH_TYPE_MIN};
use crate::protocol::MacAddr;
use crate::telemetry::{is_known_format, is_known_level};

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_interface(config, &mut result);
    validate_capabilities(config, &mut result);
    validate_filter(config, &mut result);
    validate_link(config, &mut result);
    validate_logging(config, &mut result);

    result
}

fn validate_interface(config: &Config, result: &mut ValidationResult) {
    if config.interface.trim().is_empty() {
        result.error("interface: must not be empty");
    }
    if !config.mac.eq_ignore_ascii_case("auto") && config.mac.parse::<MacAddr>().is_err() {
        result.error(format!("mac: '{}' is not a MAC address or \"auto\"", config.mac));
    }
}

fn validate_capabilities(config: &Config, result: &mut ValidationResult) {
    let caps = &config.capabilities;
    if caps.apf_version == 0 {
        result.error("capabilities.apf_version: APF is not supported (version 0)");
    } else if !ApfGenerator::supports_version(caps.apf_version) {
        result.error(format!(
            "capabilities.apf_version: unsupported APF version {}",
            caps.apf_version
        ));
    } else if !caps.has_data_access() {
        result.warn(format!(
            "capabilities.apf_version: version {} has no data region, packet counters disabled",
            caps.apf_version
        ));
    }

    if caps.max_program_size < MIN_PROGRAM_SIZE {
        result.error(format!(
            "capabilities.max_program_size: {} is below the minimum of {}",
            caps.max_program_size, MIN_PROGRAM_SIZE
        ));
    }

    if caps.packet_format != PacketFormat::Ethernet {
        result.error(format!(
            "capabilities.packet_format: only ethernet is supported, got {}",
            caps.packet_format
        ));
    }
}

fn validate_filter(config: &Config, result: &mut ValidationResult) {
    let mut seen = HashSet::new();
    for &ethertype in &config.filter.ethertype_blacklist {
        if ethertype < u32::from(ETH_TYPE_MIN) || ethertype > u32::from(ETH_TYPE_MAX) {
            result.warn(format!(
                "filter.ethertype_blacklist: {:#06x} is not a valid ethertype, ignored",
                ethertype
            ));
        } else if !seen.insert(ethertype) {
            result.warn(format!(
                "filter.ethertype_blacklist: duplicate {:#06x} ignored",
                ethertype
            ));
        }
    }
    if seen.len() > MAX_ETHERTYPE_BLACKLIST_LEN {
        result.warn(format!(
            "filter.ethertype_blacklist: {} entries, only the first {} are used",
            seen.len(),
            MAX_ETHERTYPE_BLACKLIST_LEN
        ));
    }
}

fn validate_link(config: &Config, result: &mut ValidationResult) {
    let mut ipv4 = HashSet::new();
    for address in &config.link.addresses {
        match parse_cidr(address) {
            Ok((IpAddr::V4(addr), _)) => {
                ipv4.insert(addr);
            }
            Ok(_) => {}
            Err(e) => result.error(format!("link.addresses: {}", e)),
        }
    }
    if ipv4.len() > 1 {
        result.warn(format!(
            "link.addresses: {} IPv4 addresses, ARP and broadcast filtering use none of them",
            ipv4.len()
        ));
    }
}

fn validate_logging(config: &Config, result: &mut ValidationResult) {
    let Some(logging) = &config.logging else {
        return;
    };
    if !is_known_level(&logging.level) {
        result.warn(format!(
            "logging.level: unknown level '{}', using info",
            logging.level
        ));
    }
    if !is_known_format(&logging.format) {
        result.warn(format!(
            "logging.format: unknown format '{}', using pretty",
            logging.format
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApfCapabilities, FilterConfig, InstallerConfig, LinkConfig};
    use crate::telemetry::LogConfig;

    fn make_config() -> Config {
        Config {
            interface: "wlan0".to_string(),
            mac: "auto".to_string(),
            capabilities: ApfCapabilities::new(4, 1024),
            filter: FilterConfig::default(),
            link: LinkConfig::default(),
            installer: InstallerConfig::default(),
            logging: None,
        }
    }

    #[test]
    fn test_valid_minimal_config() {
        let config = make_config();
        let result = validate(&config);
        assert!(!result.has_errors());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_version_zero_is_error() {
        let mut config = make_config();
        config.capabilities.apf_version = 0;
        let result = validate(&config);
        assert!(result.errors.iter().any(|e| e.contains("version 0")));
    }

    #[test]
    fn test_unsupported_version() {
        let mut config = make_config();
        config.capabilities.apf_version = 1;
        let result = validate(&config);
        assert!(result.errors.iter().any(|e| e.contains("unsupported APF version 1")));
    }

    #[test]
    fn test_no_counters_warning() {
        let mut config = make_config();
        config.capabilities.apf_version = 3;
        let result = validate(&config);
        assert!(!result.has_errors());
        assert!(result.warnings.iter().any(|w| w.contains("counters disabled")));
    }

    #[test]
    fn test_small_program_size() {
        let mut config = make_config();
        config.capabilities.max_program_size = 511;
        let result = validate(&config);
        assert!(result.errors.iter().any(|e| e.contains("below the minimum")));
    }

    #[test]
    fn test_packet_format() {
        let mut config = make_config();
        config.capabilities.packet_format = PacketFormat::Rawip;
        let result = validate(&config);
        assert!(result.errors.iter().any(|e| e.contains("only ethernet")));
    }

    #[test]
    fn test_bad_mac() {
        let mut config = make_config();
        config.mac = "02:00:00".to_string();
        assert!(validate(&config).has_errors());
        config.mac = "02:00:00:00:00:01".to_string();
        assert!(!validate(&config).has_errors());
    }

    #[test]
    fn test_blacklist_warnings() {
        let mut config = make_config();
        config.filter.ethertype_blacklist = vec![0x0100, 0x88a2, 0x88a2, 0x1_0000];
        let result = validate(&config);
        assert!(!result.has_errors());
        assert_eq!(result.warnings.len(), 3);
        assert!(result.warnings.iter().any(|w| w.contains("duplicate 0x88a2")));

        config.filter.ethertype_blacklist = (0x0600..0x0600 + 21).collect();
        let result = validate(&config);
        assert!(result.warnings.iter().any(|w| w.contains("only the first 20")));
    }

    #[test]
    fn test_link_addresses() {
        let mut config = make_config();
        config.link.addresses = vec!["192.168.1.10".to_string()];
        assert!(validate(&config).has_errors());

        config.link.addresses = vec!["192.168.1.10/24".to_string(), "10.0.0.1/8".to_string()];
        let result = validate(&config);
        assert!(!result.has_errors());
        assert!(result.warnings.iter().any(|w| w.contains("2 IPv4 addresses")));
    }

    #[test]
    fn test_logging_warnings() {
        let mut config = make_config();
        config.logging = Some(LogConfig {
            level: "loud".to_string(),
            format: "xml".to_string(),
        });
        let result = validate(&config);
        assert_eq!(result.warnings.len(), 2);
    }
}
