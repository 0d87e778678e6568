//! APF filter state machine
//!
//! [`ApfFilter`] owns everything the compiled program depends on: tracked
//! RAs, keepalive filters, the multicast and doze flags and the IPv4
//! address. Every mutator recompiles and reinstalls the program while
//! holding the state lock.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, trace, warn};

use super::clock::Clock;
use super::compiler::{FilterCompiler, FilterInputs};
use super::installer::ProgramInstaller;
use super::keepalive::{KeepaliveFilter, NattKeepalivePacket, TcpKeepalivePacket};
use super::receiver::{self, ReceiveHandle};
use crate::apf::{counter, ApfGenerator};
use crate::capture::{AfPacketSocket, Capture};
use crate::config::{ApfCapabilities, FilterConfig, PacketFormat, MIN_PROGRAM_SIZE};
use crate::protocol::ethernet::{ETH_TYPE_MAX, ETH_TYPE_MIN};
use crate::protocol::ra::{RaRecord, MAX_RAS};
use crate::protocol::MacAddr;
use crate::telemetry::MetricsRegistry;
use crate::{Error, Result};

/// Maximum number of blacklisted ethertypes.
pub const MAX_ETHERTYPE_BLACKLIST_LEN: usize = 20;

/// Reinstall once the program has less than this many seconds left.
pub const MAX_PROGRAM_LIFETIME_WORTH_REFRESHING: u64 = 30;

/// Outcome of handing one captured RA to [`ApfFilter::process_ra`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRaResult {
    /// Repeat of a tracked RA, program still fresh.
    Match,
    /// Table full, RA not tracked.
    Dropped,
    ParseError,
    ZeroLifetime,
    /// Repeat of a tracked RA; the program was close to expiry and got
    /// reinstalled.
    UpdateExpiry,
    /// New RA tracked and program reinstalled.
    UpdateNewRa,
}

/// The link the filter runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceParams {
    pub name: String,
    pub mac: MacAddr,
}

/// Bookkeeping for the program currently in firmware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledProgram {
    pub program: Vec<u8>,
    /// Seconds the program stays valid; `u64::MAX` when no RA bounds it.
    pub min_lifetime: u64,
    /// Monotonic seconds at install.
    pub installed_at: u64,
    pub installed_wall: DateTime<Utc>,
    pub filtered_ras: usize,
    pub tracked_ras: usize,
}

struct FilterState {
    /// Most recently seen first.
    ras: Vec<RaRecord>,
    keepalives: BTreeMap<u32, KeepaliveFilter>,
    multicast_filter: bool,
    in_doze_mode: bool,
    ipv4_address: Option<(Ipv4Addr, u8)>,
    data_snapshot: Option<Vec<u8>>,
    installed: Option<InstalledProgram>,
    receiver: Option<ReceiveHandle>,
}

pub struct ApfFilter {
    interface: InterfaceParams,
    compiler: FilterCompiler,
    drop_802_3_frames: bool,
    ethertype_blacklist: Vec<u16>,
    min_rdnss_lifetime: u32,
    installer: Arc<dyn ProgramInstaller>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsRegistry>,
    state: Mutex<FilterState>,
}

impl ApfFilter {
    pub fn new(
        capabilities: ApfCapabilities,
        config: &FilterConfig,
        interface: InterfaceParams,
        installer: Arc<dyn ProgramInstaller>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        check_capabilities(&capabilities)?;
        let ethertype_blacklist = sanitize_blacklist(&interface.name, &config.ethertype_blacklist);

        Ok(Self {
            compiler: FilterCompiler::new(capabilities),
            drop_802_3_frames: config.drop_802_3_frames,
            ethertype_blacklist,
            min_rdnss_lifetime: config.min_rdnss_lifetime,
            installer,
            clock,
            metrics: Arc::new(MetricsRegistry::new()),
            state: Mutex::new(FilterState {
                ras: Vec::new(),
                keepalives: BTreeMap::new(),
                multicast_filter: config.multicast_filter,
                in_doze_mode: false,
                ipv4_address: None,
                data_snapshot: None,
                installed: None,
                receiver: None,
            }),
            interface,
        })
    }

    pub fn interface(&self) -> &InterfaceParams {
        &self.interface
    }

    pub fn capabilities(&self) -> &ApfCapabilities {
        self.compiler.capabilities()
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.metrics.clone()
    }

    pub fn ethertype_blacklist(&self) -> &[u16] {
        &self.ethertype_blacklist
    }

    fn lock(&self) -> MutexGuard<'_, FilterState> {
        // Mutations are single assignments, a poisoned lock is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Install the basic program and start watching for RAs on the
    /// interface. Must be called inside a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        if !self.prepare_start() {
            return;
        }
        match AfPacketSocket::bind_ra(&self.interface.name) {
            Ok(socket) => self.spawn_receiver(socket),
            Err(e) => error!(
                "APF ({}): failed to open RA socket, filter stays unstarted: {}",
                self.interface.name, e
            ),
        }
    }

    /// Like [`start`](Self::start), reading RAs from `capture`.
    pub fn start_with_capture<C: Capture + 'static>(self: &Arc<Self>, capture: C) {
        if self.prepare_start() {
            self.spawn_receiver(capture);
        }
    }

    /// Reset firmware memory and install the basic program. Returns false
    /// when a receive loop is already running.
    fn prepare_start(&self) -> bool {
        let mut state = self.lock();
        if state.receiver.as_ref().is_some_and(|r| r.is_running()) {
            warn!("APF ({}): already started", self.interface.name);
            return false;
        }
        if self.capabilities().has_data_access() {
            // Zero the whole region so counters start from nothing.
            let zeros = vec![0u8; self.capabilities().max_program_size];
            if let Err(e) = self.installer.install(&zeros) {
                error!("APF ({}): failed to clear APF memory: {}", self.interface.name, e);
            }
        }
        self.install_new_program_locked(&mut state);
        true
    }

    fn spawn_receiver<C: Capture + 'static>(self: &Arc<Self>, capture: C) {
        let handle = receiver::spawn(self.clone(), capture);
        info!("APF ({}): receive loop started", self.interface.name);
        self.lock().receiver = Some(handle);
    }

    /// Stop watching for RAs and forget them. The installed program stays.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        if let Some(receiver) = state.receiver.take() {
            receiver.halt();
        }
        state.ras.clear();
        info!("APF ({}): shut down", self.interface.name);
    }

    pub fn is_running(&self) -> bool {
        self.lock()
            .receiver
            .as_ref()
            .is_some_and(|r| r.is_running())
    }

    // ------------------------------------------------------------------
    // Filter state
    // ------------------------------------------------------------------

    pub fn set_multicast_filter(&self, enabled: bool) {
        let mut state = self.lock();
        if state.multicast_filter == enabled {
            return;
        }
        state.multicast_filter = enabled;
        if !enabled {
            self.metrics.program_updates_allowing_multicast.inc();
        }
        self.install_new_program_locked(&mut state);
    }

    pub fn set_doze_mode(&self, enabled: bool) {
        let mut state = self.lock();
        if state.in_doze_mode == enabled {
            return;
        }
        state.in_doze_mode = enabled;
        self.install_new_program_locked(&mut state);
    }

    pub fn in_doze_mode(&self) -> bool {
        self.lock().in_doze_mode
    }

    /// Set the IPv4 address used for ARP and broadcast filtering.
    pub fn set_link_properties(&self, ipv4_address: Option<(Ipv4Addr, u8)>) {
        let mut state = self.lock();
        if state.ipv4_address == ipv4_address {
            return;
        }
        state.ipv4_address = ipv4_address;
        self.install_new_program_locked(&mut state);
    }

    // ------------------------------------------------------------------
    // Keepalive filters
    // ------------------------------------------------------------------

    /// Drop the acks a peer sends in reply to `sent`.
    pub fn add_tcp_keepalive_filter(&self, slot: u32, sent: &TcpKeepalivePacket) -> Result<()> {
        let mut state = self.lock();
        if state.keepalives.contains_key(&slot) {
            return Err(Error::SlotOccupied(slot));
        }
        let filter = KeepaliveFilter::tcp(sent)?;
        if let KeepaliveFilter::TcpAckV6(_) = filter {
            return Err(Error::Unsupported("IPv6 TCP keepalive filtering".into()));
        }
        info!("APF ({}): adding keepalive ack({}) {}", self.interface.name, slot, filter);
        state.keepalives.insert(slot, filter);
        self.install_new_program_locked(&mut state);
        Ok(())
    }

    /// Drop the NAT-T keepalives a peer sends in reply to `sent`.
    pub fn add_natt_keepalive_filter(&self, slot: u32, sent: &NattKeepalivePacket) -> Result<()> {
        let mut state = self.lock();
        if state.keepalives.contains_key(&slot) {
            return Err(Error::SlotOccupied(slot));
        }
        let filter = KeepaliveFilter::natt(sent)?;
        info!("APF ({}): adding NAT-T keepalive({}) {}", self.interface.name, slot, filter);
        state.keepalives.insert(slot, filter);
        self.install_new_program_locked(&mut state);
        Ok(())
    }

    pub fn remove_keepalive_filter(&self, slot: u32) {
        let mut state = self.lock();
        if let Some(filter) = state.keepalives.remove(&slot) {
            info!("APF ({}): removing keepalive({}) {}", self.interface.name, slot, filter);
        }
        self.install_new_program_locked(&mut state);
    }

    // ------------------------------------------------------------------
    // RA processing
    // ------------------------------------------------------------------

    /// Track a captured RA and reinstall the program if needed.
    pub fn process_ra(&self, frame: &[u8]) -> ProcessRaResult {
        let now = self.clock.now();
        let mut state = self.lock();

        if let Some(index) = state.ras.iter().position(|ra| ra.matches(frame)) {
            let mut ra = state.ras.remove(index);
            ra.refresh(now);
            debug!("APF ({}): matched {}", self.interface.name, ra);
            state.ras.insert(0, ra);
            if should_install_new_program(&state, now) {
                self.install_new_program_locked(&mut state);
                return ProcessRaResult::UpdateExpiry;
            }
            return ProcessRaResult::Match;
        }

        state.ras.retain(|ra| !ra.is_expired(now));
        if state.ras.len() >= MAX_RAS {
            debug!("APF ({}): RA table full, ignoring new RA", self.interface.name);
            return ProcessRaResult::Dropped;
        }

        let ra = match RaRecord::parse(frame, now, self.min_rdnss_lifetime) {
            Ok(ra) => ra,
            Err(e) => {
                debug!("APF ({}): {}", self.interface.name, e);
                return ProcessRaResult::ParseError;
            }
        };
        if ra.is_expired(now) {
            return ProcessRaResult::ZeroLifetime;
        }
        info!("APF ({}): adding {}", self.interface.name, ra);
        state.ras.push(ra);
        self.install_new_program_locked(&mut state);
        ProcessRaResult::UpdateNewRa
    }

    /// Number of RAs currently tracked.
    pub fn tracked_ras(&self) -> usize {
        self.lock().ras.len()
    }

    // ------------------------------------------------------------------
    // Program generation
    // ------------------------------------------------------------------

    fn install_new_program_locked(&self, state: &mut FilterState) {
        let now = self.clock.now();
        state.ras.retain(|ra| !ra.is_expired(now));

        let inputs = FilterInputs {
            mac: self.interface.mac,
            multicast_filter: state.multicast_filter,
            in_doze_mode: state.in_doze_mode,
            drop_802_3_frames: self.drop_802_3_frames,
            ethertype_blacklist: &self.ethertype_blacklist,
            ipv4_address: state.ipv4_address,
            keepalives: &state.keepalives,
        };
        let compiled = match self.compiler.compile(&inputs, &state.ras, now) {
            Ok(compiled) => compiled,
            Err(e) => {
                error!("APF ({}): failed to generate program: {}", self.interface.name, e);
                self.metrics.install_failures.inc();
                return;
            }
        };

        if let Err(e) = self.installer.install(&compiled.program) {
            error!("APF ({}): failed to install program: {}", self.interface.name, e);
            self.metrics.install_failures.inc();
            return;
        }

        debug!(
            "APF ({}): installed {} byte program, {}/{} RAs, lifetime {}",
            self.interface.name,
            compiled.program.len(),
            compiled.filtered_ras,
            state.ras.len(),
            format_lifetime(compiled.min_lifetime)
        );
        trace!("APF ({}): program {}", self.interface.name, to_hex(&compiled.program));
        self.metrics.record_install(
            compiled.program.len(),
            compiled.min_lifetime,
            compiled.filtered_ras,
            state.ras.len(),
        );
        state.installed = Some(InstalledProgram {
            program: compiled.program,
            min_lifetime: compiled.min_lifetime,
            installed_at: now,
            installed_wall: Utc::now(),
            filtered_ras: compiled.filtered_ras,
            tracked_ras: state.ras.len(),
        });
    }

    pub fn last_installed(&self) -> Option<InstalledProgram> {
        self.lock().installed.clone()
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Store the data region read back from firmware.
    pub fn set_data_snapshot(&self, data: Vec<u8>) {
        self.lock().data_snapshot = Some(data);
    }

    pub fn dump(&self) -> String {
        let now = self.clock.now();
        let state = self.lock();
        let mut out = String::new();

        let _ = writeln!(out, "Capabilities: {}", self.capabilities());
        let running = state.receiver.as_ref().is_some_and(|r| r.is_running());
        let _ = writeln!(out, "Receive thread: {}", if running { "RUNNING" } else { "STOPPED" });
        let _ = writeln!(
            out,
            "Multicast: {}",
            if state.multicast_filter { "DROP" } else { "ALLOW" }
        );
        let _ = writeln!(out, "Doze mode: {}", if state.in_doze_mode { "ON" } else { "OFF" });
        let _ = writeln!(out, "Minimum RDNSS lifetime: {}", self.min_rdnss_lifetime);
        match state.ipv4_address {
            Some((address, prefix)) => {
                let _ = writeln!(out, "IPv4 address: {}/{}", address, prefix);
            }
            None => {
                let _ = writeln!(out, "IPv4 address: none");
            }
        }

        let Some(installed) = &state.installed else {
            let _ = writeln!(out, "No program installed.");
            return out;
        };
        let _ = writeln!(out, "Program updates: {}", self.metrics.program_updates.get());
        let _ = writeln!(
            out,
            "Last program length {}, installed {}s ago, lifetime {}",
            installed.program.len(),
            now.saturating_sub(installed.installed_at),
            format_lifetime(installed.min_lifetime)
        );

        let _ = writeln!(out, "RA filters:");
        for ra in &state.ras {
            let _ = writeln!(out, "  {}", ra);
            let _ = writeln!(
                out,
                "    Seen: {}, last {}s ago",
                ra.seen_count(),
                now.saturating_sub(ra.last_seen())
            );
        }

        let _ = writeln!(out, "TCP Keepalive filters:");
        for (slot, filter) in state.keepalives.iter().filter(|(_, k)| k.is_tcp()) {
            let _ = writeln!(out, "  Slot {}: {}", slot, filter);
        }
        let _ = writeln!(out, "NAT-T Keepalive filters:");
        for (slot, filter) in state.keepalives.iter().filter(|(_, k)| !k.is_tcp()) {
            let _ = writeln!(out, "  Slot {}: {}", slot, filter);
        }

        let _ = writeln!(out, "Last program:");
        let _ = writeln!(out, "  {}", to_hex(&installed.program));

        let _ = writeln!(out, "APF packet counters:");
        if !self.capabilities().has_data_access() {
            let _ = writeln!(out, "  APF counters not supported");
        } else if let Some(snapshot) = &state.data_snapshot {
            for (counter, value) in counter::nonzero_counters(snapshot) {
                let _ = writeln!(out, "  {}: {}", counter, value);
            }
        } else {
            let _ = writeln!(out, "  No last snapshot.");
        }
        out
    }
}

fn should_install_new_program(state: &FilterState, now: u64) -> bool {
    match &state.installed {
        None => true,
        Some(installed) => {
            installed.installed_at.saturating_add(installed.min_lifetime)
                < now + MAX_PROGRAM_LIFETIME_WORTH_REFRESHING
        }
    }
}

fn check_capabilities(capabilities: &ApfCapabilities) -> Result<()> {
    if !ApfGenerator::supports_version(capabilities.apf_version) {
        return Err(Error::Config(format!(
            "unsupported APF version {}",
            capabilities.apf_version
        )));
    }
    if capabilities.max_program_size < MIN_PROGRAM_SIZE {
        return Err(Error::Config(format!(
            "max program size {} is below {}",
            capabilities.max_program_size, MIN_PROGRAM_SIZE
        )));
    }
    if capabilities.packet_format != PacketFormat::Ethernet {
        return Err(Error::Config(format!(
            "packet format {} is not supported",
            capabilities.packet_format
        )));
    }
    Ok(())
}

/// Keep valid, distinct ethertypes up to the blacklist limit.
fn sanitize_blacklist(interface: &str, raw: &[u32]) -> Vec<u16> {
    let mut blacklist: Vec<u16> = Vec::new();
    for &value in raw {
        let Ok(ethertype) = u16::try_from(value) else {
            continue;
        };
        if !(ETH_TYPE_MIN..=ETH_TYPE_MAX).contains(&ethertype) || blacklist.contains(&ethertype) {
            continue;
        }
        if blacklist.len() == MAX_ETHERTYPE_BLACKLIST_LEN {
            warn!(
                "APF ({}): ethertype blacklist truncated to {} entries",
                interface, MAX_ETHERTYPE_BLACKLIST_LEN
            );
            break;
        }
        blacklist.push(ethertype);
    }
    blacklist
}

/// Pick the link's IPv4 address. None unless there is exactly one.
pub fn find_ipv4_link_address(addresses: &[(IpAddr, u8)]) -> Option<(Ipv4Addr, u8)> {
    let mut found = None;
    for &(address, prefix) in addresses {
        let IpAddr::V4(v4) = address else {
            continue;
        };
        match found {
            Some(existing) if existing != (v4, prefix) => return None,
            _ => found = Some((v4, prefix)),
        }
    }
    found
}

fn format_lifetime(lifetime: u64) -> String {
    if lifetime == u64::MAX {
        "unbounded".to_string()
    } else {
        format!("{}s", lifetime)
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{:02x}", b);
        s
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::clock::ManualClock;

    #[derive(Default)]
    struct RecordingInstaller {
        programs: Mutex<Vec<Vec<u8>>>,
    }

    impl ProgramInstaller for RecordingInstaller {
        fn install(&self, program: &[u8]) -> Result<()> {
            self.programs.lock().unwrap().push(program.to_vec());
            Ok(())
        }
    }

    struct FailingInstaller;

    impl ProgramInstaller for FailingInstaller {
        fn install(&self, _program: &[u8]) -> Result<()> {
            Err(Error::Install("firmware busy".into()))
        }
    }

    fn make_filter(installer: Arc<dyn ProgramInstaller>) -> ApfFilter {
        ApfFilter::new(
            ApfCapabilities::new(4, 1024),
            &FilterConfig::default(),
            InterfaceParams {
                name: "wlan0".into(),
                mac: MacAddr([2, 0, 0, 0, 0, 1]),
            },
            installer,
            Arc::new(ManualClock::new(1000)),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_bad_capabilities() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let installer: Arc<dyn ProgramInstaller> = Arc::new(RecordingInstaller::default());
        let params = InterfaceParams {
            name: "wlan0".into(),
            mac: MacAddr::ZERO,
        };
        for caps in [ApfCapabilities::new(0, 1024), ApfCapabilities::new(4, 256)] {
            let result = ApfFilter::new(
                caps,
                &FilterConfig::default(),
                params.clone(),
                installer.clone(),
                clock.clone(),
            );
            assert!(matches!(result, Err(Error::Config(_))));
        }
        let mut rawip = ApfCapabilities::new(4, 1024);
        rawip.packet_format = PacketFormat::Rawip;
        assert!(ApfFilter::new(rawip, &FilterConfig::default(), params, installer, clock).is_err());
    }

    #[test]
    fn test_sanitize_blacklist() {
        let raw = [0x0100, 0x88a2, 0x88a2, 0x1_0000, 0x86dd];
        assert_eq!(sanitize_blacklist("wlan0", &raw), vec![0x88a2, 0x86dd]);

        let many: Vec<u32> = (0x0600..0x0600 + 21).collect();
        let blacklist = sanitize_blacklist("wlan0", &many);
        assert_eq!(blacklist.len(), MAX_ETHERTYPE_BLACKLIST_LEN);
        assert!(!blacklist.contains(&0x0614));
    }

    #[test]
    fn test_find_ipv4_link_address() {
        let v4 = |a: [u8; 4], p| (IpAddr::V4(Ipv4Addr::from(a)), p);
        let v6 = ("fe80::1".parse().unwrap(), 64);
        assert_eq!(find_ipv4_link_address(&[]), None);
        assert_eq!(find_ipv4_link_address(&[v6]), None);
        assert_eq!(
            find_ipv4_link_address(&[v6, v4([10, 0, 0, 2], 24)]),
            Some((Ipv4Addr::new(10, 0, 0, 2), 24))
        );
        assert_eq!(
            find_ipv4_link_address(&[v4([10, 0, 0, 2], 24), v4([10, 0, 0, 2], 24)]),
            Some((Ipv4Addr::new(10, 0, 0, 2), 24))
        );
        assert_eq!(
            find_ipv4_link_address(&[v4([10, 0, 0, 2], 24), v4([10, 0, 0, 3], 24)]),
            None
        );
    }

    #[test]
    fn test_unchanged_settings_do_not_reinstall() {
        let installer = Arc::new(RecordingInstaller::default());
        let filter = make_filter(installer.clone());
        filter.set_multicast_filter(true);
        filter.set_doze_mode(false);
        filter.set_link_properties(None);
        assert!(installer.programs.lock().unwrap().is_empty());

        filter.set_multicast_filter(false);
        filter.set_doze_mode(true);
        filter.set_link_properties(Some((Ipv4Addr::new(10, 0, 0, 2), 24)));
        assert_eq!(installer.programs.lock().unwrap().len(), 3);
        assert_eq!(filter.metrics().program_updates_allowing_multicast.get(), 1);
        assert_eq!(filter.metrics().program_updates.get(), 3);
    }

    #[test]
    fn test_install_failure_keeps_bookkeeping() {
        let filter = make_filter(Arc::new(FailingInstaller));
        filter.set_doze_mode(true);
        assert!(filter.last_installed().is_none());
        assert_eq!(filter.metrics().install_failures.get(), 1);
        assert_eq!(filter.metrics().program_updates.get(), 0);
    }

    #[test]
    fn test_should_install_hysteresis() {
        let filter = make_filter(Arc::new(RecordingInstaller::default()));
        let mut state = filter.lock();
        assert!(should_install_new_program(&state, 0));

        state.installed = Some(InstalledProgram {
            program: vec![],
            min_lifetime: 100,
            installed_at: 1000,
            installed_wall: Utc::now(),
            filtered_ras: 0,
            tracked_ras: 0,
        });
        assert!(!should_install_new_program(&state, 1070));
        assert!(should_install_new_program(&state, 1071));

        if let Some(installed) = state.installed.as_mut() {
            installed.min_lifetime = u64::MAX;
        }
        assert!(!should_install_new_program(&state, u64::MAX / 2));
    }

    #[test]
    fn test_dump_before_install() {
        let filter = make_filter(Arc::new(RecordingInstaller::default()));
        let dump = filter.dump();
        assert!(dump.starts_with("Capabilities: ApfCapabilities{version: 4, maxSize: 1024"));
        assert!(dump.contains("Receive thread: STOPPED"));
        assert!(dump.contains("Multicast: DROP"));
        assert!(dump.contains("Doze mode: OFF"));
        assert!(dump.contains("IPv4 address: none"));
        assert!(dump.ends_with("No program installed.\n"));
    }

    #[test]
    fn test_dump_after_install() {
        let filter = make_filter(Arc::new(RecordingInstaller::default()));
        filter.set_link_properties(Some((Ipv4Addr::new(10, 0, 0, 2), 24)));
        let dump = filter.dump();
        assert!(dump.contains("IPv4 address: 10.0.0.2/24"));
        assert!(dump.contains("Program updates: 1"));
        assert!(dump.contains("installed 0s ago, lifetime unbounded"));
        assert!(dump.contains("No last snapshot."));

        let mut snapshot = vec![0u8; 1024];
        let at = (1024 + crate::apf::Counter::TotalPackets.offset()) as usize;
        snapshot[at + 3] = 7;
        filter.set_data_snapshot(snapshot);
        assert!(filter.dump().contains("  TOTAL_PACKETS: 7"));
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x00, 0xab, 0x10]), "00ab10");
    }
}
