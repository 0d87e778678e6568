//! Filter integration tests
//!
//! Drive `ApfFilter` through its public API with a recording installer and a
//! manual clock, then run the installed program under the reference
//! interpreter.
//!
//! Run with: cargo test --test filter

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use apfd::apf::interpreter::run_with_data;
use apfd::apf::{decode_counter, Counter, Verdict};
use apfd::capture::{Capture, RxInfo};
use apfd::config::{ApfCapabilities, FilterConfig};
use apfd::filter::{
    ApfFilter, Clock, InterfaceParams, ManualClock, NattKeepalivePacket, ProcessRaResult,
    ProgramInstaller, TcpKeepalivePacket,
};
use apfd::protocol::ethernet::FrameBuilder;
use apfd::protocol::icmpv6::{self, RaBuilder};
use apfd::protocol::ipv4::{Ipv4Builder, Protocol};
use apfd::protocol::ipv6::{self, Ipv6Builder, NextHeader};
use apfd::protocol::tcp::TcpBuilder;
use apfd::protocol::udp::{self, UdpBuilder};
use apfd::protocol::{EtherType, MacAddr};
use apfd::{Error, Result};
use tokio::sync::mpsc;

const MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x10]);
const ROUTER: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
const LOCAL_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
const GATEWAY_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
const START: u64 = 1000;

#[derive(Default)]
struct RecordingInstaller {
    programs: Mutex<Vec<Vec<u8>>>,
}

impl RecordingInstaller {
    fn count(&self) -> usize {
        self.programs.lock().unwrap().len()
    }

    fn all(&self) -> Vec<Vec<u8>> {
        self.programs.lock().unwrap().clone()
    }
}

impl ProgramInstaller for RecordingInstaller {
    fn install(&self, program: &[u8]) -> Result<()> {
        self.programs.lock().unwrap().push(program.to_vec());
        Ok(())
    }
}

/// Frames pushed through a channel; closing the sender ends the capture.
struct ChannelCapture {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl Capture for ChannelCapture {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<RxInfo> {
        match self.rx.recv().await {
            Some(frame) => {
                buf[..frame.len()].copy_from_slice(&frame);
                Ok(RxInfo { len: frame.len() })
            }
            None => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "capture closed",
            ))),
        }
    }
}

/// Fails the first read with a transient error, then reads from `inner`.
struct FlakyCapture {
    failed: bool,
    inner: ChannelCapture,
}

impl Capture for FlakyCapture {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<RxInfo> {
        if !self.failed {
            self.failed = true;
            return Err(Error::Io(std::io::Error::from_raw_os_error(libc::ENETDOWN)));
        }
        self.inner.recv(buf).await
    }
}

struct Harness {
    filter: Arc<ApfFilter>,
    installer: Arc<RecordingInstaller>,
    clock: Arc<ManualClock>,
    capabilities: ApfCapabilities,
}

impl Harness {
    fn new(capabilities: ApfCapabilities, config: FilterConfig) -> Self {
        let installer = Arc::new(RecordingInstaller::default());
        let clock = Arc::new(ManualClock::new(START));
        let filter = ApfFilter::new(
            capabilities,
            &config,
            InterfaceParams {
                name: "wlan0".to_string(),
                mac: MAC,
            },
            installer.clone(),
            clock.clone() as Arc<dyn Clock>,
        )
        .expect("valid capabilities");
        Self {
            filter: Arc::new(filter),
            installer,
            clock,
            capabilities,
        }
    }

    fn standard() -> Self {
        Self::new(ApfCapabilities::new(4, 1024), FilterConfig::default())
    }

    fn program(&self) -> Vec<u8> {
        self.filter
            .last_installed()
            .expect("a program is installed")
            .program
    }

    /// Run the installed program with a zeroed data region.
    fn run(&self, frame: &[u8], filter_age: u32) -> (Verdict, Vec<u8>) {
        let program = self.program();
        let mut ram = program.clone();
        ram.resize(self.capabilities.max_program_size, 0);
        let verdict = run_with_data(&mut ram, program.len(), frame, filter_age);
        (verdict, ram)
    }

    fn verdict(&self, frame: &[u8], filter_age: u32) -> Verdict {
        self.run(frame, filter_age).0
    }
}

fn ra_frame(src: &str, prefix: &str, router_lifetime: u16) -> Vec<u8> {
    let ra = RaBuilder::new()
        .router_lifetime(router_lifetime)
        .prefix_info(prefix.parse().unwrap(), 64, 3600, 1800)
        .rdnss(1800, &["2001:db8::53".parse().unwrap()])
        .build();
    let ip = Ipv6Builder::new()
        .next_header(NextHeader::Icmpv6 as u8)
        .src_addr(src.parse().unwrap())
        .dst_addr(ipv6::ALL_NODES_ADDRESS)
        .payload(&ra)
        .build();
    FrameBuilder::new()
        .dst_mac(MacAddr([0x33, 0x33, 0, 0, 0, 1]))
        .src_mac(ROUTER)
        .ethertype(EtherType::Ipv6 as u16)
        .payload(&ip)
        .build()
}

fn default_ra() -> Vec<u8> {
    ra_frame("fe80::1", "2001:db8:1::", 1800)
}

fn ipv4_frame(protocol: Protocol, payload: &[u8]) -> Vec<u8> {
    let ip = Ipv4Builder::new()
        .protocol(protocol as u8)
        .src_addr(GATEWAY_IP)
        .dst_addr(LOCAL_IP)
        .payload(payload)
        .build();
    FrameBuilder::new()
        .dst_mac(MAC)
        .src_mac(ROUTER)
        .ethertype(EtherType::Ipv4 as u16)
        .payload(&ip)
        .build()
}

fn tcp_keepalive(src_port: u16, seq: u32, ack: u32) -> TcpKeepalivePacket {
    TcpKeepalivePacket {
        src_address: IpAddr::V4(LOCAL_IP),
        src_port,
        dst_address: IpAddr::V4(GATEWAY_IP),
        dst_port: 443,
        seq,
        ack,
    }
}

/// The ack a peer sends back for `sent`
fn tcp_ack_frame(sent: &TcpKeepalivePacket) -> Vec<u8> {
    let tcp = TcpBuilder::new()
        .src_port(sent.dst_port)
        .dst_port(sent.src_port)
        .seq(sent.ack)
        .ack(sent.seq.wrapping_add(1))
        .build();
    ipv4_frame(Protocol::Tcp, &tcp)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

// ============================================================================
// RA filtering
// ============================================================================

/// A tracked RA is dropped while the filter is younger than its filter
/// lifetime, and passes after
#[test]
fn test_ra_repeat_dropped_within_filter_lifetime() {
    let h = Harness::standard();
    let ra = default_ra();

    assert_eq!(h.filter.process_ra(&ra), ProcessRaResult::UpdateNewRa);
    assert_eq!(h.filter.tracked_ras(), 1);

    let installed = h.filter.last_installed().unwrap();
    assert_eq!(installed.min_lifetime, 300);
    assert_eq!(installed.filtered_ras, 1);
    assert_eq!(installed.installed_at, START);

    let (verdict, ram) = h.run(&ra, 0);
    assert_eq!(verdict, Verdict::Drop);
    assert_eq!(decode_counter(&ram, Counter::DroppedRa), Some(1));

    assert_eq!(h.verdict(&ra, 300), Verdict::Drop);
    let (verdict, ram) = h.run(&ra, 301);
    assert_eq!(verdict, Verdict::Pass);
    assert_eq!(decode_counter(&ram, Counter::PassedIpv6Icmp), Some(1));
}

/// Checksum and flow label are ignored; the source address is not
#[test]
fn test_ra_match_sections() {
    let h = Harness::standard();
    let ra = default_ra();
    h.filter.process_ra(&ra);

    let mut rechecked = ra.clone();
    rechecked[icmpv6::CHECKSUM_OFFSET as usize] ^= 0xff;
    rechecked[ipv6::FLOW_LABEL_OFFSET as usize + 2] = 0x42;
    assert_eq!(h.verdict(&rechecked, 0), Verdict::Drop);

    let other_router = ra_frame("fe80::2", "2001:db8:1::", 1800);
    assert_eq!(h.verdict(&other_router, 0), Verdict::Pass);

    let other_prefix = ra_frame("fe80::1", "2001:db8:2::", 1800);
    assert_eq!(h.verdict(&other_prefix, 0), Verdict::Pass);

    // a lifetime below the filter lifetime must reach the host
    let short = ra_frame("fe80::1", "2001:db8:1::", 100);
    assert_eq!(h.verdict(&short, 0), Verdict::Pass);
}

/// Repeats refresh the record; the program is only reinstalled close to
/// expiry
#[test]
fn test_repeat_reinstalls_near_expiry() {
    let h = Harness::standard();
    let ra = default_ra();
    h.filter.process_ra(&ra);
    let installs = h.installer.count();

    h.clock.advance(100);
    assert_eq!(h.filter.process_ra(&ra), ProcessRaResult::Match);
    assert_eq!(h.installer.count(), installs);

    // installed at START with lifetime 300: refresh once less than 30s remain
    h.clock.set(START + 271);
    assert_eq!(h.filter.process_ra(&ra), ProcessRaResult::UpdateExpiry);
    assert_eq!(h.installer.count(), installs + 1);
    assert_eq!(h.filter.last_installed().unwrap().installed_at, START + 271);

    let dump = h.filter.dump();
    assert!(dump.contains("Seen: 2, last 0s ago"), "{}", dump);
}

/// An RA whose lifetime is already zero is ignored without reinstalling
#[test]
fn test_zero_lifetime_ra_ignored() {
    let h = Harness::standard();
    let ra = RaBuilder::new().router_lifetime(0).build();
    let ip = Ipv6Builder::new()
        .next_header(NextHeader::Icmpv6 as u8)
        .src_addr("fe80::1".parse().unwrap())
        .dst_addr(ipv6::ALL_NODES_ADDRESS)
        .payload(&ra)
        .build();
    let frame = FrameBuilder::new()
        .dst_mac(MacAddr([0x33, 0x33, 0, 0, 0, 1]))
        .src_mac(ROUTER)
        .ethertype(EtherType::Ipv6 as u16)
        .payload(&ip)
        .build();

    assert_eq!(h.filter.process_ra(&frame), ProcessRaResult::ZeroLifetime);
    assert_eq!(h.filter.tracked_ras(), 0);
    assert_eq!(h.installer.count(), 0);
}

/// Truncated RAs are counted as parse errors
#[test]
fn test_malformed_ra_is_parse_error() {
    let h = Harness::standard();
    let mut frame = default_ra();
    // option length running past the end of the packet
    frame.truncate(frame.len() - 4);
    assert_eq!(h.filter.process_ra(&frame), ProcessRaResult::ParseError);
    assert_eq!(h.filter.process_ra(&frame[..40]), ProcessRaResult::ParseError);
    assert_eq!(h.filter.tracked_ras(), 0);
}

/// Expired records are purged before new RAs are considered
#[test]
fn test_expired_ras_are_purged() {
    let h = Harness::standard();
    h.filter.process_ra(&ra_frame("fe80::1", "2001:db8:1::", 60));
    assert_eq!(h.filter.tracked_ras(), 1);

    h.clock.advance(61);
    assert_eq!(
        h.filter.process_ra(&ra_frame("fe80::2", "2001:db8:1::", 1800)),
        ProcessRaResult::UpdateNewRa
    );
    assert_eq!(h.filter.tracked_ras(), 1);
}

/// Program size stays within budget; the table never exceeds 10 RAs
#[test]
fn test_program_budget_and_table_cap() {
    let h = Harness::standard();
    let frames: Vec<Vec<u8>> = (0..12)
        .map(|i| ra_frame("fe80::1", &format!("2001:db8:{:x}::", i + 1), 1800))
        .collect();

    for frame in &frames[..10] {
        assert_eq!(h.filter.process_ra(frame), ProcessRaResult::UpdateNewRa);
    }
    assert_eq!(h.filter.process_ra(&frames[10]), ProcessRaResult::Dropped);
    assert_eq!(h.filter.process_ra(&frames[11]), ProcessRaResult::Dropped);
    assert_eq!(h.filter.tracked_ras(), 10);

    let installed = h.filter.last_installed().unwrap();
    assert_eq!(installed.tracked_ras, 10);
    assert!(installed.filtered_ras >= 1);
    assert!(installed.filtered_ras < 10);
    assert!(installed.program.len() <= 1024 - Counter::total_size());

    // oldest entries fill the program first
    assert_eq!(h.verdict(&frames[0], 0), Verdict::Drop);
    assert_eq!(h.verdict(&frames[9], 0), Verdict::Pass);
    assert_eq!(h.verdict(&frames[11], 0), Verdict::Pass);
}

/// A repeat moves its record to the front of the program
#[test]
fn test_repeat_moves_ra_to_front() {
    let h = Harness::standard();
    let frames: Vec<Vec<u8>> = (0..10)
        .map(|i| ra_frame("fe80::1", &format!("2001:db8:{:x}::", i + 1), 1800))
        .collect();
    for frame in &frames {
        h.filter.process_ra(frame);
    }
    assert_eq!(h.verdict(&frames[9], 0), Verdict::Pass);

    // force a reinstall on the repeat
    h.clock.advance(280);
    assert_eq!(h.filter.process_ra(&frames[9]), ProcessRaResult::UpdateExpiry);
    assert_eq!(h.verdict(&frames[9], 0), Verdict::Drop);
}

// ============================================================================
// Other traffic
// ============================================================================

/// Only the first 20 valid blacklist entries take effect
#[test]
fn test_ethertype_blacklist_cap() {
    let config = FilterConfig {
        ethertype_blacklist: (0x0600..0x0600 + 21).collect(),
        ..FilterConfig::default()
    };
    let h = Harness::new(ApfCapabilities::new(4, 1024), config);
    assert_eq!(h.filter.ethertype_blacklist().len(), 20);
    h.filter.set_link_properties(Some((LOCAL_IP, 24)));

    let frame = |ethertype: u16| {
        FrameBuilder::new()
            .dst_mac(MAC)
            .src_mac(ROUTER)
            .ethertype(ethertype)
            .payload(&[0; 46])
            .build()
    };
    let (verdict, ram) = h.run(&frame(0x0600), 0);
    assert_eq!(verdict, Verdict::Drop);
    assert_eq!(decode_counter(&ram, Counter::DroppedEthertypeBlacklisted), Some(1));
    assert_eq!(h.verdict(&frame(0x0613), 0), Verdict::Drop);

    let (verdict, ram) = h.run(&frame(0x0614), 0);
    assert_eq!(verdict, Verdict::Pass);
    assert_eq!(decode_counter(&ram, Counter::PassedNonIpUnicast), Some(1));
}

/// Without a data region the program has no counters and decides the same
#[test]
fn test_no_counter_profile() {
    let counted = Harness::standard();
    let plain = Harness::new(ApfCapabilities::new(3, 1024), FilterConfig::default());
    let ra = default_ra();
    counted.filter.process_ra(&ra);
    plain.filter.process_ra(&ra);

    assert!(plain.program().len() < counted.program().len());
    let (verdict, ram) = plain.run(&ra, 0);
    assert_eq!(verdict, Verdict::Drop);
    assert!(ram[plain.program().len()..].iter().all(|b| *b == 0));

    let broadcast = FrameBuilder::new()
        .dst_mac(MacAddr::BROADCAST)
        .src_mac(ROUTER)
        .ethertype(0x88cc)
        .payload(&[0; 46])
        .build();
    assert_eq!(plain.verdict(&broadcast, 0), Verdict::Drop);
    assert_eq!(counted.verdict(&broadcast, 0), Verdict::Drop);
    assert!(plain.filter.dump().contains("APF counters not supported"));
}

/// Multicast toggles change IPv4 and IPv6 multicast decisions
#[test]
fn test_multicast_toggle() {
    let h = Harness::standard();
    h.filter.set_link_properties(Some((LOCAL_IP, 24)));

    let udp = UdpBuilder::new().src_port(5353).dst_port(5353).payload(&[0; 12]).build();
    let ip = Ipv6Builder::new()
        .next_header(NextHeader::Udp as u8)
        .src_addr("fe80::9".parse().unwrap())
        .dst_addr("ff02::fb".parse::<Ipv6Addr>().unwrap())
        .payload(&udp)
        .build();
    let mdns = FrameBuilder::new()
        .dst_mac(MacAddr([0x33, 0x33, 0, 0, 0, 0xfb]))
        .src_mac(ROUTER)
        .ethertype(EtherType::Ipv6 as u16)
        .payload(&ip)
        .build();

    assert_eq!(h.verdict(&mdns, 0), Verdict::Drop);
    h.filter.set_multicast_filter(false);
    assert_eq!(h.verdict(&mdns, 0), Verdict::Pass);
    assert!(h.filter.dump().contains("Multicast: ALLOW"));
    assert_eq!(h.filter.metrics().program_updates_allowing_multicast.get(), 1);
}

/// Doze mode drops multicast echo requests until it is left again
#[test]
fn test_doze_mode_toggle() {
    let h = Harness::standard();
    let ip = Ipv6Builder::new()
        .next_header(NextHeader::Icmpv6 as u8)
        .src_addr("fe80::9".parse().unwrap())
        .dst_addr(ipv6::ALL_NODES_ADDRESS)
        .payload(&[128, 0, 0, 0, 0, 0, 0, 0])
        .build();
    let ping = FrameBuilder::new()
        .dst_mac(MacAddr([0x33, 0x33, 0, 0, 0, 1]))
        .src_mac(ROUTER)
        .ethertype(EtherType::Ipv6 as u16)
        .payload(&ip)
        .build();

    h.filter.set_doze_mode(true);
    assert!(h.filter.in_doze_mode());
    assert!(h.filter.dump().contains("Doze mode: ON"));
    let (verdict, ram) = h.run(&ping, 0);
    assert_eq!(verdict, Verdict::Drop);
    assert_eq!(decode_counter(&ram, Counter::DroppedIpv6NonIcmpMulticast), Some(1));

    h.filter.set_doze_mode(false);
    assert!(!h.filter.in_doze_mode());
    assert_eq!(h.verdict(&ping, 0), Verdict::Pass);
}

// ============================================================================
// Keepalive filters
// ============================================================================

/// Registering a taken slot fails and leaves the first filter in place
#[test]
fn test_duplicate_keepalive_slot() {
    let h = Harness::standard();
    h.filter.set_link_properties(Some((LOCAL_IP, 24)));
    let first = tcp_keepalive(40000, 1000, 5000);
    let second = tcp_keepalive(40001, 2000, 6000);

    h.filter.add_tcp_keepalive_filter(3, &first).unwrap();
    let installs = h.installer.count();
    assert!(matches!(
        h.filter.add_tcp_keepalive_filter(3, &second),
        Err(Error::SlotOccupied(3))
    ));
    assert_eq!(h.installer.count(), installs);

    let (verdict, ram) = h.run(&tcp_ack_frame(&first), 0);
    assert_eq!(verdict, Verdict::Drop);
    assert_eq!(decode_counter(&ram, Counter::DroppedIpv4KeepaliveAck), Some(1));
    assert_eq!(h.verdict(&tcp_ack_frame(&second), 0), Verdict::Pass);

    let dump = h.filter.dump();
    assert!(dump.contains("Slot 3: 192.168.1.1:443 -> 192.168.1.10:40000 , seq=5000, ack=1001"));

    h.filter.remove_keepalive_filter(3);
    assert_eq!(h.verdict(&tcp_ack_frame(&first), 0), Verdict::Pass);
    h.filter.add_tcp_keepalive_filter(3, &second).unwrap();
    assert_eq!(h.verdict(&tcp_ack_frame(&second), 0), Verdict::Drop);
}

/// IPv6 TCP keepalives and non-IPv4 NAT-T keepalives are rejected
#[test]
fn test_keepalive_validation() {
    let h = Harness::standard();
    let v6 = TcpKeepalivePacket {
        src_address: "2001:db8::2".parse().unwrap(),
        dst_address: "2001:db8::1".parse().unwrap(),
        ..tcp_keepalive(40000, 1, 1)
    };
    assert!(matches!(
        h.filter.add_tcp_keepalive_filter(1, &v6),
        Err(Error::Unsupported(_))
    ));

    let natt = NattKeepalivePacket {
        src_address: "2001:db8::2".parse().unwrap(),
        src_port: 4500,
        dst_address: "2001:db8::1".parse().unwrap(),
        dst_port: 4500,
    };
    assert!(matches!(
        h.filter.add_natt_keepalive_filter(1, &natt),
        Err(Error::InvalidKeepalive(_))
    ));
    assert_eq!(h.installer.count(), 0);
    assert!(h.filter.last_installed().is_none());
}

/// NAT-T keepalives from the peer are dropped, ESP on the same ports is not
#[test]
fn test_natt_keepalive_dropped() {
    let h = Harness::standard();
    h.filter.set_link_properties(Some((LOCAL_IP, 24)));
    let sent = NattKeepalivePacket {
        src_address: IpAddr::V4(LOCAL_IP),
        src_port: 4500,
        dst_address: IpAddr::V4(GATEWAY_IP),
        dst_port: 4500,
    };
    h.filter.add_natt_keepalive_filter(7, &sent).unwrap();

    let keepalive = UdpBuilder::new()
        .src_port(4500)
        .dst_port(4500)
        .payload(&[udp::NATT_KEEPALIVE_PAYLOAD])
        .build();
    let (verdict, ram) = h.run(&ipv4_frame(Protocol::Udp, &keepalive), 0);
    assert_eq!(verdict, Verdict::Drop);
    assert_eq!(decode_counter(&ram, Counter::DroppedIpv4NattKeepalive), Some(1));

    let esp = UdpBuilder::new()
        .src_port(4500)
        .dst_port(4500)
        .payload(&[0, 0, 0, 1, 0, 0, 0, 1])
        .build();
    assert_eq!(h.verdict(&ipv4_frame(Protocol::Udp, &esp), 0), Verdict::Pass);
    assert!(h.filter.dump().contains("Slot 7: 192.168.1.1:4500 -> 192.168.1.10:4500"));
}

// ============================================================================
// Receive loop
// ============================================================================

/// Frames from the capture are processed until shutdown
#[tokio::test]
async fn test_receive_loop() {
    let h = Harness::standard();
    let (tx, rx) = mpsc::channel(16);

    h.filter.start_with_capture(ChannelCapture { rx });
    assert!(h.filter.is_running());

    // memory reset, then the basic program
    let installs = h.installer.all();
    assert_eq!(installs.len(), 2);
    assert_eq!(installs[0], vec![0u8; 1024]);
    assert!(h.filter.last_installed().is_some());

    let ra = default_ra();
    tx.send(ra.clone()).await.unwrap();
    tx.send(ra.clone()).await.unwrap();
    tx.send(vec![0u8; 60]).await.unwrap();

    let metrics = h.filter.metrics();
    wait_for(|| metrics.ra.received.get() == 3).await;
    assert_eq!(metrics.ra.matching.get(), 1);
    assert_eq!(metrics.ra.parse_errors.get(), 1);
    assert_eq!(metrics.ra.program_updates.get(), 1);
    assert_eq!(h.filter.tracked_ras(), 1);
    assert!(h.filter.dump().contains("Receive thread: RUNNING"));

    h.filter.shutdown();
    assert!(!h.filter.is_running());
    assert_eq!(h.filter.tracked_ras(), 0);
    assert!(h.filter.dump().contains("Receive thread: STOPPED"));
}

/// A transient read error is logged and the loop keeps reading
#[tokio::test]
async fn test_receive_loop_survives_transient_error() {
    let h = Harness::standard();
    let (tx, rx) = mpsc::channel(4);
    h.filter.start_with_capture(FlakyCapture {
        failed: false,
        inner: ChannelCapture { rx },
    });

    tx.send(default_ra()).await.unwrap();
    let metrics = h.filter.metrics();
    wait_for(|| metrics.ra.received.get() == 1).await;
    assert!(h.filter.is_running());
    assert_eq!(h.filter.tracked_ras(), 1);
    assert_eq!(metrics.ra.program_updates.get(), 1);

    h.filter.shutdown();
    assert!(!h.filter.is_running());
}

/// A closed capture ends the loop
#[tokio::test]
async fn test_receive_loop_ends_when_capture_closed() {
    let h = Harness::standard();
    let (tx, rx) = mpsc::channel(1);
    h.filter.start_with_capture(ChannelCapture { rx });
    drop(tx);

    let filter = h.filter.clone();
    wait_for(|| !filter.is_running()).await;

    // can be started again
    let (_tx, rx) = mpsc::channel(1);
    h.filter.start_with_capture(ChannelCapture { rx });
    assert!(h.filter.is_running());
    h.filter.shutdown();
}
