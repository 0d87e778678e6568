//! Packet counters kept in the APF data region
//!
//! Counters are 32-bit big-endian words stored backwards from the end of the
//! data region: counter `n` lives at `ram_len - 4 * n`. Ordinal 0 is a
//! reserved out-of-bounds slot and is never written.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    ReservedOob,
    TotalPackets,
    PassedArp,
    PassedDhcp,
    PassedIpv4,
    PassedIpv6NonIcmp,
    PassedIpv4Unicast,
    PassedIpv6Icmp,
    PassedIpv6UnicastNonIcmp,
    PassedArpNonIpv4,
    PassedArpUnknown,
    PassedArpUnicastReply,
    PassedNonIpUnicast,
    DroppedEthBroadcast,
    DroppedRa,
    DroppedGarpReply,
    DroppedArpOtherHost,
    DroppedIpv4L2Broadcast,
    DroppedIpv4BroadcastAddr,
    DroppedIpv4BroadcastNet,
    DroppedIpv4Multicast,
    DroppedIpv6RouterSolicitation,
    DroppedIpv6MulticastNa,
    DroppedIpv6Multicast,
    DroppedIpv6MulticastPing,
    DroppedIpv6NonIcmpMulticast,
    Dropped8023Frame,
    DroppedEthertypeBlacklisted,
    DroppedArpReplySpaNoHost,
    DroppedIpv4KeepaliveAck,
    DroppedIpv6KeepaliveAck,
    DroppedIpv4NattKeepalive,
}

impl Counter {
    /// Every counter in ordinal order.
    pub const ALL: [Counter; 32] = [
        Counter::ReservedOob,
        Counter::TotalPackets,
        Counter::PassedArp,
        Counter::PassedDhcp,
        Counter::PassedIpv4,
        Counter::PassedIpv6NonIcmp,
        Counter::PassedIpv4Unicast,
        Counter::PassedIpv6Icmp,
        Counter::PassedIpv6UnicastNonIcmp,
        Counter::PassedArpNonIpv4,
        Counter::PassedArpUnknown,
        Counter::PassedArpUnicastReply,
        Counter::PassedNonIpUnicast,
        Counter::DroppedEthBroadcast,
        Counter::DroppedRa,
        Counter::DroppedGarpReply,
        Counter::DroppedArpOtherHost,
        Counter::DroppedIpv4L2Broadcast,
        Counter::DroppedIpv4BroadcastAddr,
        Counter::DroppedIpv4BroadcastNet,
        Counter::DroppedIpv4Multicast,
        Counter::DroppedIpv6RouterSolicitation,
        Counter::DroppedIpv6MulticastNa,
        Counter::DroppedIpv6Multicast,
        Counter::DroppedIpv6MulticastPing,
        Counter::DroppedIpv6NonIcmpMulticast,
        Counter::Dropped8023Frame,
        Counter::DroppedEthertypeBlacklisted,
        Counter::DroppedArpReplySpaNoHost,
        Counter::DroppedIpv4KeepaliveAck,
        Counter::DroppedIpv6KeepaliveAck,
        Counter::DroppedIpv4NattKeepalive,
    ];

    pub fn ordinal(self) -> usize {
        self as usize
    }

    /// Offset relative to the end of the data region.
    pub fn offset(self) -> i32 {
        -(self.ordinal() as i32) * 4
    }

    /// Bytes needed at the end of the data region for all counters.
    pub fn total_size() -> usize {
        (Self::ALL.len() - 1) * 4
    }

    pub fn name(self) -> &'static str {
        match self {
            Counter::ReservedOob => "RESERVED_OOB",
            Counter::TotalPackets => "TOTAL_PACKETS",
            Counter::PassedArp => "PASSED_ARP",
            Counter::PassedDhcp => "PASSED_DHCP",
            Counter::PassedIpv4 => "PASSED_IPV4",
            Counter::PassedIpv6NonIcmp => "PASSED_IPV6_NON_ICMP",
            Counter::PassedIpv4Unicast => "PASSED_IPV4_UNICAST",
            Counter::PassedIpv6Icmp => "PASSED_IPV6_ICMP",
            Counter::PassedIpv6UnicastNonIcmp => "PASSED_IPV6_UNICAST_NON_ICMP",
            Counter::PassedArpNonIpv4 => "PASSED_ARP_NON_IPV4",
            Counter::PassedArpUnknown => "PASSED_ARP_UNKNOWN",
            Counter::PassedArpUnicastReply => "PASSED_ARP_UNICAST_REPLY",
            Counter::PassedNonIpUnicast => "PASSED_NON_IP_UNICAST",
            Counter::DroppedEthBroadcast => "DROPPED_ETH_BROADCAST",
            Counter::DroppedRa => "DROPPED_RA",
            Counter::DroppedGarpReply => "DROPPED_GARP_REPLY",
            Counter::DroppedArpOtherHost => "DROPPED_ARP_OTHER_HOST",
            Counter::DroppedIpv4L2Broadcast => "DROPPED_IPV4_L2_BROADCAST",
            Counter::DroppedIpv4BroadcastAddr => "DROPPED_IPV4_BROADCAST_ADDR",
            Counter::DroppedIpv4BroadcastNet => "DROPPED_IPV4_BROADCAST_NET",
            Counter::DroppedIpv4Multicast => "DROPPED_IPV4_MULTICAST",
            Counter::DroppedIpv6RouterSolicitation => "DROPPED_IPV6_ROUTER_SOLICITATION",
            Counter::DroppedIpv6MulticastNa => "DROPPED_IPV6_MULTICAST_NA",
            Counter::DroppedIpv6Multicast => "DROPPED_IPV6_MULTICAST",
            Counter::DroppedIpv6MulticastPing => "DROPPED_IPV6_MULTICAST_PING",
            Counter::DroppedIpv6NonIcmpMulticast => "DROPPED_IPV6_NON_ICMP_MULTICAST",
            Counter::Dropped8023Frame => "DROPPED_802_3_FRAME",
            Counter::DroppedEthertypeBlacklisted => "DROPPED_ETHERTYPE_BLACKLISTED",
            Counter::DroppedArpReplySpaNoHost => "DROPPED_ARP_REPLY_SPA_NO_HOST",
            Counter::DroppedIpv4KeepaliveAck => "DROPPED_IPV4_KEEPALIVE_ACK",
            Counter::DroppedIpv6KeepaliveAck => "DROPPED_IPV6_KEEPALIVE_ACK",
            Counter::DroppedIpv4NattKeepalive => "DROPPED_IPV4_NATT_KEEPALIVE",
        }
    }

    /// Look a counter up by its dump name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Read a counter from a data region snapshot.
///
/// Returns `None` when the counter falls outside the snapshot.
pub fn decode_counter(data: &[u8], counter: Counter) -> Option<u32> {
    let offset = counter.offset();
    let start = if offset < 0 {
        data.len().checked_sub(offset.unsigned_abs() as usize)?
    } else {
        offset as usize
    };
    let bytes = data.get(start..start.checked_add(4)?)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Non-zero counters in a snapshot, in ordinal order.
pub fn nonzero_counters(data: &[u8]) -> Vec<(Counter, u32)> {
    Counter::ALL
        .iter()
        .skip(1)
        .filter_map(|&c| decode_counter(data, c).filter(|v| *v != 0).map(|v| (c, v)))
        .collect()
}
