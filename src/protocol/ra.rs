//! Router Advertisement records
//!
//! An [`RaRecord`] splits a captured RA frame into sections: bytes that must
//! match exactly, bytes that are ignored (flow label, checksum) and lifetime
//! fields. A repeat of the same RA is recognized even after its lifetimes
//! have counted down or its checksum changed.

use std::fmt;
use std::fmt::Write as _;
use std::net::Ipv6Addr;

use super::ethernet;
use super::icmpv6::{self, Icmpv6Type, NdpOptionType};
use super::ipv6::{self, NextHeader};
use super::EtherType;
use crate::{Error, Result};

/// Maximum number of distinct RAs tracked at once.
pub const MAX_RAS: usize = 10;
/// RA blocks stay valid for this fraction of the remaining lifetime.
pub const FRACTION_OF_LIFETIME_TO_FILTER: i64 = 6;

/// What a section of the captured packet means to the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// Must be byte-for-byte identical.
    Match,
    /// Free to change between repeats.
    Ignore,
    /// A lifetime field. `option` is the RA option type, or 0 for the
    /// router lifetime.
    Lifetime { option: u8, value: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketSection {
    pub kind: SectionKind,
    pub offset: usize,
    pub length: usize,
}

impl PacketSection {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.length
    }
}

fn read_uint(packet: &[u8], at: usize, len: usize) -> Option<u32> {
    let bytes = packet.get(at..at.checked_add(len)?)?;
    Some(bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

/// Walks the packet front to back, emitting contiguous sections.
struct SectionWriter<'a> {
    packet: &'a [u8],
    position: usize,
    sections: Vec<PacketSection>,
}

impl<'a> SectionWriter<'a> {
    fn new(packet: &'a [u8]) -> Self {
        Self {
            packet,
            position: 0,
            sections: Vec::new(),
        }
    }

    fn push(&mut self, kind: SectionKind, length: usize) -> Result<()> {
        let end = self
            .position
            .checked_add(length)
            .filter(|end| *end <= self.packet.len())
            .ok_or_else(|| {
                Error::InvalidRa(format!(
                    "{} byte section at {} overruns {} byte packet",
                    length,
                    self.position,
                    self.packet.len()
                ))
            })?;
        self.sections.push(PacketSection {
            kind,
            offset: self.position,
            length,
        });
        self.position = end;
        Ok(())
    }

    /// Zero-length matches are skipped; they would compile to a JNEBS that
    /// always passes.
    fn add_match(&mut self, length: usize) -> Result<()> {
        if length == 0 {
            return Ok(());
        }
        self.push(SectionKind::Match, length)
    }

    fn add_match_until(&mut self, end: u32) -> Result<()> {
        let length = (end as usize)
            .checked_sub(self.position)
            .ok_or_else(|| Error::InvalidRa(format!("position {} past {}", self.position, end)))?;
        self.add_match(length)
    }

    fn add_ignore(&mut self, length: usize) -> Result<()> {
        self.push(SectionKind::Ignore, length)
    }

    fn add_lifetime(&mut self, option: u8, length: usize) -> Result<u32> {
        let value = read_uint(self.packet, self.position, length)
            .ok_or_else(|| Error::InvalidRa(format!("truncated lifetime at {}", self.position)))?;
        self.push(SectionKind::Lifetime { option, value }, length)?;
        Ok(value)
    }

    /// RDNSS, RIO and DNSSL share a 4-byte lifetime at offset 4.
    fn add_4_byte_lifetime_option(&mut self, option: u8, option_len: usize) -> Result<u32> {
        let fixed = icmpv6::OPTION_LIFETIME_OFFSET + icmpv6::OPTION_LIFETIME_LEN;
        if option_len < fixed {
            return Err(Error::InvalidRa(format!(
                "option {} too short: {} bytes",
                option, option_len
            )));
        }
        self.add_match(icmpv6::OPTION_LIFETIME_OFFSET)?;
        let lifetime = self.add_lifetime(option, icmpv6::OPTION_LIFETIME_LEN)?;
        self.add_match(option_len - fixed)?;
        Ok(lifetime)
    }
}

/// A tracked Router Advertisement
#[derive(Debug, Clone)]
pub struct RaRecord {
    packet: Vec<u8>,
    sections: Vec<PacketSection>,
    prefix_option_offsets: Vec<usize>,
    rdnss_option_offsets: Vec<usize>,
    rio_option_offsets: Vec<usize>,
    min_rdnss_lifetime: u32,
    min_lifetime: u32,
    last_seen: u64,
    seen_count: u32,
}

impl RaRecord {
    /// Parse a captured RA frame seen at `now` (monotonic seconds).
    ///
    /// Non-zero RDNSS lifetimes below `min_rdnss_lifetime` do not count
    /// towards the record's minimum lifetime.
    pub fn parse(packet: &[u8], now: u64, min_rdnss_lifetime: u32) -> Result<Self> {
        if packet.len() < icmpv6::RA_OPTION_OFFSET as usize {
            return Err(Error::InvalidRa(format!(
                "too short for an RA: {} bytes",
                packet.len()
            )));
        }
        if ethernet::ethertype(packet) != Some(EtherType::Ipv6 as u16)
            || packet[ipv6::NEXT_HEADER_OFFSET as usize] != NextHeader::Icmpv6 as u8
            || packet[icmpv6::TYPE_OFFSET as usize] != Icmpv6Type::RouterAdvertisement as u8
        {
            return Err(Error::InvalidRa("not an ICMPv6 router advertisement".into()));
        }

        let mut writer = SectionWriter::new(packet);
        writer.add_match_until(ipv6::FLOW_LABEL_OFFSET)?;
        writer.add_ignore(ipv6::FLOW_LABEL_LEN as usize)?;
        writer.add_match_until(icmpv6::CHECKSUM_OFFSET)?;
        writer.add_ignore(icmpv6::CHECKSUM_LEN as usize)?;
        writer.add_match_until(icmpv6::RA_ROUTER_LIFETIME_OFFSET)?;
        writer.add_lifetime(0, icmpv6::RA_ROUTER_LIFETIME_LEN as usize)?;
        // reachable time and retransmit timer
        writer.add_match_until(icmpv6::RA_OPTION_OFFSET)?;

        let mut prefix_option_offsets = Vec::new();
        let mut rdnss_option_offsets = Vec::new();
        let mut rio_option_offsets = Vec::new();

        while writer.position < packet.len() {
            let position = writer.position;
            let header = packet
                .get(position..position + 2)
                .ok_or_else(|| Error::InvalidRa(format!("truncated option at {}", position)))?;
            let option_type = header[0];
            let option_len = usize::from(header[1]) * 8;
            if option_len == 0 {
                return Err(Error::InvalidRa(format!(
                    "invalid option length opt={} len=0",
                    option_type
                )));
            }
            if position + option_len > packet.len() {
                return Err(Error::InvalidRa(format!(
                    "option {} at {} overruns packet",
                    option_type, position
                )));
            }

            match NdpOptionType::from_u8(option_type) {
                Some(NdpOptionType::PrefixInformation) => {
                    if option_len < icmpv6::PIO_LEN {
                        return Err(Error::InvalidRa(format!(
                            "prefix option too short: {} bytes",
                            option_len
                        )));
                    }
                    prefix_option_offsets.push(position);
                    writer.add_match(4)?;
                    writer.add_lifetime(option_type, 4)?; // valid
                    writer.add_lifetime(option_type, 4)?; // preferred
                    writer.add_match(4)?; // reserved
                    writer.add_match(16)?; // prefix
                    writer.add_match(option_len - icmpv6::PIO_LEN)?;
                }
                Some(kind) => {
                    match kind {
                        NdpOptionType::Rdnss => rdnss_option_offsets.push(position),
                        NdpOptionType::RouteInformation => rio_option_offsets.push(position),
                        _ => {}
                    }
                    writer.add_4_byte_lifetime_option(option_type, option_len)?;
                }
                // unknown options still have to repeat verbatim
                None => writer.add_match(option_len)?,
            }
        }

        let mut record = Self {
            packet: packet.to_vec(),
            sections: writer.sections,
            prefix_option_offsets,
            rdnss_option_offsets,
            rio_option_offsets,
            min_rdnss_lifetime,
            min_lifetime: 0,
            last_seen: now,
            seen_count: 0,
        };
        record.min_lifetime = record.compute_min_lifetime();
        Ok(record)
    }

    pub fn packet(&self) -> &[u8] {
        &self.packet
    }

    pub fn len(&self) -> usize {
        self.packet.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packet.is_empty()
    }

    pub fn sections(&self) -> &[PacketSection] {
        &self.sections
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    pub fn seen_count(&self) -> u32 {
        self.seen_count
    }

    /// Whether a lifetime section counts towards the minimum lifetime and
    /// gets checked by the compiled filter.
    pub fn is_relevant_lifetime(&self, section: &PacketSection) -> bool {
        match section.kind {
            SectionKind::Lifetime { option, value } => {
                !(option == NdpOptionType::Rdnss as u8
                    && value != 0
                    && value < self.min_rdnss_lifetime)
            }
            _ => false,
        }
    }

    /// Minimum over the relevant stored lifetime sections.
    fn compute_min_lifetime(&self) -> u32 {
        self.sections
            .iter()
            .filter(|s| self.is_relevant_lifetime(s))
            .filter_map(|s| match s.kind {
                SectionKind::Lifetime { value, .. } => Some(value),
                _ => None,
            })
            .min()
            .unwrap_or(u32::MAX)
    }

    /// Compare the `Match` sections of `frame` against this RA.
    pub fn matches(&self, frame: &[u8]) -> bool {
        frame.len() == self.packet.len()
            && self
                .sections
                .iter()
                .filter(|s| s.kind == SectionKind::Match)
                .all(|s| frame.get(s.range()) == self.packet.get(s.range()))
    }

    pub fn min_lifetime(&self) -> u32 {
        self.min_lifetime
    }

    /// Seconds left before the shortest lifetime runs out.
    pub fn current_lifetime(&self, now: u64) -> i64 {
        let elapsed = i64::try_from(now.saturating_sub(self.last_seen)).unwrap_or(i64::MAX);
        i64::from(self.min_lifetime) - elapsed
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.current_lifetime(now) <= 0
    }

    /// How long a filter generated at `now` may keep dropping this RA.
    pub fn filter_lifetime(&self, now: u64) -> u32 {
        (self.current_lifetime(now) / FRACTION_OF_LIFETIME_TO_FILTER).clamp(0, i64::from(u32::MAX))
            as u32
    }

    /// Record a repeat observation at `now`. Lifetimes stay those of the
    /// first capture.
    pub fn refresh(&mut self, now: u64) {
        self.last_seen = now;
        self.min_lifetime = self.compute_min_lifetime();
        self.seen_count = self.seen_count.saturating_add(1);
    }

    pub fn router_lifetime(&self) -> u32 {
        read_uint(&self.packet, icmpv6::RA_ROUTER_LIFETIME_OFFSET as usize, 2).unwrap_or(0)
    }

    fn uint_at(&self, at: usize, len: usize) -> u32 {
        read_uint(&self.packet, at, len).unwrap_or(0)
    }

    fn address_at(&self, at: usize) -> String {
        self.packet
            .get(at..at + 16)
            .and_then(|b| <[u8; 16]>::try_from(b).ok())
            .map(|octets| Ipv6Addr::from(octets).to_string())
            .unwrap_or_else(|| "???".into())
    }

    fn write_prefix_option(&self, out: &mut String, offset: usize) {
        let _ = write!(
            out,
            "{}/{} {}s/{}s ",
            self.address_at(offset + 16),
            self.uint_at(offset + 2, 1),
            self.uint_at(offset + 4, 4),
            self.uint_at(offset + 8, 4)
        );
    }

    fn write_rdnss_option(&self, out: &mut String, offset: usize) {
        let option_len = self.uint_at(offset + 1, 1) as usize * 8;
        if option_len < 24 {
            return;
        }
        let _ = write!(out, "DNS {}s", self.uint_at(offset + 4, 4));
        for server in 0..(option_len - 8) / 16 {
            let _ = write!(out, " {}", self.address_at(offset + 8 + 16 * server));
        }
        out.push(' ');
    }

    fn write_rio_option(&self, out: &mut String, offset: usize) {
        let option_len = self.uint_at(offset + 1, 1) as usize * 8;
        if !(8..=24).contains(&option_len) {
            return;
        }
        let mut prefix = [0u8; 16];
        if let Some(bytes) = self.packet.get(offset + 8..offset + option_len) {
            prefix[..bytes.len()].copy_from_slice(bytes);
        }
        let _ = write!(
            out,
            "RIO {}s {}/{} ",
            self.uint_at(offset + 4, 4),
            Ipv6Addr::from(prefix),
            self.uint_at(offset + 2, 1)
        );
    }
}

impl fmt::Display for RaRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = format!(
            "RA {} -> {} {}s ",
            self.address_at(ipv6::SRC_ADDR_OFFSET as usize),
            self.address_at(ipv6::DEST_ADDR_OFFSET as usize),
            self.router_lifetime()
        );
        for &offset in &self.prefix_option_offsets {
            self.write_prefix_option(&mut out, offset);
        }
        for &offset in &self.rdnss_option_offsets {
            self.write_rdnss_option(&mut out, offset);
        }
        for &offset in &self.rio_option_offsets {
            self.write_rio_option(&mut out, offset);
        }
        f.write_str(out.trim_end())
    }
}
