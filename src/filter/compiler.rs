//! Filter program compiler
//!
//! Turns the current filter state into an APF program:
//!
//! ```text
//! prologue   ethertype checks, ARP, IPv4 and IPv6 sub-filters
//! RA blocks  one per tracked RA, most recently seen first
//! epilogue   counting trampolines (APFv4 only)
//! ```
//!
//! Every sub-filter ends in PASS or DROP except ICMPv6, which falls through
//! to the RA blocks and finally off the end of the program (PASS).

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use super::keepalive::KeepaliveFilter;
use crate::apf::generator::{FILTER_AGE_MEMORY_SLOT, IPV4_HEADER_SIZE_MEMORY_SLOT, PACKET_SIZE_MEMORY_SLOT};
use crate::apf::{ApfGenerator, Counter, Label, Register};
use crate::config::ApfCapabilities;
use crate::protocol::ipv4::Protocol;
use crate::protocol::ipv6::NextHeader;
use crate::protocol::ra::{RaRecord, SectionKind};
use crate::protocol::{arp, ethernet, icmpv6, ipv4, ipv6, udp};
use crate::protocol::{EtherType, MacAddr};
use crate::{Error, Result};

/// Generator plus the labels every sub-filter jumps to
pub(crate) struct ProgramBuilder {
    gen: ApfGenerator,
    counters: bool,
    count_and_pass: Label,
    count_and_drop: Label,
}

impl ProgramBuilder {
    fn new(capabilities: &ApfCapabilities) -> Result<Self> {
        let mut gen = ApfGenerator::new(capabilities.apf_version)?;
        let counters = capabilities.has_data_access();
        // Without counters the trampolines are PASS and DROP themselves.
        let (count_and_pass, count_and_drop) = if counters {
            (gen.new_label(), gen.new_label())
        } else {
            (Label::Pass, Label::Drop)
        };
        Ok(Self {
            gen,
            counters,
            count_and_pass,
            count_and_drop,
        })
    }

    pub(crate) fn gen(&mut self) -> &mut ApfGenerator {
        &mut self.gen
    }

    pub(crate) fn count_and_pass(&self) -> Label {
        self.count_and_pass
    }

    pub(crate) fn count_and_drop(&self) -> Label {
        self.count_and_drop
    }

    /// Point R1 at `counter` for the next trampoline jump.
    pub(crate) fn setup_counter(&mut self, counter: Counter) {
        if self.counters {
            self.gen.add_load_immediate(Register::R1, counter.offset());
        }
    }

    /// `data[R1] += 1`
    fn increment_counter(&mut self) -> Result<()> {
        self.gen.add_load_data(Register::R0, 0)?;
        self.gen.add_add(1);
        self.gen.add_store_data(Register::R0, 0)?;
        Ok(())
    }

    fn estimate(&self) -> usize {
        self.gen.program_length_over_estimate()
    }

    fn generate(self) -> Result<Vec<u8>> {
        self.gen.generate()
    }
}

/// Everything the program depends on besides the RA table
#[derive(Debug, Clone, Copy)]
pub struct FilterInputs<'a> {
    pub mac: MacAddr,
    pub multicast_filter: bool,
    pub in_doze_mode: bool,
    pub drop_802_3_frames: bool,
    pub ethertype_blacklist: &'a [u16],
    pub ipv4_address: Option<(Ipv4Addr, u8)>,
    pub keepalives: &'a BTreeMap<u32, KeepaliveFilter>,
}

/// Output of one compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledProgram {
    pub program: Vec<u8>,
    /// Seconds the program stays valid; `u64::MAX` without RA blocks.
    pub min_lifetime: u64,
    /// RAs that made it into the program, from the front of the table.
    pub filtered_ras: usize,
}

#[derive(Debug, Clone)]
pub struct FilterCompiler {
    capabilities: ApfCapabilities,
}

impl FilterCompiler {
    pub fn new(capabilities: ApfCapabilities) -> Self {
        Self { capabilities }
    }

    pub fn capabilities(&self) -> &ApfCapabilities {
        &self.capabilities
    }

    /// Program bytes available once the counters are reserved.
    pub fn program_budget(&self) -> usize {
        let reserved = if self.capabilities.has_data_access() {
            Counter::total_size()
        } else {
            0
        };
        self.capabilities.max_program_size.saturating_sub(reserved)
    }

    /// Compile a program holding as many of `ras` as fit, in order.
    pub fn compile(
        &self,
        inputs: &FilterInputs<'_>,
        ras: &[RaRecord],
        now: u64,
    ) -> Result<CompiledProgram> {
        let budget = self.program_budget();

        // Pass 1: size the RA blocks against the budget. The epilogue goes
        // in first so the estimate includes it.
        let mut builder = self.emit_prologue(inputs)?;
        self.emit_epilogue(&mut builder)?;
        let base = builder.estimate();
        if base > budget {
            return Err(Error::ProgramTooLarge {
                size: base,
                max: budget,
            });
        }
        let mut filtered_ras = 0;
        for ra in ras {
            self.emit_ra(&mut builder, ra, now)?;
            if builder.estimate() > budget {
                break;
            }
            filtered_ras += 1;
        }

        // Pass 2: the real program
        let mut builder = self.emit_prologue(inputs)?;
        let mut min_lifetime = u64::MAX;
        for ra in &ras[..filtered_ras] {
            let lifetime = self.emit_ra(&mut builder, ra, now)?;
            min_lifetime = min_lifetime.min(u64::from(lifetime));
        }
        self.emit_epilogue(&mut builder)?;
        let program = builder.generate()?;

        Ok(CompiledProgram {
            program,
            min_lifetime,
            filtered_ras,
        })
    }

    fn emit_prologue(&self, inputs: &FilterInputs<'_>) -> Result<ProgramBuilder> {
        let mut b = ProgramBuilder::new(&self.capabilities)?;
        let pass = b.count_and_pass();
        let drop = b.count_and_drop();

        if b.counters {
            b.setup_counter(Counter::TotalPackets);
            b.increment_counter()?;
        }

        b.gen.add_load16(Register::R0, ethernet::ETHERTYPE_OFFSET);

        if inputs.drop_802_3_frames {
            b.setup_counter(Counter::Dropped8023Frame);
            b.gen
                .add_jump_if_r0_less_than(u32::from(ethernet::ETH_TYPE_MIN), drop);
        }

        b.setup_counter(Counter::DroppedEthertypeBlacklisted);
        for &ethertype in inputs.ethertype_blacklist {
            b.gen.add_jump_if_r0_equals(u32::from(ethertype), drop);
        }

        let skip_arp = b.gen.new_label();
        b.gen
            .add_jump_if_r0_not_equals(EtherType::Arp as u32, skip_arp);
        self.emit_arp(&mut b, inputs)?;
        b.gen.define_label(skip_arp)?;

        // R0 still holds the ethertype: the ARP filter never falls through.
        let skip_ipv4 = b.gen.new_label();
        b.gen
            .add_jump_if_r0_not_equals(EtherType::Ipv4 as u32, skip_ipv4);
        self.emit_ipv4(&mut b, inputs)?;
        b.gen.define_label(skip_ipv4)?;

        let ipv6_filter = b.gen.new_label();
        b.gen
            .add_jump_if_r0_equals(EtherType::Ipv6 as u32, ipv6_filter);

        // Non-IP: drop broadcasts, pass the rest
        b.gen
            .add_load_immediate(Register::R0, ethernet::DEST_ADDR_OFFSET as i32);
        b.setup_counter(Counter::PassedNonIpUnicast);
        b.gen
            .add_jump_if_bytes_not_equal(Register::R0, &MacAddr::BROADCAST.0, pass)?;
        b.setup_counter(Counter::DroppedEthBroadcast);
        b.gen.add_jump(drop);

        b.gen.define_label(ipv6_filter)?;
        self.emit_ipv6(&mut b, inputs)?;
        Ok(b)
    }

    fn emit_arp(&self, b: &mut ProgramBuilder, inputs: &FilterInputs<'_>) -> Result<()> {
        let pass = b.count_and_pass();
        let drop = b.count_and_drop();
        let check_target = b.gen.new_label();

        b.gen
            .add_load_immediate(Register::R0, arp::HEADER_OFFSET as i32);
        b.setup_counter(Counter::PassedArpNonIpv4);
        b.gen
            .add_jump_if_bytes_not_equal(Register::R0, &arp::IPV4_HEADER, pass)?;

        b.gen.add_load16(Register::R0, arp::OPCODE_OFFSET);
        b.gen
            .add_jump_if_r0_equals(arp::ArpOp::Request as u32, check_target);
        b.setup_counter(Counter::PassedArpUnknown);
        b.gen
            .add_jump_if_r0_not_equals(arp::ArpOp::Reply as u32, pass);

        b.gen.add_load32(Register::R0, arp::SOURCE_IP_OFFSET);
        b.setup_counter(Counter::DroppedArpReplySpaNoHost);
        b.gen.add_jump_if_r0_equals(0, drop);

        b.gen
            .add_load_immediate(Register::R0, ethernet::DEST_ADDR_OFFSET as i32);
        b.setup_counter(Counter::PassedArpUnicastReply);
        b.gen
            .add_jump_if_bytes_not_equal(Register::R0, &MacAddr::BROADCAST.0, pass)?;

        // Requests, and broadcast replies
        b.gen.define_label(check_target)?;
        match inputs.ipv4_address {
            None => {
                b.gen.add_load32(Register::R0, arp::TARGET_IP_OFFSET);
                b.setup_counter(Counter::DroppedGarpReply);
                b.gen.add_jump_if_r0_equals(0, drop);
            }
            Some((address, _)) => {
                b.gen
                    .add_load_immediate(Register::R0, arp::TARGET_IP_OFFSET as i32);
                b.setup_counter(Counter::DroppedArpOtherHost);
                b.gen
                    .add_jump_if_bytes_not_equal(Register::R0, &address.octets(), drop)?;
            }
        }

        b.setup_counter(Counter::PassedArp);
        b.gen.add_jump(pass);
        Ok(())
    }

    fn emit_ipv4(&self, b: &mut ProgramBuilder, inputs: &FilterInputs<'_>) -> Result<()> {
        let pass = b.count_and_pass();
        let drop = b.count_and_drop();

        if inputs.multicast_filter {
            let skip_dhcp = b.gen.new_label();

            // DHCP to our MAC always passes
            b.gen.add_load8(Register::R0, ipv4::PROTOCOL_OFFSET);
            b.gen
                .add_jump_if_r0_not_equals(Protocol::Udp as u32, skip_dhcp);
            b.gen.add_load16(Register::R0, ipv4::FRAGMENT_OFFSET_OFFSET);
            b.gen
                .add_jump_if_r0_any_bits_set(ipv4::FRAGMENT_OFFSET_MASK, skip_dhcp);
            b.gen
                .add_load_from_memory(Register::R1, IPV4_HEADER_SIZE_MEMORY_SLOT)?;
            b.gen.add_load16_indexed(Register::R0, udp::DEST_PORT_OFFSET);
            b.gen
                .add_jump_if_r0_not_equals(u32::from(udp::DHCP_CLIENT_PORT), skip_dhcp);
            b.gen
                .add_load_immediate(Register::R0, udp::DHCP_CLIENT_MAC_OFFSET as i32);
            // R1 still holds the IPv4 header size
            b.gen.add_add_r1();
            b.gen
                .add_jump_if_bytes_not_equal(Register::R0, &inputs.mac.0, skip_dhcp)?;
            b.setup_counter(Counter::PassedDhcp);
            b.gen.add_jump(pass);

            b.gen.define_label(skip_dhcp)?;

            b.gen.add_load8(Register::R0, ipv4::DEST_ADDR_OFFSET);
            b.gen.add_and(0xf0);
            b.setup_counter(Counter::DroppedIpv4Multicast);
            b.gen
                .add_jump_if_r0_equals(ipv4::MULTICAST_PREFIX, drop);

            b.setup_counter(Counter::DroppedIpv4BroadcastAddr);
            b.gen.add_load32(Register::R0, ipv4::DEST_ADDR_OFFSET);
            b.gen
                .add_jump_if_r0_equals(ipv4::BROADCAST_ADDRESS, drop);
            if let Some((address, prefix)) = inputs.ipv4_address {
                if prefix < 31 {
                    b.setup_counter(Counter::DroppedIpv4BroadcastNet);
                    let broadcast = ipv4::broadcast_address(address, prefix);
                    b.gen.add_jump_if_r0_equals(u32::from(broadcast), drop);
                }
            }

            self.emit_v4_keepalives(b, inputs)?;

            b.setup_counter(Counter::PassedIpv4Unicast);
            b.gen
                .add_load_immediate(Register::R0, ethernet::DEST_ADDR_OFFSET as i32);
            b.gen
                .add_jump_if_bytes_not_equal(Register::R0, &MacAddr::BROADCAST.0, pass)?;
            b.setup_counter(Counter::DroppedIpv4L2Broadcast);
            b.gen.add_jump(drop);
        } else {
            self.emit_v4_keepalives(b, inputs)?;
        }

        b.setup_counter(Counter::PassedIpv4);
        b.gen.add_jump(pass);
        Ok(())
    }

    fn emit_v4_keepalives(&self, b: &mut ProgramBuilder, inputs: &FilterInputs<'_>) -> Result<()> {
        self.emit_keepalive_group(
            b,
            inputs,
            |k| matches!(k, KeepaliveFilter::TcpAckV4(_)),
            Protocol::Tcp as u32,
            ipv4::PROTOCOL_OFFSET,
        )?;
        self.emit_keepalive_group(
            b,
            inputs,
            |k| matches!(k, KeepaliveFilter::Natt(_)),
            Protocol::Udp as u32,
            ipv4::PROTOCOL_OFFSET,
        )
    }

    fn emit_v6_keepalives(&self, b: &mut ProgramBuilder, inputs: &FilterInputs<'_>) -> Result<()> {
        self.emit_keepalive_group(
            b,
            inputs,
            |k| matches!(k, KeepaliveFilter::TcpAckV6(_)),
            NextHeader::Tcp as u32,
            ipv6::NEXT_HEADER_OFFSET,
        )
    }

    /// Emit the filters selected by `select`, skipped unless the byte at
    /// `offset` equals `proto`. Clobbers R0.
    fn emit_keepalive_group(
        &self,
        b: &mut ProgramBuilder,
        inputs: &FilterInputs<'_>,
        select: impl Fn(&KeepaliveFilter) -> bool,
        proto: u32,
        offset: u32,
    ) -> Result<()> {
        if !inputs.keepalives.values().any(&select) {
            return Ok(());
        }
        let skip = b.gen.new_label();
        b.gen.add_load8(Register::R0, offset);
        b.gen.add_jump_if_r0_not_equals(proto, skip);
        for filter in inputs.keepalives.values().filter(|k| select(k)) {
            filter.emit(b)?;
        }
        b.gen.define_label(skip)?;
        Ok(())
    }

    fn emit_ipv6(&self, b: &mut ProgramBuilder, inputs: &FilterInputs<'_>) -> Result<()> {
        let pass = b.count_and_pass();
        let drop = b.count_and_drop();

        b.gen.add_load8(Register::R0, ipv6::NEXT_HEADER_OFFSET);

        if inputs.multicast_filter {
            let skip_multicast_filter = b.gen.new_label();
            let drop_all_multicast = b.gen.new_label();

            if inputs.in_doze_mode {
                // Only echo requests go through the multicast check
                b.gen
                    .add_jump_if_r0_not_equals(NextHeader::Icmpv6 as u32, drop_all_multicast);
                b.gen.add_load8(Register::R0, icmpv6::TYPE_OFFSET);
                b.gen.add_jump_if_r0_not_equals(
                    icmpv6::Icmpv6Type::EchoRequest as u32,
                    skip_multicast_filter,
                );
            } else {
                b.gen
                    .add_jump_if_r0_equals(NextHeader::Icmpv6 as u32, skip_multicast_filter);
            }

            b.gen.define_label(drop_all_multicast)?;
            b.setup_counter(Counter::DroppedIpv6NonIcmpMulticast);
            b.gen.add_load8(Register::R0, ipv6::DEST_ADDR_OFFSET);
            b.gen
                .add_jump_if_r0_equals(ipv6::MULTICAST_PREFIX, drop);
            self.emit_v6_keepalives(b, inputs)?;
            b.setup_counter(Counter::PassedIpv6UnicastNonIcmp);
            b.gen.add_jump(pass);
            b.gen.define_label(skip_multicast_filter)?;
        } else {
            self.emit_v6_keepalives(b, inputs)?;
            b.gen.add_load8(Register::R0, ipv6::NEXT_HEADER_OFFSET);
            b.setup_counter(Counter::PassedIpv6NonIcmp);
            b.gen
                .add_jump_if_r0_not_equals(NextHeader::Icmpv6 as u32, pass);
        }

        // ICMPv6 from here on
        let skip_unsolicited_na = b.gen.new_label();
        b.gen.add_load8(Register::R0, icmpv6::TYPE_OFFSET);
        b.setup_counter(Counter::DroppedIpv6RouterSolicitation);
        b.gen.add_jump_if_r0_equals(
            icmpv6::Icmpv6Type::RouterSolicitation as u32,
            drop,
        );
        b.gen.add_jump_if_r0_not_equals(
            icmpv6::Icmpv6Type::NeighborAdvertisement as u32,
            skip_unsolicited_na,
        );
        b.gen
            .add_load_immediate(Register::R0, ipv6::DEST_ADDR_OFFSET as i32);
        b.gen.add_jump_if_bytes_not_equal(
            Register::R0,
            &ipv6::ALL_NODES_ADDRESS.octets(),
            skip_unsolicited_na,
        )?;
        b.setup_counter(Counter::DroppedIpv6MulticastNa);
        b.gen.add_jump(drop);
        b.gen.define_label(skip_unsolicited_na)?;
        Ok(())
    }

    /// Append the block dropping repeats of `ra`. Returns the block's
    /// filter lifetime.
    fn emit_ra(&self, b: &mut ProgramBuilder, ra: &RaRecord, now: u64) -> Result<u32> {
        let drop = b.count_and_drop();
        let filter_lifetime = ra.filter_lifetime(now);
        let next = b.gen.new_label();

        b.gen
            .add_load_from_memory(Register::R0, PACKET_SIZE_MEMORY_SLOT)?;
        b.gen.add_jump_if_r0_not_equals(ra.len() as u32, next);
        b.gen
            .add_load_from_memory(Register::R0, FILTER_AGE_MEMORY_SLOT)?;
        b.gen.add_jump_if_r0_greater_than(filter_lifetime, next);

        for section in ra.sections() {
            match section.kind {
                SectionKind::Match => {
                    let bytes = ra.packet().get(section.range()).ok_or_else(|| {
                        Error::IllegalInstruction(format!(
                            "section {:?} outside captured RA",
                            section
                        ))
                    })?;
                    b.gen
                        .add_load_immediate(Register::R0, section.offset as i32);
                    b.gen
                        .add_jump_if_bytes_not_equal(Register::R0, bytes, next)?;
                }
                SectionKind::Lifetime { .. } if ra.is_relevant_lifetime(section) => {
                    match section.length {
                        2 => b.gen.add_load16(Register::R0, section.offset as u32),
                        4 => b.gen.add_load32(Register::R0, section.offset as u32),
                        n => {
                            return Err(Error::IllegalInstruction(format!(
                                "bogus lifetime size {}",
                                n
                            )))
                        }
                    };
                    b.gen.add_jump_if_r0_less_than(filter_lifetime, next);
                }
                _ => {}
            }
        }

        b.setup_counter(Counter::DroppedRa);
        b.gen.add_jump(drop);
        b.gen.define_label(next)?;
        Ok(filter_lifetime)
    }

    fn emit_epilogue(&self, b: &mut ProgramBuilder) -> Result<()> {
        if !b.counters {
            return Ok(());
        }
        let pass = b.count_and_pass();
        let drop = b.count_and_drop();

        // Falling off the RA blocks
        b.setup_counter(Counter::PassedIpv6Icmp);

        b.gen.define_label(pass)?;
        b.increment_counter()?;
        b.gen.add_jump(Label::Pass);

        b.gen.define_label(drop)?;
        b.increment_counter()?;
        b.gen.add_jump(Label::Drop);
        Ok(())
    }
}
