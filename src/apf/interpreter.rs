//! Reference APF interpreter
//!
//! Executes generated programs against captured frames so the compiler can be
//! tested without firmware. Any fault (bad opcode, out-of-bounds access,
//! division by zero) ends execution with [`Verdict::Pass`].

use super::generator::{
    ext, Opcode, FILTER_AGE_MEMORY_SLOT, IPV4_HEADER_SIZE_MEMORY_SLOT, MEMORY_SLOTS,
    PACKET_SIZE_MEMORY_SLOT,
};

const ETH_HLEN: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Drop,
}

/// Run `program` without a data region.
pub fn run(program: &[u8], packet: &[u8], filter_age: u32) -> Verdict {
    let mut ram = program.to_vec();
    run_with_data(&mut ram, program.len(), packet, filter_age)
}

/// Run the program stored at the start of `ram`.
///
/// Bytes past `program_len` are the data region reachable with LDDW/STDW.
pub fn run_with_data(ram: &mut [u8], program_len: usize, packet: &[u8], filter_age: u32) -> Verdict {
    execute(ram, program_len, packet, filter_age).unwrap_or(Verdict::Pass)
}

fn read_be(bytes: &[u8], at: usize, len: usize) -> Option<u32> {
    let slice = bytes.get(at..at.checked_add(len)?)?;
    Some(slice.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

fn imm_len(len_field: u8) -> usize {
    match len_field {
        0 => 0,
        1 => 1,
        2 => 2,
        _ => 4,
    }
}

fn data_offset(ram_len: usize, base: u32, signed_imm: i32) -> usize {
    let mut offs = base.wrapping_add(signed_imm as u32);
    if offs & 0x8000_0000 != 0 {
        offs = (ram_len as u32).wrapping_add(offs);
    }
    offs as usize
}

fn in_data_bounds(offs: usize, program_len: usize, ram_len: usize) -> bool {
    offs >= program_len && offs.checked_add(4).is_some_and(|end| end <= ram_len)
}

fn execute(ram: &mut [u8], program_len: usize, packet: &[u8], filter_age: u32) -> Option<Verdict> {
    if program_len > ram.len() || packet.len() <= ETH_HLEN {
        return None;
    }
    let ram_len = ram.len();
    let mut regs = [0u32; 2];
    let mut mem = [0u32; MEMORY_SLOTS];
    mem[usize::from(PACKET_SIZE_MEMORY_SLOT)] = packet.len() as u32;
    mem[usize::from(FILTER_AGE_MEMORY_SLOT)] = filter_age;
    if packet[ETH_HLEN] & 0xf0 == 0x40 {
        mem[usize::from(IPV4_HEADER_SIZE_MEMORY_SLOT)] = u32::from(packet[ETH_HLEN] & 0x0f) * 4;
    }

    let mut pc = 0usize;
    loop {
        if pc == program_len {
            return Some(Verdict::Pass);
        }
        if pc == program_len + 1 {
            return Some(Verdict::Drop);
        }
        if pc > program_len {
            return None;
        }

        let byte = ram[pc];
        pc += 1;
        let opcode = Opcode::from_u8(byte >> 3)?;
        let r = usize::from(byte & 1);
        let len_field = (byte >> 1) & 3;
        let field_len = imm_len(len_field);

        let program = &ram[..program_len];
        let mut imm = 0u32;
        let mut signed_imm = 0i32;
        if field_len > 0 {
            imm = read_be(program, pc, field_len)?;
            pc += field_len;
            let shift = (4 - field_len as u32) * 8;
            signed_imm = ((imm << shift) as i32) >> shift;
        }

        match opcode {
            Opcode::Ldb | Opcode::Ldh | Opcode::Ldw | Opcode::Ldbx | Opcode::Ldhx | Opcode::Ldwx => {
                let (size, indexed) = match opcode {
                    Opcode::Ldb => (1, false),
                    Opcode::Ldh => (2, false),
                    Opcode::Ldw => (4, false),
                    Opcode::Ldbx => (1, true),
                    Opcode::Ldhx => (2, true),
                    _ => (4, true),
                };
                let mut offs = imm;
                if indexed {
                    offs = offs.checked_add(regs[1])?;
                }
                regs[r] = read_be(packet, offs as usize, size)?;
            }
            Opcode::Jmp => {
                pc = pc.checked_add(imm as usize)?;
            }
            Opcode::Jeq | Opcode::Jne | Opcode::Jgt | Opcode::Jlt | Opcode::Jset | Opcode::Jnebs => {
                let cmp_imm = if r == 1 {
                    regs[1]
                } else if field_len > 0 {
                    let value = read_be(program, pc, field_len)?;
                    pc += field_len;
                    value
                } else {
                    0
                };
                let taken = match opcode {
                    Opcode::Jeq => regs[0] == cmp_imm,
                    Opcode::Jne => regs[0] != cmp_imm,
                    Opcode::Jgt => regs[0] > cmp_imm,
                    Opcode::Jlt => regs[0] < cmp_imm,
                    Opcode::Jset => regs[0] & cmp_imm != 0,
                    _ => {
                        let count = cmp_imm as usize;
                        if count == 0 {
                            return None;
                        }
                        let expected = program.get(pc..pc.checked_add(count)?)?;
                        let start = regs[r] as usize;
                        let actual = packet.get(start..start.checked_add(count)?)?;
                        let differs = expected != actual;
                        pc += count;
                        differs
                    }
                };
                if taken {
                    pc = pc.checked_add(imm as usize)?;
                }
            }
            Opcode::Add | Opcode::Mul | Opcode::Div | Opcode::And | Opcode::Or | Opcode::Sh => {
                let operand = if r == 1 { regs[1] } else { imm };
                match opcode {
                    Opcode::Add => regs[0] = regs[0].wrapping_add(operand),
                    Opcode::Mul => regs[0] = regs[0].wrapping_mul(operand),
                    Opcode::Div => regs[0] = regs[0].checked_div(operand)?,
                    Opcode::And => regs[0] &= operand,
                    Opcode::Or => regs[0] |= operand,
                    _ => {
                        let shift = if r == 1 { regs[1] as i32 } else { signed_imm };
                        regs[0] = if shift >= 0 {
                            regs[0].checked_shl(shift as u32).unwrap_or(0)
                        } else {
                            regs[0].checked_shr(shift.unsigned_abs()).unwrap_or(0)
                        };
                    }
                }
            }
            Opcode::Li => {
                regs[r] = signed_imm as u32;
            }
            Opcode::Ext => match imm {
                code if (ext::LDM..ext::LDM + MEMORY_SLOTS as u32).contains(&code) => {
                    regs[r] = mem[(code - ext::LDM) as usize];
                }
                code if (ext::STM..ext::STM + MEMORY_SLOTS as u32).contains(&code) => {
                    mem[(code - ext::STM) as usize] = regs[r];
                }
                ext::NOT => regs[r] = !regs[r],
                ext::NEG => regs[r] = regs[r].wrapping_neg(),
                ext::SWAP => regs.swap(0, 1),
                ext::MOV => regs[r] = regs[r ^ 1],
                _ => return None,
            },
            Opcode::Lddw => {
                let offs = data_offset(ram_len, regs[r ^ 1], signed_imm);
                if !in_data_bounds(offs, program_len, ram_len) {
                    return None;
                }
                regs[r] = read_be(ram, offs, 4)?;
            }
            Opcode::Stdw => {
                let offs = data_offset(ram_len, regs[r ^ 1], signed_imm);
                if !in_data_bounds(offs, program_len, ram_len) {
                    return None;
                }
                ram[offs..offs + 4].copy_from_slice(&regs[r].to_be_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apf::generator::{ApfGenerator, Label, Register};

    fn packet(len: usize) -> Vec<u8> {
        vec![0u8; len]
    }

    fn compile(build: impl FnOnce(&mut ApfGenerator)) -> Vec<u8> {
        let mut gen = ApfGenerator::new(4).unwrap();
        build(&mut gen);
        gen.generate().unwrap()
    }

    #[test]
    fn test_empty_program_passes() {
        assert_eq!(run(&[], &packet(60), 0), Verdict::Pass);
    }

    #[test]
    fn test_short_packet_passes() {
        let program = compile(|g| {
            g.add_jump(Label::Drop);
        });
        assert_eq!(run(&program, &packet(14), 0), Verdict::Pass);
        assert_eq!(run(&program, &packet(15), 0), Verdict::Drop);
    }

    #[test]
    fn test_jump_if_equals() {
        let program = compile(|g| {
            g.add_load_immediate(Register::R0, 5);
            g.add_jump_if_r0_equals(5, Label::Drop);
        });
        assert_eq!(run(&program, &packet(60), 0), Verdict::Drop);

        let program = compile(|g| {
            g.add_load_immediate(Register::R0, 5);
            g.add_jump_if_r0_equals(6, Label::Drop);
        });
        assert_eq!(run(&program, &packet(60), 0), Verdict::Pass);
    }

    #[test]
    fn test_comparisons_are_unsigned() {
        let program = compile(|g| {
            g.add_load_immediate(Register::R0, -1);
            g.add_jump_if_r0_greater_than(1, Label::Drop);
        });
        assert_eq!(run(&program, &packet(60), 0), Verdict::Drop);
    }

    #[test]
    fn test_any_bits_set() {
        let program = compile(|g| {
            g.add_load_immediate(Register::R0, 0x10);
            g.add_jump_if_r0_any_bits_set(0x30, Label::Drop);
        });
        assert_eq!(run(&program, &packet(60), 0), Verdict::Drop);
    }

    #[test]
    fn test_arithmetic() {
        let program = compile(|g| {
            g.add_load_immediate(Register::R0, 10);
            g.add_mul(3);
            g.add_add(2);
            g.add_div(4);
            g.add_or(0x100);
            g.add_and(0x1ff);
            g.add_left_shift(1);
            g.add_right_shift(1);
            g.add_jump_if_r0_equals(0x108, Label::Drop);
        });
        assert_eq!(run(&program, &packet(60), 0), Verdict::Drop);
    }

    #[test]
    fn test_divide_by_zero_passes() {
        let program = compile(|g| {
            g.add_load_immediate(Register::R0, 1);
            g.add_div(0);
            g.add_jump(Label::Drop);
        });
        assert_eq!(run(&program, &packet(60), 0), Verdict::Pass);
    }

    #[test]
    fn test_packet_loads() {
        let mut frame = packet(60);
        frame[12] = 0x86;
        frame[13] = 0xdd;
        frame[20] = 0xde;
        frame[21] = 0xad;
        frame[22] = 0xbe;
        frame[23] = 0xef;
        let program = compile(|g| {
            let next = g.new_label();
            g.add_load16(Register::R0, 12);
            g.add_jump_if_r0_not_equals(0x86dd, next);
            g.add_load_immediate(Register::R1, 8);
            g.add_load32_indexed(Register::R0, 12);
            g.add_jump_if_r0_equals(0xdeadbeef, Label::Drop);
            g.define_label(next).unwrap();
        });
        assert_eq!(run(&program, &frame, 0), Verdict::Drop);
    }

    #[test]
    fn test_out_of_bounds_load_passes() {
        let program = compile(|g| {
            g.add_load8(Register::R0, 1000);
            g.add_jump(Label::Drop);
        });
        assert_eq!(run(&program, &packet(60), 0), Verdict::Pass);
    }

    #[test]
    fn test_jnebs() {
        let mut frame = packet(60);
        frame[30..34].copy_from_slice(&[1, 2, 3, 4]);
        let program = compile(|g| {
            g.add_load_immediate(Register::R0, 30);
            g.add_jump_if_bytes_not_equal(Register::R0, &[1, 2, 3, 4], Label::Pass)
                .unwrap();
            g.add_jump(Label::Drop);
        });
        assert_eq!(run(&program, &frame, 0), Verdict::Drop);
        frame[33] = 5;
        assert_eq!(run(&program, &frame, 0), Verdict::Pass);
    }

    #[test]
    fn test_jnebs_past_packet_end_passes() {
        let program = compile(|g| {
            g.add_load_immediate(Register::R0, 58);
            g.add_jump_if_bytes_not_equal(Register::R0, &[0, 0, 0, 0], Label::Drop)
                .unwrap();
            g.add_jump(Label::Drop);
        });
        assert_eq!(run(&program, &packet(60), 0), Verdict::Pass);
    }

    #[test]
    fn test_memory_slots() {
        let program = compile(|g| {
            g.add_load_from_memory(Register::R0, PACKET_SIZE_MEMORY_SLOT)
                .unwrap();
            g.add_jump_if_r0_equals(60, Label::Drop);
        });
        assert_eq!(run(&program, &packet(60), 0), Verdict::Drop);
        assert_eq!(run(&program, &packet(61), 0), Verdict::Pass);

        let program = compile(|g| {
            g.add_load_from_memory(Register::R0, FILTER_AGE_MEMORY_SLOT)
                .unwrap();
            g.add_jump_if_r0_greater_than(100, Label::Drop);
        });
        assert_eq!(run(&program, &packet(60), 101), Verdict::Drop);
        assert_eq!(run(&program, &packet(60), 100), Verdict::Pass);

        let program = compile(|g| {
            g.add_load_immediate(Register::R0, 7);
            g.add_store_to_memory(Register::R0, 3).unwrap();
            g.add_load_immediate(Register::R0, 0);
            g.add_load_from_memory(Register::R1, 3).unwrap();
            g.add_swap();
            g.add_jump_if_r0_equals(7, Label::Drop);
        });
        assert_eq!(run(&program, &packet(60), 0), Verdict::Drop);
    }

    #[test]
    fn test_ipv4_header_size_slot() {
        let mut frame = packet(60);
        frame[14] = 0x46;
        let program = compile(|g| {
            g.add_load_from_memory(Register::R0, IPV4_HEADER_SIZE_MEMORY_SLOT)
                .unwrap();
            g.add_jump_if_r0_equals(24, Label::Drop);
        });
        assert_eq!(run(&program, &frame, 0), Verdict::Drop);
    }

    #[test]
    fn test_not_neg_move() {
        let program = compile(|g| {
            g.add_load_immediate(Register::R1, 5);
            g.add_neg(Register::R1);
            g.add_not(Register::R1);
            g.add_move(Register::R0);
            g.add_jump_if_r0_equals(4, Label::Drop);
        });
        assert_eq!(run(&program, &packet(60), 0), Verdict::Drop);
    }

    #[test]
    fn test_data_region_counter() {
        let mut gen = ApfGenerator::new(4).unwrap();
        gen.add_load_immediate(Register::R1, -4);
        gen.add_load_data(Register::R0, 0).unwrap();
        gen.add_add(1);
        gen.add_store_data(Register::R0, 0).unwrap();
        let program = gen.generate().unwrap();

        let mut ram = vec![0u8; 64];
        ram[..program.len()].copy_from_slice(&program);
        for _ in 0..3 {
            assert_eq!(
                run_with_data(&mut ram, program.len(), &packet(60), 0),
                Verdict::Pass
            );
        }
        assert_eq!(&ram[60..64], &[0, 0, 0, 3]);
    }

    #[test]
    fn test_data_access_into_program_passes() {
        let mut gen = ApfGenerator::new(4).unwrap();
        gen.add_load_immediate(Register::R1, 0);
        gen.add_store_data(Register::R0, 0).unwrap();
        gen.add_jump(Label::Drop);
        let program = gen.generate().unwrap();
        let mut ram = vec![0u8; 64];
        ram[..program.len()].copy_from_slice(&program);
        assert_eq!(
            run_with_data(&mut ram, program.len(), &packet(60), 0),
            Verdict::Pass
        );
    }
}
