//! APF bytecode generator
//!
//! Builds programs for the Android Packet Filter interpreter that runs in
//! network interface firmware. Instructions are appended in order and jumps
//! refer to [`Label`]s, which are resolved by [`ApfGenerator::generate`].
//!
//! Instruction layout:
//!
//! ```text
//! +--------+------+-----+------------------+-----------------+---------------+
//! | opcode | size | reg | jump target (0-4)| immediate (0-4) | compare bytes |
//! | 5 bits |  2   |  1  |                  |                 |   (JNEBS)     |
//! +--------+------+-----+------------------+-----------------+---------------+
//! ```
//!
//! The size field encodes 0, 1, 2 or 4 byte immediates. Jump targets start at
//! 4 bytes and are shrunk once the program layout is known.

use crate::{Error, Result};

/// Lowest APF version programs can be generated for.
pub const MIN_APF_VERSION: u32 = 2;
/// First APF version with LDDW/STDW.
const DATA_ACCESS_VERSION: u32 = 3;

/// Number of scratch memory slots.
pub const MEMORY_SLOTS: usize = 16;
/// Filled by the interpreter with the IPv4 header length (IHL * 4).
pub const IPV4_HEADER_SIZE_MEMORY_SLOT: u8 = 13;
/// Filled by the interpreter with the packet length.
pub const PACKET_SIZE_MEMORY_SLOT: u8 = 14;
/// Filled by the interpreter with seconds since the program was installed.
pub const FILTER_AGE_MEMORY_SLOT: u8 = 15;

const MAX_SHRINK_ITERATIONS: usize = 10;

/// Interpreter registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    R0 = 0,
    R1 = 1,
}

/// Jump target
///
/// `Pass` and `Drop` are the two terminal labels located just past the end of
/// the program. `Local` labels are allocated with [`ApfGenerator::new_label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Pass,
    Drop,
    Local(usize),
}

/// APF opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Ldb = 1,
    Ldh = 2,
    Ldw = 3,
    Ldbx = 4,
    Ldhx = 5,
    Ldwx = 6,
    Add = 7,
    Mul = 8,
    Div = 9,
    And = 10,
    Or = 11,
    Sh = 12,
    Li = 13,
    Jmp = 14,
    Jeq = 15,
    Jne = 16,
    Jgt = 17,
    Jlt = 18,
    Jset = 19,
    Jnebs = 20,
    Ext = 21,
    Lddw = 22,
    Stdw = 23,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        use Opcode::*;
        Some(match value {
            1 => Ldb,
            2 => Ldh,
            3 => Ldw,
            4 => Ldbx,
            5 => Ldhx,
            6 => Ldwx,
            7 => Add,
            8 => Mul,
            9 => Div,
            10 => And,
            11 => Or,
            12 => Sh,
            13 => Li,
            14 => Jmp,
            15 => Jeq,
            16 => Jne,
            17 => Jgt,
            18 => Jlt,
            19 => Jset,
            20 => Jnebs,
            21 => Ext,
            22 => Lddw,
            23 => Stdw,
            _ => return None,
        })
    }
}

/// Extended opcodes, carried in the immediate of [`Opcode::Ext`].
pub mod ext {
    /// Load from memory slot `imm - LDM`.
    pub const LDM: u32 = 0;
    /// Store to memory slot `imm - STM`.
    pub const STM: u32 = 16;
    pub const NOT: u32 = 32;
    pub const NEG: u32 = 33;
    /// Swap R0 and R1.
    pub const SWAP: u32 = 34;
    /// Copy the other register into the named one.
    pub const MOV: u32 = 35;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Imm {
    Signed(i32),
    Unsigned(u32),
}

impl Imm {
    /// Smallest encoding that holds the value.
    fn size(self) -> usize {
        match self {
            Imm::Signed(0) | Imm::Unsigned(0) => 0,
            Imm::Signed(v) if (-128..=127).contains(&v) => 1,
            Imm::Signed(v) if (-32768..=32767).contains(&v) => 2,
            Imm::Unsigned(v) if v <= 0xff => 1,
            Imm::Unsigned(v) if v <= 0xffff => 2,
            _ => 4,
        }
    }

    fn bits(self) -> u32 {
        match self {
            Imm::Signed(v) => v as u32,
            Imm::Unsigned(v) => v,
        }
    }
}

fn size_field(len: usize) -> u8 {
    match len {
        0 => 0,
        1 => 1,
        2 => 2,
        _ => 3,
    }
}

fn push_be(out: &mut Vec<u8>, value: u32, len: usize) {
    out.extend_from_slice(&value.to_be_bytes()[4 - len..]);
}

#[derive(Debug, Clone)]
struct Instruction {
    opcode: Opcode,
    register: Register,
    imm: Option<Imm>,
    target: Option<Label>,
    target_size: usize,
    compare_bytes: Option<Vec<u8>>,
    offset: usize,
}

impl Instruction {
    fn new(opcode: Opcode, register: Register) -> Self {
        Self {
            opcode,
            register,
            imm: None,
            target: None,
            target_size: 4,
            compare_bytes: None,
            offset: 0,
        }
    }

    fn imm(mut self, imm: Imm) -> Self {
        self.imm = Some(imm);
        self
    }

    fn target(mut self, label: Label) -> Self {
        self.target = Some(label);
        self
    }

    fn compare_bytes(mut self, bytes: &[u8]) -> Self {
        self.compare_bytes = Some(bytes.to_vec());
        self
    }

    fn imm_size(&self) -> usize {
        self.imm.map_or(0, Imm::size)
    }

    /// Width shared by the jump target and the immediate.
    fn field_size_with(&self, target_size: usize) -> usize {
        if self.target.is_some() {
            target_size.max(self.imm_size())
        } else {
            self.imm_size()
        }
    }

    fn size_with(&self, target_size: usize) -> usize {
        let field = self.field_size_with(target_size);
        let mut size = 1;
        if self.imm.is_some() {
            size += field;
        }
        if self.target.is_some() {
            size += field;
        }
        if let Some(bytes) = &self.compare_bytes {
            size += bytes.len();
        }
        size
    }

    fn size(&self) -> usize {
        self.size_with(self.target_size)
    }

    fn encode(&self, target_offset: Option<u32>, out: &mut Vec<u8>) {
        let field = self.field_size_with(self.target_size);
        out.push(((self.opcode as u8) << 3) | (size_field(field) << 1) | self.register as u8);
        if let Some(target) = target_offset {
            push_be(out, target, field);
        }
        if let Some(imm) = self.imm {
            push_be(out, imm.bits(), field);
        }
        if let Some(bytes) = &self.compare_bytes {
            out.extend_from_slice(bytes);
        }
    }
}

/// APF program generator
#[derive(Debug)]
pub struct ApfGenerator {
    version: u32,
    instructions: Vec<Instruction>,
    /// Instruction index each local label points at, once defined.
    labels: Vec<Option<usize>>,
}

impl ApfGenerator {
    /// Create a generator targeting the given APF version.
    pub fn new(version: u32) -> Result<Self> {
        if !Self::supports_version(version) {
            return Err(Error::IllegalInstruction(format!(
                "unsupported APF version {}",
                version
            )));
        }
        Ok(Self {
            version,
            instructions: Vec::new(),
            labels: Vec::new(),
        })
    }

    pub fn supports_version(version: u32) -> bool {
        version >= MIN_APF_VERSION
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Allocate a fresh local label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label::Local(self.labels.len() - 1)
    }

    /// Bind `label` to the position of the next instruction.
    pub fn define_label(&mut self, label: Label) -> Result<&mut Self> {
        let Label::Local(id) = label else {
            return Err(Error::IllegalInstruction(format!(
                "{:?} cannot be redefined",
                label
            )));
        };
        let index = self.instructions.len();
        match self.labels.get_mut(id) {
            Some(slot) if slot.is_none() => *slot = Some(index),
            Some(_) => {
                return Err(Error::IllegalInstruction(format!(
                    "label {} already defined",
                    id
                )))
            }
            None => {
                return Err(Error::IllegalInstruction(format!("unknown label {}", id)));
            }
        }
        Ok(self)
    }

    fn append(&mut self, instruction: Instruction) -> &mut Self {
        self.instructions.push(instruction);
        self
    }

    fn require_version(&self, min: u32) -> Result<()> {
        if self.version < min {
            return Err(Error::IllegalInstruction(format!(
                "requires APF >= {}, generating for {}",
                min, self.version
            )));
        }
        Ok(())
    }

    pub fn add_jump(&mut self, target: Label) -> &mut Self {
        self.append(Instruction::new(Opcode::Jmp, Register::R0).target(target))
    }

    /// `register = packet[offset]`
    pub fn add_load8(&mut self, register: Register, offset: u32) -> &mut Self {
        self.append(Instruction::new(Opcode::Ldb, register).imm(Imm::Unsigned(offset)))
    }

    pub fn add_load16(&mut self, register: Register, offset: u32) -> &mut Self {
        self.append(Instruction::new(Opcode::Ldh, register).imm(Imm::Unsigned(offset)))
    }

    pub fn add_load32(&mut self, register: Register, offset: u32) -> &mut Self {
        self.append(Instruction::new(Opcode::Ldw, register).imm(Imm::Unsigned(offset)))
    }

    /// `register = packet[offset + R1]`
    pub fn add_load8_indexed(&mut self, register: Register, offset: u32) -> &mut Self {
        self.append(Instruction::new(Opcode::Ldbx, register).imm(Imm::Unsigned(offset)))
    }

    pub fn add_load16_indexed(&mut self, register: Register, offset: u32) -> &mut Self {
        self.append(Instruction::new(Opcode::Ldhx, register).imm(Imm::Unsigned(offset)))
    }

    pub fn add_load32_indexed(&mut self, register: Register, offset: u32) -> &mut Self {
        self.append(Instruction::new(Opcode::Ldwx, register).imm(Imm::Unsigned(offset)))
    }

    /// `R0 += value`
    pub fn add_add(&mut self, value: u32) -> &mut Self {
        self.append(Instruction::new(Opcode::Add, Register::R0).imm(Imm::Unsigned(value)))
    }

    pub fn add_mul(&mut self, value: u32) -> &mut Self {
        self.append(Instruction::new(Opcode::Mul, Register::R0).imm(Imm::Unsigned(value)))
    }

    pub fn add_div(&mut self, value: u32) -> &mut Self {
        self.append(Instruction::new(Opcode::Div, Register::R0).imm(Imm::Unsigned(value)))
    }

    pub fn add_and(&mut self, value: u32) -> &mut Self {
        self.append(Instruction::new(Opcode::And, Register::R0).imm(Imm::Unsigned(value)))
    }

    pub fn add_or(&mut self, value: u32) -> &mut Self {
        self.append(Instruction::new(Opcode::Or, Register::R0).imm(Imm::Unsigned(value)))
    }

    pub fn add_left_shift(&mut self, bits: i32) -> &mut Self {
        self.append(Instruction::new(Opcode::Sh, Register::R0).imm(Imm::Signed(bits)))
    }

    pub fn add_right_shift(&mut self, bits: i32) -> &mut Self {
        self.append(Instruction::new(Opcode::Sh, Register::R0).imm(Imm::Signed(-bits)))
    }

    /// `R0 += R1`
    pub fn add_add_r1(&mut self) -> &mut Self {
        self.append(Instruction::new(Opcode::Add, Register::R1))
    }

    pub fn add_load_immediate(&mut self, register: Register, value: i32) -> &mut Self {
        self.append(Instruction::new(Opcode::Li, register).imm(Imm::Signed(value)))
    }

    fn add_conditional_jump(&mut self, opcode: Opcode, value: u32, target: Label) -> &mut Self {
        self.append(
            Instruction::new(opcode, Register::R0)
                .imm(Imm::Unsigned(value))
                .target(target),
        )
    }

    pub fn add_jump_if_r0_equals(&mut self, value: u32, target: Label) -> &mut Self {
        self.add_conditional_jump(Opcode::Jeq, value, target)
    }

    pub fn add_jump_if_r0_not_equals(&mut self, value: u32, target: Label) -> &mut Self {
        self.add_conditional_jump(Opcode::Jne, value, target)
    }

    pub fn add_jump_if_r0_greater_than(&mut self, value: u32, target: Label) -> &mut Self {
        self.add_conditional_jump(Opcode::Jgt, value, target)
    }

    pub fn add_jump_if_r0_less_than(&mut self, value: u32, target: Label) -> &mut Self {
        self.add_conditional_jump(Opcode::Jlt, value, target)
    }

    pub fn add_jump_if_r0_any_bits_set(&mut self, value: u32, target: Label) -> &mut Self {
        self.add_conditional_jump(Opcode::Jset, value, target)
    }

    /// Jump to `target` unless the packet bytes at offset R0 equal `bytes`.
    pub fn add_jump_if_bytes_not_equal(
        &mut self,
        register: Register,
        bytes: &[u8],
        target: Label,
    ) -> Result<&mut Self> {
        if register == Register::R1 {
            return Err(Error::IllegalInstruction(
                "JNEBS does not support R1".into(),
            ));
        }
        if bytes.is_empty() {
            return Err(Error::IllegalInstruction(
                "JNEBS needs at least one byte".into(),
            ));
        }
        let len = u32::try_from(bytes.len())
            .map_err(|_| Error::IllegalInstruction("JNEBS compare too long".into()))?;
        Ok(self.append(
            Instruction::new(Opcode::Jnebs, register)
                .imm(Imm::Unsigned(len))
                .target(target)
                .compare_bytes(bytes),
        ))
    }

    fn check_slot(slot: u8) -> Result<u32> {
        if usize::from(slot) >= MEMORY_SLOTS {
            return Err(Error::IllegalInstruction(format!(
                "memory slot {} out of range",
                slot
            )));
        }
        Ok(u32::from(slot))
    }

    pub fn add_load_from_memory(&mut self, register: Register, slot: u8) -> Result<&mut Self> {
        let slot = Self::check_slot(slot)?;
        Ok(self.append(Instruction::new(Opcode::Ext, register).imm(Imm::Unsigned(ext::LDM + slot))))
    }

    pub fn add_store_to_memory(&mut self, register: Register, slot: u8) -> Result<&mut Self> {
        let slot = Self::check_slot(slot)?;
        Ok(self.append(Instruction::new(Opcode::Ext, register).imm(Imm::Unsigned(ext::STM + slot))))
    }

    pub fn add_not(&mut self, register: Register) -> &mut Self {
        self.append(Instruction::new(Opcode::Ext, register).imm(Imm::Unsigned(ext::NOT)))
    }

    pub fn add_neg(&mut self, register: Register) -> &mut Self {
        self.append(Instruction::new(Opcode::Ext, register).imm(Imm::Unsigned(ext::NEG)))
    }

    pub fn add_swap(&mut self) -> &mut Self {
        self.append(Instruction::new(Opcode::Ext, Register::R0).imm(Imm::Unsigned(ext::SWAP)))
    }

    pub fn add_move(&mut self, register: Register) -> &mut Self {
        self.append(Instruction::new(Opcode::Ext, register).imm(Imm::Unsigned(ext::MOV)))
    }

    /// `register = data[other register + offset]` (32-bit, big-endian)
    pub fn add_load_data(&mut self, register: Register, offset: i32) -> Result<&mut Self> {
        self.require_version(DATA_ACCESS_VERSION)?;
        Ok(self.append(Instruction::new(Opcode::Lddw, register).imm(Imm::Signed(offset))))
    }

    /// `data[other register + offset] = register` (32-bit, big-endian)
    pub fn add_store_data(&mut self, register: Register, offset: i32) -> Result<&mut Self> {
        self.require_version(DATA_ACCESS_VERSION)?;
        Ok(self.append(Instruction::new(Opcode::Stdw, register).imm(Imm::Signed(offset))))
    }

    /// Program size with every jump target at its widest encoding.
    pub fn program_length_over_estimate(&self) -> usize {
        self.instructions.iter().map(Instruction::size).sum()
    }

    fn update_offsets(&mut self) -> usize {
        let mut offset = 0;
        for instruction in &mut self.instructions {
            instruction.offset = offset;
            offset += instruction.size();
        }
        offset
    }

    fn label_offset(&self, label: Label, total: usize) -> Result<usize> {
        match label {
            Label::Pass => Ok(total),
            Label::Drop => Ok(total + 1),
            Label::Local(id) => match self.labels.get(id).copied().flatten() {
                Some(index) => Ok(self.instructions.get(index).map_or(total, |i| i.offset)),
                None => Err(Error::IllegalInstruction(format!(
                    "label {} is not defined",
                    id
                ))),
            },
        }
    }

    /// Distance from the end of instruction `index` to `label`.
    fn target_distance(&self, index: usize, label: Label, total: usize) -> Result<u32> {
        let instruction = &self.instructions[index];
        let end = instruction.offset + instruction.size();
        let to = self.label_offset(label, total)?;
        to.checked_sub(end)
            .and_then(|d| u32::try_from(d).ok())
            .ok_or_else(|| Error::IllegalInstruction(format!("backward branch to {:?}", label)))
    }

    fn shrink(&mut self, total: usize) -> Result<bool> {
        let mut shrunk = false;
        for index in 0..self.instructions.len() {
            let Some(label) = self.instructions[index].target else {
                continue;
            };
            let target_size = Imm::Unsigned(self.target_distance(index, label, total)?).size();
            let instruction = &mut self.instructions[index];
            if target_size > instruction.target_size {
                return Err(Error::IllegalInstruction(format!(
                    "jump to {:?} grew while shrinking",
                    label
                )));
            }
            let old_size = instruction.size();
            instruction.target_size = target_size;
            if instruction.size() < old_size {
                shrunk = true;
            }
        }
        Ok(shrunk)
    }

    /// Resolve labels and emit the final bytecode.
    pub fn generate(mut self) -> Result<Vec<u8>> {
        let mut total = self.update_offsets();
        for _ in 0..MAX_SHRINK_ITERATIONS {
            if !self.shrink(total)? {
                break;
            }
            total = self.update_offsets();
        }

        let mut out = Vec::with_capacity(total);
        for index in 0..self.instructions.len() {
            let instruction = &self.instructions[index];
            let target = match instruction.target {
                Some(label) => {
                    let distance = self.target_distance(index, label, total)?;
                    if Imm::Unsigned(distance).size()
                        > instruction.field_size_with(instruction.target_size)
                    {
                        return Err(Error::IllegalInstruction(format!(
                            "jump to {:?} does not fit its encoding",
                            label
                        )));
                    }
                    Some(distance)
                }
                None => None,
            };
            instruction.encode(target, &mut out);
        }
        Ok(out)
    }
}
