//! Everything that is used by both `asm` and `exec`:
//! the machine constants, the architecture description (registers, condition
//! codes, opcodes, operands, instructions), the symbolic memory cells, and the
//! executable image format.

pub mod serialization;

use std::io::{self, Read, Write};

use num_traits::FromPrimitive;

use serialization::*;

/// Lowest valid memory address.
pub const MEM_BOT: i64 = 0x400000;
/// One past the highest valid memory address.
pub const MEM_TOP: i64 = 0x410000;
/// Size of the emulated memory window, in bytes.
pub const MEM_SIZE: usize = (MEM_TOP - MEM_BOT) as usize;
/// Size of an instruction slot, in bytes.
pub const INS_SIZE: usize = 8;
/// Halt sentinel: jumping here terminates execution.
/// Lies outside the memory window, so it can never be a real instruction address.
pub const EXIT_ADDR: i64 = 0xfdead;
/// Number of machine registers, including the instruction pointer.
pub const NUM_REGS: usize = 17;

/// The machine registers.
///
/// The discriminants are fixed: they index the register file and appear in
/// serialized images.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum Reg {
    RAX = 0,
    RBX = 1,
    RCX = 2,
    RDX = 3,
    RSI = 4,
    RDI = 5,
    RBP = 6,
    RSP = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
    RIP = 16,
}
impl BinaryWrite for Reg {
    fn bin_write<F: Write>(&self, f: &mut F) -> io::Result<()> {
        (*self as u8).bin_write(f)
    }
}
impl BinaryRead for Reg {
    fn bin_read<F: Read>(f: &mut F) -> io::Result<Reg> {
        match Reg::from_u8(u8::bin_read(f)?) {
            Some(reg) => Ok(reg),
            None => Err(io::ErrorKind::InvalidData.into()),
        }
    }
}

/// The condition codes understood by the conditional jump and set instructions.
///
/// The signed comparisons are evaluated purely from the condition flags, so
/// they describe the outcome of the most recent flag-affecting instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum Cond {
    E,
    NE,
    L,
    LE,
    G,
    GE,
}
impl BinaryWrite for Cond {
    fn bin_write<F: Write>(&self, f: &mut F) -> io::Result<()> {
        (*self as u8).bin_write(f)
    }
}
impl BinaryRead for Cond {
    fn bin_read<F: Read>(f: &mut F) -> io::Result<Cond> {
        match Cond::from_u8(u8::bin_read(f)?) {
            Some(cond) => Ok(cond),
            None => Err(io::ErrorKind::InvalidData.into()),
        }
    }
}

/// The supported op codes for the execution engine.
///
/// All operands are quadword-sized; there are no sub-register encodings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OPCode {
    MOV,
    ADD,
    SUB,
    IMUL,
    XOR,
    OR,
    AND,
    SHL,
    SAR,
    SHR,
    INC,
    DEC,
    NOT,
    NEG,
    LEA,
    CMP,
    PUSH,
    POP,
    CALL,
    RET,
    JMP,
    Jcc(Cond),
    SETcc(Cond),
}
impl BinaryWrite for OPCode {
    fn bin_write<F: Write>(&self, f: &mut F) -> io::Result<()> {
        match *self {
            OPCode::MOV => 0u8.bin_write(f),
            OPCode::ADD => 1u8.bin_write(f),
            OPCode::SUB => 2u8.bin_write(f),
            OPCode::IMUL => 3u8.bin_write(f),
            OPCode::XOR => 4u8.bin_write(f),
            OPCode::OR => 5u8.bin_write(f),
            OPCode::AND => 6u8.bin_write(f),
            OPCode::SHL => 7u8.bin_write(f),
            OPCode::SAR => 8u8.bin_write(f),
            OPCode::SHR => 9u8.bin_write(f),
            OPCode::INC => 10u8.bin_write(f),
            OPCode::DEC => 11u8.bin_write(f),
            OPCode::NOT => 12u8.bin_write(f),
            OPCode::NEG => 13u8.bin_write(f),
            OPCode::LEA => 14u8.bin_write(f),
            OPCode::CMP => 15u8.bin_write(f),
            OPCode::PUSH => 16u8.bin_write(f),
            OPCode::POP => 17u8.bin_write(f),
            OPCode::CALL => 18u8.bin_write(f),
            OPCode::RET => 19u8.bin_write(f),
            OPCode::JMP => 20u8.bin_write(f),
            OPCode::Jcc(cond) => {
                21u8.bin_write(f)?;
                cond.bin_write(f)
            }
            OPCode::SETcc(cond) => {
                22u8.bin_write(f)?;
                cond.bin_write(f)
            }
        }
    }
}
impl BinaryRead for OPCode {
    fn bin_read<F: Read>(f: &mut F) -> io::Result<OPCode> {
        Ok(match u8::bin_read(f)? {
            0 => OPCode::MOV,
            1 => OPCode::ADD,
            2 => OPCode::SUB,
            3 => OPCode::IMUL,
            4 => OPCode::XOR,
            5 => OPCode::OR,
            6 => OPCode::AND,
            7 => OPCode::SHL,
            8 => OPCode::SAR,
            9 => OPCode::SHR,
            10 => OPCode::INC,
            11 => OPCode::DEC,
            12 => OPCode::NOT,
            13 => OPCode::NEG,
            14 => OPCode::LEA,
            15 => OPCode::CMP,
            16 => OPCode::PUSH,
            17 => OPCode::POP,
            18 => OPCode::CALL,
            19 => OPCode::RET,
            20 => OPCode::JMP,
            21 => OPCode::Jcc(Cond::bin_read(f)?),
            22 => OPCode::SETcc(Cond::bin_read(f)?),
            _ => return Err(io::ErrorKind::InvalidData.into()),
        })
    }
}

/// An immediate: a literal quadword, or a label to be resolved by the linker.
///
/// Linked images never contain labels; the executor rejects them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Imm {
    Lit(i64),
    Label(String),
}
impl BinaryWrite for Imm {
    fn bin_write<F: Write>(&self, f: &mut F) -> io::Result<()> {
        match self {
            Imm::Lit(val) => {
                0u8.bin_write(f)?;
                val.bin_write(f)
            }
            Imm::Label(lbl) => {
                1u8.bin_write(f)?;
                lbl.bin_write(f)
            }
        }
    }
}
impl BinaryRead for Imm {
    fn bin_read<F: Read>(f: &mut F) -> io::Result<Imm> {
        Ok(match u8::bin_read(f)? {
            0 => Imm::Lit(i64::bin_read(f)?),
            1 => Imm::Label(String::bin_read(f)?),
            _ => return Err(io::ErrorKind::InvalidData.into()),
        })
    }
}

/// An instruction operand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    /// An immediate value.
    Imm(Imm),
    /// A register.
    Reg(Reg),
    /// Memory at an absolute address.
    Abs(Imm),
    /// Memory at the address held in a register.
    Ind(Reg),
    /// Memory at a register plus a displacement.
    Disp(Imm, Reg),
}
impl BinaryWrite for Operand {
    fn bin_write<F: Write>(&self, f: &mut F) -> io::Result<()> {
        match self {
            Operand::Imm(imm) => {
                0u8.bin_write(f)?;
                imm.bin_write(f)
            }
            Operand::Reg(reg) => {
                1u8.bin_write(f)?;
                reg.bin_write(f)
            }
            Operand::Abs(imm) => {
                2u8.bin_write(f)?;
                imm.bin_write(f)
            }
            Operand::Ind(reg) => {
                3u8.bin_write(f)?;
                reg.bin_write(f)
            }
            Operand::Disp(imm, reg) => {
                4u8.bin_write(f)?;
                imm.bin_write(f)?;
                reg.bin_write(f)
            }
        }
    }
}
impl BinaryRead for Operand {
    fn bin_read<F: Read>(f: &mut F) -> io::Result<Operand> {
        Ok(match u8::bin_read(f)? {
            0 => Operand::Imm(Imm::bin_read(f)?),
            1 => Operand::Reg(Reg::bin_read(f)?),
            2 => Operand::Abs(Imm::bin_read(f)?),
            3 => Operand::Ind(Reg::bin_read(f)?),
            4 => Operand::Disp(Imm::bin_read(f)?, Reg::bin_read(f)?),
            _ => return Err(io::ErrorKind::InvalidData.into()),
        })
    }
}

/// A decoded instruction: an op code and its operands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ins {
    pub op: OPCode,
    pub args: Vec<Operand>,
}
impl Ins {
    pub fn new(op: OPCode, args: Vec<Operand>) -> Ins {
        Ins { op, args }
    }
}
impl BinaryWrite for Ins {
    fn bin_write<F: Write>(&self, f: &mut F) -> io::Result<()> {
        self.op.bin_write(f)?;
        self.args.bin_write(f)
    }
}
impl BinaryRead for Ins {
    fn bin_read<F: Read>(f: &mut F) -> io::Result<Ins> {
        let op = OPCode::bin_read(f)?;
        let args = Vec::bin_read(f)?;
        Ok(Ins { op, args })
    }
}

/// A single cell of emulated memory.
///
/// Unlike real x86, an instruction is stored as one logical token spanning
/// `INS_SIZE` cells: the first cell carries the entire decoded instruction and
/// the rest of the slot is `Tail` filler. Everything else is plain data bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemCell {
    /// The first cell of an instruction slot, carrying the decoded instruction.
    Inst(Ins),
    /// One of the remaining cells of an instruction slot.
    Tail,
    /// A plain data byte.
    Data(u8),
}
impl MemCell {
    /// Encodes a quadword as eight little-endian data cells.
    pub fn quad(val: i64) -> [MemCell; 8] {
        let b = val.to_le_bytes();
        [
            MemCell::Data(b[0]),
            MemCell::Data(b[1]),
            MemCell::Data(b[2]),
            MemCell::Data(b[3]),
            MemCell::Data(b[4]),
            MemCell::Data(b[5]),
            MemCell::Data(b[6]),
            MemCell::Data(b[7]),
        ]
    }
    /// Decodes the quadword stored in the first eight of the given cells.
    /// Cells that are not data bytes read as zero.
    pub fn read_quad(cells: &[MemCell]) -> i64 {
        let mut b = [0u8; 8];
        for (byte, cell) in b.iter_mut().zip(cells) {
            if let MemCell::Data(val) = cell {
                *byte = *val;
            }
        }
        i64::from_le_bytes(b)
    }
    /// Encodes a string as data cells: its bytes followed by a zero terminator.
    pub fn asciz(s: &str) -> Vec<MemCell> {
        let mut cells: Vec<MemCell> = s.bytes().map(MemCell::Data).collect();
        cells.push(MemCell::Data(0));
        cells
    }
    /// Encodes an instruction as one head cell followed by seven tail cells.
    pub fn inst(ins: Ins) -> Vec<MemCell> {
        let mut cells = vec![MemCell::Inst(ins)];
        cells.resize(INS_SIZE, MemCell::Tail);
        cells
    }
}
impl BinaryWrite for MemCell {
    fn bin_write<F: Write>(&self, f: &mut F) -> io::Result<()> {
        match self {
            MemCell::Data(val) => {
                0u8.bin_write(f)?;
                val.bin_write(f)
            }
            MemCell::Inst(ins) => {
                1u8.bin_write(f)?;
                ins.bin_write(f)
            }
            MemCell::Tail => 2u8.bin_write(f),
        }
    }
}
impl BinaryRead for MemCell {
    fn bin_read<F: Read>(f: &mut F) -> io::Result<MemCell> {
        Ok(match u8::bin_read(f)? {
            0 => MemCell::Data(u8::bin_read(f)?),
            1 => MemCell::Inst(Ins::bin_read(f)?),
            2 => MemCell::Tail,
            _ => return Err(io::ErrorKind::InvalidData.into()),
        })
    }
}

#[test]
fn test_quad_cells() {
    for &val in &[0, 1, -1, i64::MIN, i64::MAX, 0x0123456789abcdef] {
        assert_eq!(MemCell::read_quad(&MemCell::quad(val)), val);
    }
    // little-endian: first cell is the least significant byte
    assert_eq!(MemCell::quad(0x0102)[0], MemCell::Data(0x02));
    assert_eq!(MemCell::quad(0x0102)[1], MemCell::Data(0x01));
    // non-data cells read as zero
    let mut cells = MemCell::quad(-1).to_vec();
    cells[3] = MemCell::Tail;
    assert_eq!(
        MemCell::read_quad(&cells),
        i64::from_le_bytes([0xff, 0xff, 0xff, 0x00, 0xff, 0xff, 0xff, 0xff])
    );
}
#[test]
fn test_asciz_cells() {
    assert_eq!(MemCell::asciz(""), vec![MemCell::Data(0)]);
    let cells = MemCell::asciz("hi");
    assert_eq!(cells, vec![MemCell::Data(b'h'), MemCell::Data(b'i'), MemCell::Data(0)]);
}
#[test]
fn test_inst_cells() {
    let cells = MemCell::inst(Ins::new(OPCode::RET, vec![]));
    assert_eq!(cells.len(), INS_SIZE);
    assert!(matches!(cells[0], MemCell::Inst(_)));
    assert!(cells[1..].iter().all(|c| *c == MemCell::Tail));
}

/// A fully-linked executable image, ready to be loaded into an emulator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Executable {
    /// Address of the first instruction to execute.
    pub entry: i64,
    /// Load address of the text segment.
    pub text_pos: i64,
    /// Load address of the data segment.
    pub data_pos: i64,
    /// The program's instructions, as instruction-slot cells.
    pub text_seg: Vec<MemCell>,
    /// The program's static data, as data cells.
    pub data_seg: Vec<MemCell>,
}
impl BinaryWrite for Executable {
    fn bin_write<F: Write>(&self, f: &mut F) -> io::Result<()> {
        self.entry.bin_write(f)?;
        self.text_pos.bin_write(f)?;
        self.data_pos.bin_write(f)?;
        self.text_seg.bin_write(f)?;
        self.data_seg.bin_write(f)
    }
}
impl BinaryRead for Executable {
    fn bin_read<F: Read>(f: &mut F) -> io::Result<Executable> {
        let entry = i64::bin_read(f)?;
        let text_pos = i64::bin_read(f)?;
        let data_pos = i64::bin_read(f)?;
        let text_seg = BinaryRead::bin_read(f)?;
        let data_seg = BinaryRead::bin_read(f)?;
        Ok(Executable { entry, text_pos, data_pos, text_seg, data_seg })
    }
}
