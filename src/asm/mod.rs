//! Everything pertaining to assembling and linking x86lite programs into
//! executable images.
//!
//! A program is an ordered list of labeled [`Elem`] blocks, each holding
//! either instructions or static data. [`assemble`] lays the blocks out in
//! the memory window (all text first, then all data), resolves every label
//! to the address of its block, and packages the result as an
//! [`Executable`](crate::common::Executable) the executor can load directly.

use std::collections::HashMap;

use log::debug;

use crate::common::*;

/// Reasons why assembly can fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AsmError {
    /// A label was used but no element defines it.
    /// Also raised when the program has no `main` entry label.
    UndefinedLabel(String),
    /// More than one element defines the same label.
    RedefinedLabel(String),
    /// The assembled image does not fit in the memory window.
    /// Stores the image size in bytes.
    ProgramTooLarge(usize),
}

/// A static data declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Data {
    /// A quadword constant (possibly a label, e.g. a function pointer).
    Quad(Imm),
    /// A zero-terminated string.
    Asciz(String),
}

/// The body of a program element: a run of instructions or of data declarations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Asm {
    Text(Vec<Ins>),
    Data(Vec<Data>),
}

/// A labeled block of code or data; the unit of program layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Elem {
    pub lbl: String,
    pub asm: Asm,
}
impl Elem {
    /// Convenience constructor for a labeled code block.
    pub fn text<L: Into<String>>(lbl: L, ins: Vec<Ins>) -> Elem {
        Elem { lbl: lbl.into(), asm: Asm::Text(ins) }
    }
    /// Convenience constructor for a labeled data block.
    pub fn data<L: Into<String>>(lbl: L, data: Vec<Data>) -> Elem {
        Elem { lbl: lbl.into(), asm: Asm::Data(data) }
    }
}

/// Size of an element's block in bytes, once laid out in memory.
fn asm_size(asm: &Asm) -> usize {
    match asm {
        Asm::Text(ins) => ins.len() * INS_SIZE,
        Asm::Data(decls) => decls.iter().map(data_size).sum(),
    }
}
fn data_size(decl: &Data) -> usize {
    match decl {
        Data::Quad(_) => 8,
        Data::Asciz(s) => s.len() + 1,
    }
}

/// Resolves an immediate against the symbol table.
fn resolve(imm: &Imm, symbols: &HashMap<&str, i64>) -> Result<i64, AsmError> {
    match imm {
        Imm::Lit(val) => Ok(*val),
        Imm::Label(lbl) => match symbols.get(lbl.as_str()) {
            Some(addr) => Ok(*addr),
            None => Err(AsmError::UndefinedLabel(lbl.clone())),
        },
    }
}
/// Replaces any label in an operand with its resolved address.
fn patch_operand(opnd: &Operand, symbols: &HashMap<&str, i64>) -> Result<Operand, AsmError> {
    Ok(match opnd {
        Operand::Imm(imm) => Operand::Imm(Imm::Lit(resolve(imm, symbols)?)),
        Operand::Abs(imm) => Operand::Abs(Imm::Lit(resolve(imm, symbols)?)),
        Operand::Disp(imm, reg) => Operand::Disp(Imm::Lit(resolve(imm, symbols)?), *reg),
        Operand::Reg(reg) => Operand::Reg(*reg),
        Operand::Ind(reg) => Operand::Ind(*reg),
    })
}

/// Assembles and links a program into an executable image.
///
/// Layout packs every text block first, in program order, starting at the
/// bottom of the memory window; all data blocks follow, also in program
/// order. Each element's label denotes the address of its block, and every
/// label occurrence is resolved to that address. The entry point is the
/// address of the `main` label.
pub fn assemble(prog: &[Elem]) -> Result<Executable, AsmError> {
    let total: usize = prog.iter().map(|elem| asm_size(&elem.asm)).sum();
    if total > MEM_SIZE {
        return Err(AsmError::ProgramTooLarge(total));
    }

    // layout pass: assign each block its address and build the symbol table
    let mut symbols: HashMap<&str, i64> = HashMap::new();
    let mut pos = MEM_BOT;
    for elem in prog.iter().filter(|elem| matches!(elem.asm, Asm::Text(_))) {
        if symbols.insert(&elem.lbl, pos).is_some() {
            return Err(AsmError::RedefinedLabel(elem.lbl.clone()));
        }
        pos += asm_size(&elem.asm) as i64;
    }
    let data_pos = pos;
    for elem in prog.iter().filter(|elem| matches!(elem.asm, Asm::Data(_))) {
        if symbols.insert(&elem.lbl, pos).is_some() {
            return Err(AsmError::RedefinedLabel(elem.lbl.clone()));
        }
        pos += asm_size(&elem.asm) as i64;
    }

    // patch pass: resolve every label and emit the segments
    let text_size = (data_pos - MEM_BOT) as usize;
    let mut text_seg = Vec::with_capacity(text_size);
    let mut data_seg = Vec::with_capacity(total - text_size);
    for elem in prog.iter() {
        match &elem.asm {
            Asm::Text(ins) => {
                for i in ins.iter() {
                    let args = i.args.iter().map(|opnd| patch_operand(opnd, &symbols));
                    let patched = Ins::new(i.op, args.collect::<Result<_, _>>()?);
                    text_seg.extend(MemCell::inst(patched));
                }
            }
            Asm::Data(decls) => {
                for decl in decls.iter() {
                    match decl {
                        Data::Quad(imm) => {
                            data_seg.extend_from_slice(&MemCell::quad(resolve(imm, &symbols)?))
                        }
                        Data::Asciz(s) => data_seg.extend(MemCell::asciz(s)),
                    }
                }
            }
        }
    }

    let entry = match symbols.get("main") {
        Some(addr) => *addr,
        None => return Err(AsmError::UndefinedLabel("main".to_owned())),
    };

    debug!(
        "assembled {} text cells at {:#x}, {} data cells at {:#x}, entry {:#x}",
        text_seg.len(),
        MEM_BOT,
        data_seg.len(),
        data_pos,
        entry
    );
    Ok(Executable { entry, text_pos: MEM_BOT, data_pos, text_seg, data_seg })
}
