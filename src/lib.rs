#![forbid(unsafe_code)]

//! An implementation of the x86lite machine in native, safe rust.
//!
//! x86lite is a sandboxed interpreter for a small subset of the x86-64
//! instruction set: sixteen general-purpose quadword registers plus an
//! instruction pointer, three condition flags, and a fixed 64KB
//! byte-addressable memory window. Programs are assembled and linked into a
//! self-contained executable image, loaded into an emulator, and run until
//! the instruction pointer reaches the halt sentinel, at which point the
//! accumulator holds the program's result.
//!
//! Unlike real x86, instructions are not encoded as machine bytes: each one
//! occupies an 8-byte slot in memory as a single decoded token, which keeps
//! the executor's fetch cycle trivial and well-defined.
//!
//! ```
//! use x86lite::asm::{assemble, Elem};
//! use x86lite::common::*;
//! use x86lite::exec::Emulator;
//!
//! let exe = assemble(&[Elem::text("main", vec![
//!     Ins::new(OPCode::MOV, vec![Operand::Imm(Imm::Lit(42)), Operand::Reg(Reg::RAX)]),
//!     Ins::new(OPCode::RET, vec![]),
//! ])]).unwrap();
//!
//! let mut emu = Emulator::new();
//! emu.init(&exe).unwrap();
//! assert_eq!(emu.run().unwrap(), 42);
//! ```

#[macro_use]
extern crate num_derive;
#[macro_use]
extern crate bitflags;

pub mod asm;
pub mod common;
pub mod exec;

#[cfg(test)]
mod test;
