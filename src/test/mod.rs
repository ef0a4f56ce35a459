use crate::asm::*;
use crate::common::*;
use crate::exec::*;

mod asm_tests;
mod prop_tests;

fn imm(val: i64) -> Operand {
    Operand::Imm(Imm::Lit(val))
}
fn lbl(l: &str) -> Operand {
    Operand::Imm(Imm::Label(l.to_owned()))
}
fn reg(r: Reg) -> Operand {
    Operand::Reg(r)
}
fn abs(addr: i64) -> Operand {
    Operand::Abs(Imm::Lit(addr))
}
fn ind(r: Reg) -> Operand {
    Operand::Ind(r)
}
fn disp(d: i64, r: Reg) -> Operand {
    Operand::Disp(Imm::Lit(d), r)
}
fn ins(op: OPCode, args: Vec<Operand>) -> Ins {
    Ins::new(op, args)
}

/// Assembles and loads a program, asserting the emulator comes up running.
fn load(prog: &[Elem]) -> Emulator {
    let exe = assemble(prog).unwrap();
    let mut emu = Emulator::new();
    emu.init(&exe).unwrap();
    assert_eq!(emu.get_state(), State::Running);
    emu
}

/// Assembles, loads, and runs a program to the halt sentinel.
/// Returns the accumulator at halt and the stopped emulator for inspection.
fn exec_prog(prog: &[Elem]) -> (i64, Emulator) {
    let mut emu = load(prog);
    let res = emu.run().unwrap();
    assert_eq!(emu.get_state(), State::Halted(res));
    (res, emu)
}

/// Runs a single `main` text block to the halt sentinel.
fn exec_main(body: Vec<Ins>) -> (i64, Emulator) {
    exec_prog(&[Elem::text("main", body)])
}

/// Runs a program expected to fault, returning the fault.
fn exec_fault(prog: &[Elem]) -> ExecError {
    let mut emu = load(prog);
    let err = emu.run().unwrap_err();
    assert_eq!(emu.get_state(), State::Error(err));
    err
}
