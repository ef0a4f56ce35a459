//! Everything pertaining to executing x86lite executables.

use log::{debug, trace};

use crate::common::*;

pub mod registers;

mod alu;

use registers::*;

/// Current state of an emulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// The emulator has not been initialized with a program to run.
    Uninitialized,
    /// The emulator is ready to execute more instructions.
    Running,
    /// The instruction pointer reached the halt sentinel.
    /// Stores the value of the accumulator at halt.
    Halted(i64),
    /// The emulator terminated due to an error.
    Error(ExecError),
}

/// Reasons why an error can happen during execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecError {
    /// A load, store, or fetch used an address outside the emulated window.
    /// Stores the offending address.
    SegFault(i64),
    /// The instruction pointer did not point at the head of an instruction slot.
    /// This is impossible if the assembler was used to create the executable,
    /// unless the program overwrote its own text segment.
    NonInstruction(i64),
    /// An operand still carried an unresolved label at execute time.
    /// This is impossible for images produced by the assembler, which resolves
    /// every label or fails.
    UnresolvedLabel,
    /// An instruction had the wrong number of operands for its op code.
    BadArity(OPCode),
    /// An operand had a form its op code cannot accept,
    /// e.g. an immediate destination or a non-memory `LEA` source.
    BadOperand(OPCode),
    /// A shift amount was neither an immediate nor held in `RCX`.
    BadShiftAmount,
}

/// Reason why execution stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Emulator was not in the running state.
    NotRunning,
    /// Emulator executed the requested number of cycles.
    MaxCycles,
    /// An error was encountered during execution.
    /// For convenience, this variant stores the error,
    /// but it can also be accessed by testing the emulator state.
    Error(ExecError),
    /// The instruction pointer reached the halt sentinel.
    /// For convenience, this variant stores the accumulator value,
    /// but it can also be accessed by testing the emulator state.
    Halted(i64),
}

macro_rules! register_aliases {
    ($($reg:ident => $get:ident : $set:ident),*$(,)?) => {$(
        pub fn $get(&self) -> i64 {
            self.regs[Reg::$reg]
        }
        pub fn $set(&mut self, val: i64) {
            self.regs[Reg::$reg] = val;
        }
    )*}
}

pub struct Emulator {
    mem: Vec<MemCell>,
    regs: RegFile,
    flags: Flags,
    state: State,
}
impl Emulator {
    /// Creates a new emulator in the uninitialized state.
    pub fn new() -> Emulator {
        Emulator {
            mem: vec![],
            regs: RegFile::new(),
            flags: Flags::empty(),
            state: State::Uninitialized,
        }
    }

    /// Initializes the emulator to run the provided executable.
    ///
    /// Memory is reset to zeroed data cells and the text and data segments are
    /// copied to their load addresses. Every register starts at zero except the
    /// instruction pointer, which starts at the image's entry point, and the
    /// stack pointer, which starts at the last legal quadword address. That
    /// quadword is seeded with the halt sentinel, so a `RET` from the entry
    /// procedure terminates execution cleanly.
    ///
    /// Fails with a segfault if either segment does not fit at its load address.
    pub fn init(&mut self, exe: &Executable) -> Result<(), ExecError> {
        self.mem.clear();
        self.mem.resize(MEM_SIZE, MemCell::Data(0));
        self.blit(exe.text_pos, &exe.text_seg)?;
        self.blit(exe.data_pos, &exe.data_seg)?;

        self.regs.clear();
        self.flags = Flags::empty();
        self.regs[Reg::RIP] = exe.entry;
        self.regs[Reg::RSP] = MEM_TOP - 8;
        self.write_quad(MEM_TOP - 8, EXIT_ADDR)?;

        debug!(
            "loaded image: {} text cells at {:#x}, {} data cells at {:#x}, entry {:#x}",
            exe.text_seg.len(),
            exe.text_pos,
            exe.data_seg.len(),
            exe.data_pos,
            exe.entry
        );
        self.state = State::Running;
        Ok(())
    }

    /// Copies a run of cells into memory starting at the given address.
    fn blit(&mut self, pos: i64, cells: &[MemCell]) -> Result<(), ExecError> {
        if cells.is_empty() {
            return Ok(());
        }
        let lo = Self::mem_index(pos)?;
        if MEM_SIZE - lo < cells.len() {
            return Err(ExecError::SegFault(pos));
        }
        self.mem[lo..lo + cells.len()].clone_from_slice(cells);
        Ok(())
    }

    /// Gets the current state of the emulator.
    pub fn get_state(&self) -> State {
        self.state
    }
    /// Gets the current condition flags.
    pub fn get_flags(&self) -> Flags {
        self.flags
    }

    register_aliases! {
        RAX => get_rax: set_rax,
        RBX => get_rbx: set_rbx,
        RCX => get_rcx: set_rcx,
        RDX => get_rdx: set_rdx,
        RSI => get_rsi: set_rsi,
        RDI => get_rdi: set_rdi,
        RBP => get_rbp: set_rbp,
        RSP => get_rsp: set_rsp,
        R8 => get_r8: set_r8,
        R9 => get_r9: set_r9,
        R10 => get_r10: set_r10,
        R11 => get_r11: set_r11,
        R12 => get_r12: set_r12,
        R13 => get_r13: set_r13,
        R14 => get_r14: set_r14,
        R15 => get_r15: set_r15,
        RIP => get_rip: set_rip,
    }

    // -------------------------------------------------------------------------------------

    /// Maps an address to its index in the memory array.
    /// Anything outside the emulated window is a segfault.
    fn mem_index(addr: i64) -> Result<usize, ExecError> {
        if MEM_BOT <= addr && addr < MEM_TOP {
            Ok((addr - MEM_BOT) as usize)
        } else {
            Err(ExecError::SegFault(addr))
        }
    }

    /// Reads the quadword stored in the eight cells starting at the given address.
    /// Cells that are not data bytes read as zero.
    pub fn read_quad(&self, addr: i64) -> Result<i64, ExecError> {
        let lo = Self::mem_index(addr)?;
        Self::mem_index(addr + 7)?;
        Ok(MemCell::read_quad(&self.mem[lo..lo + 8]))
    }
    /// Writes a quadword as eight data cells starting at the given address.
    /// Whatever the cells held before is clobbered, instruction slots included.
    pub fn write_quad(&mut self, addr: i64, val: i64) -> Result<(), ExecError> {
        let lo = Self::mem_index(addr)?;
        Self::mem_index(addr + 7)?;
        self.mem[lo..lo + 8].clone_from_slice(&MemCell::quad(val));
        Ok(())
    }

    // -------------------------------------------------------------------------------------

    /// Computes the address denoted by a memory operand.
    fn effective_addr(&self, opnd: &Operand) -> Result<i64, ExecError> {
        match opnd {
            Operand::Abs(Imm::Lit(addr)) => Ok(*addr),
            Operand::Ind(reg) => Ok(self.regs[*reg]),
            Operand::Disp(Imm::Lit(disp), reg) => Ok(self.regs[*reg].wrapping_add(*disp)),
            Operand::Abs(Imm::Label(_)) | Operand::Disp(Imm::Label(_), _) => {
                Err(ExecError::UnresolvedLabel)
            }
            Operand::Imm(_) | Operand::Reg(_) => panic!(), // callers filter out non-memory operands
        }
    }

    /// Reads the value an operand denotes: the immediate itself, the contents
    /// of a register, or the quadword at a memory operand's address.
    fn read_operand(&self, opnd: &Operand) -> Result<i64, ExecError> {
        match opnd {
            Operand::Imm(Imm::Lit(val)) => Ok(*val),
            Operand::Imm(Imm::Label(_)) => Err(ExecError::UnresolvedLabel),
            Operand::Reg(reg) => Ok(self.regs[*reg]),
            _ => self.read_quad(self.effective_addr(opnd)?),
        }
    }
    /// Stores a value to the location an operand denotes.
    /// An immediate is not a location, so it fails as a bad operand for `op`.
    fn write_operand(&mut self, op: OPCode, opnd: &Operand, val: i64) -> Result<(), ExecError> {
        match opnd {
            Operand::Imm(_) => Err(ExecError::BadOperand(op)),
            Operand::Reg(reg) => {
                self.regs[*reg] = val;
                Ok(())
            }
            _ => {
                let addr = self.effective_addr(opnd)?;
                self.write_quad(addr, val)
            }
        }
    }

    // -------------------------------------------------------------------------------------

    /// Resumes execution of the emulator for up to the given number of cycles.
    /// Returns the number of cycles executed and the reason for stopping.
    pub fn execute_cycles(&mut self, cycles: u64) -> (u64, StopReason) {
        if self.state != State::Running {
            return (0, StopReason::NotRunning);
        }

        macro_rules! error_state {
            ($self:ident => $err:expr) => {{
                let e = $err;
                $self.state = State::Error(e);
                StopReason::Error(e)
            }};
        }

        for cycle in 0..cycles {
            let ip = self.regs[Reg::RIP];
            if ip == EXIT_ADDR {
                let res = self.regs[Reg::RAX];
                debug!("halt sentinel reached: rax = {}", res);
                self.state = State::Halted(res);
                return (cycle, StopReason::Halted(res));
            }

            let ins = match self.fetch(ip) {
                Err(e) => return (cycle, error_state!(self => e)),
                Ok(ins) => ins,
            };
            trace!("{:#x}: {:?}", ip, ins);
            self.regs[Reg::RIP] = ip.wrapping_add(INS_SIZE as i64); // control flow overwrites this

            let res = match ins.op {
                OPCode::MOV => self.exec_mov(&ins.args),
                OPCode::LEA => self.exec_lea(&ins.args),

                OPCode::ADD | OPCode::SUB | OPCode::IMUL | OPCode::AND | OPCode::OR | OPCode::XOR => {
                    self.exec_binary(ins.op, &ins.args)
                }
                OPCode::SHL | OPCode::SAR | OPCode::SHR => self.exec_shift(ins.op, &ins.args),
                OPCode::INC | OPCode::DEC | OPCode::NOT | OPCode::NEG => {
                    self.exec_unary(ins.op, &ins.args)
                }
                OPCode::CMP => self.exec_cmp(&ins.args),

                OPCode::PUSH => self.exec_push(&ins.args),
                OPCode::POP => self.exec_pop(&ins.args),
                OPCode::CALL => self.exec_call(&ins.args),
                OPCode::RET => self.exec_ret(&ins.args),
                OPCode::JMP => self.exec_jmp(&ins.args),
                OPCode::Jcc(cond) => self.exec_jcc(cond, &ins.args),
                OPCode::SETcc(cond) => self.exec_setcc(cond, &ins.args),
            };
            if let Err(e) = res {
                return (cycle, error_state!(self => e));
            }
        }

        (cycles, StopReason::MaxCycles)
    }

    /// Runs the program until the halt sentinel, returning the accumulator,
    /// or until a fault, returning it. An emulator that already stopped
    /// reports its prior outcome; one that was never initialized reports the
    /// invalid fetch at its zeroed instruction pointer.
    pub fn run(&mut self) -> Result<i64, ExecError> {
        loop {
            match self.execute_cycles(u64::MAX).1 {
                StopReason::Halted(res) => return Ok(res),
                StopReason::Error(e) => return Err(e),
                StopReason::NotRunning => match self.state {
                    State::Halted(res) => return Ok(res),
                    State::Error(e) => return Err(e),
                    _ => return Err(ExecError::SegFault(self.regs[Reg::RIP])),
                },
                StopReason::MaxCycles => (),
            }
        }
    }

    /// Fetches the instruction at the given address.
    fn fetch(&self, ip: i64) -> Result<Ins, ExecError> {
        match &self.mem[Self::mem_index(ip)?] {
            MemCell::Inst(ins) => Ok(ins.clone()),
            _ => Err(ExecError::NonInstruction(ip)),
        }
    }

    // -------------------------------------------------------------------------------------

    fn exec_mov(&mut self, args: &[Operand]) -> Result<(), ExecError> {
        let (src, dest) = two_args(OPCode::MOV, args)?;
        let val = self.read_operand(src)?;
        self.write_operand(OPCode::MOV, dest, val)
    }

    fn exec_lea(&mut self, args: &[Operand]) -> Result<(), ExecError> {
        let (src, dest) = two_args(OPCode::LEA, args)?;
        match src {
            Operand::Abs(_) | Operand::Ind(_) | Operand::Disp(..) => {
                let addr = self.effective_addr(src)?;
                self.write_operand(OPCode::LEA, dest, addr)
            }
            _ => Err(ExecError::BadOperand(OPCode::LEA)),
        }
    }

    fn exec_binary(&mut self, op: OPCode, args: &[Operand]) -> Result<(), ExecError> {
        let (src, dest) = two_args(op, args)?;
        let b = self.read_operand(src)?;
        let a = self.read_operand(dest)?;
        let result = match op {
            OPCode::ADD => alu::add_with_flags(&mut self.flags, a, b),
            OPCode::SUB => alu::sub_with_flags(&mut self.flags, a, b),
            OPCode::IMUL => alu::imul_with_flags(&mut self.flags, a, b),
            OPCode::AND => alu::logic_with_flags(&mut self.flags, a & b),
            OPCode::OR => alu::logic_with_flags(&mut self.flags, a | b),
            OPCode::XOR => alu::logic_with_flags(&mut self.flags, a ^ b),
            _ => panic!(), // dispatch routes only the binary arithmetic op codes here
        };
        self.write_operand(op, dest, result)
    }

    fn exec_unary(&mut self, op: OPCode, args: &[Operand]) -> Result<(), ExecError> {
        let dest = one_arg(op, args)?;
        let a = self.read_operand(dest)?;
        let result = match op {
            OPCode::INC => alu::add_with_flags(&mut self.flags, a, 1),
            OPCode::DEC => alu::sub_with_flags(&mut self.flags, a, 1),
            OPCode::NOT => alu::logic_with_flags(&mut self.flags, !a),
            OPCode::NEG => alu::neg_with_flags(&mut self.flags, a),
            _ => panic!(), // dispatch routes only the unary op codes here
        };
        self.write_operand(op, dest, result)
    }

    fn exec_shift(&mut self, op: OPCode, args: &[Operand]) -> Result<(), ExecError> {
        let (amt, dest) = two_args(op, args)?;
        match amt {
            Operand::Imm(Imm::Lit(_)) | Operand::Reg(Reg::RCX) => (),
            Operand::Imm(Imm::Label(_)) => return Err(ExecError::UnresolvedLabel),
            _ => return Err(ExecError::BadShiftAmount),
        }
        let amount = (self.read_operand(amt)? & 63) as u32;
        let a = self.read_operand(dest)?;
        let result = match op {
            OPCode::SHL => alu::shl_with_flags(&mut self.flags, a, amount),
            OPCode::SAR => alu::sar_with_flags(&mut self.flags, a, amount),
            OPCode::SHR => alu::shr_with_flags(&mut self.flags, a, amount),
            _ => panic!(), // dispatch routes only the shift op codes here
        };
        self.write_operand(op, dest, result)
    }

    fn exec_cmp(&mut self, args: &[Operand]) -> Result<(), ExecError> {
        let (src, dest) = two_args(OPCode::CMP, args)?;
        let b = self.read_operand(src)?;
        let a = self.read_operand(dest)?;
        alu::sub_with_flags(&mut self.flags, a, b); // flags only, result discarded
        Ok(())
    }

    // -------------------------------------------------------------------------------------

    /// Pushes a quadword onto the stack: decrement, then store.
    fn push_quad(&mut self, val: i64) -> Result<(), ExecError> {
        let pos = self.regs[Reg::RSP].wrapping_sub(8);
        self.write_quad(pos, val)?;
        self.regs[Reg::RSP] = pos;
        Ok(())
    }
    /// Pops a quadword off the stack: read, then increment.
    fn pop_quad(&mut self) -> Result<i64, ExecError> {
        let pos = self.regs[Reg::RSP];
        let val = self.read_quad(pos)?;
        self.regs[Reg::RSP] = pos.wrapping_add(8);
        Ok(val)
    }

    fn exec_push(&mut self, args: &[Operand]) -> Result<(), ExecError> {
        let src = one_arg(OPCode::PUSH, args)?;
        let val = self.read_operand(src)?;
        self.push_quad(val)
    }

    fn exec_pop(&mut self, args: &[Operand]) -> Result<(), ExecError> {
        let dest = one_arg(OPCode::POP, args)?;
        let val = self.read_quad(self.regs[Reg::RSP])?;
        self.write_operand(OPCode::POP, dest, val)?;
        self.regs[Reg::RSP] = self.regs[Reg::RSP].wrapping_add(8);
        Ok(())
    }

    fn exec_call(&mut self, args: &[Operand]) -> Result<(), ExecError> {
        let src = one_arg(OPCode::CALL, args)?;
        let target = self.read_operand(src)?;
        let ret_addr = self.regs[Reg::RIP]; // already advanced past the call
        self.push_quad(ret_addr)?;
        self.regs[Reg::RIP] = target;
        Ok(())
    }

    fn exec_ret(&mut self, args: &[Operand]) -> Result<(), ExecError> {
        if !args.is_empty() {
            return Err(ExecError::BadArity(OPCode::RET));
        }
        let addr = self.pop_quad()?;
        self.regs[Reg::RIP] = addr;
        Ok(())
    }

    fn exec_jmp(&mut self, args: &[Operand]) -> Result<(), ExecError> {
        let src = one_arg(OPCode::JMP, args)?;
        self.regs[Reg::RIP] = self.read_operand(src)?;
        Ok(())
    }

    fn exec_jcc(&mut self, cond: Cond, args: &[Operand]) -> Result<(), ExecError> {
        let src = one_arg(OPCode::Jcc(cond), args)?;
        if self.flags.condition(cond) {
            self.regs[Reg::RIP] = self.read_operand(src)?;
        }
        Ok(())
    }

    fn exec_setcc(&mut self, cond: Cond, args: &[Operand]) -> Result<(), ExecError> {
        let dest = one_arg(OPCode::SETcc(cond), args)?;
        let val = if self.flags.condition(cond) { 1 } else { 0 };
        self.write_operand(OPCode::SETcc(cond), dest, val)
    }
}
impl Default for Emulator {
    fn default() -> Self {
        Emulator::new()
    }
}

/// Destructures a single-operand argument list, or fails with the arity error for `op`.
fn one_arg(op: OPCode, args: &[Operand]) -> Result<&Operand, ExecError> {
    match args {
        [arg] => Ok(arg),
        _ => Err(ExecError::BadArity(op)),
    }
}
/// Destructures a `(src, dest)` argument list, or fails with the arity error for `op`.
fn two_args(op: OPCode, args: &[Operand]) -> Result<(&Operand, &Operand), ExecError> {
    match args {
        [src, dest] => Ok((src, dest)),
        _ => Err(ExecError::BadArity(op)),
    }
}
