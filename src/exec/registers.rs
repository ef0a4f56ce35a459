//! Various types of emulated hardware registers.

use std::ops::{Index, IndexMut};

use crate::common::{Cond, Reg, NUM_REGS};

/// The machine's register file: one signed quadword per register, including
/// the instruction pointer.
#[derive(Clone)]
pub struct RegFile([i64; NUM_REGS]);
impl RegFile {
    pub fn new() -> RegFile {
        RegFile([0; NUM_REGS])
    }
    /// Zeroes every register.
    pub fn clear(&mut self) {
        self.0 = [0; NUM_REGS];
    }
}
impl Default for RegFile {
    fn default() -> Self {
        RegFile::new()
    }
}
impl Index<Reg> for RegFile {
    type Output = i64;
    fn index(&self, reg: Reg) -> &i64 {
        &self.0[reg as usize]
    }
}
impl IndexMut<Reg> for RegFile {
    fn index_mut(&mut self, reg: Reg) -> &mut i64 {
        &mut self.0[reg as usize]
    }
}

#[test]
fn test_reg_file() {
    let mut regs = RegFile::new();
    assert_eq!(regs[Reg::RAX], 0);
    assert_eq!(regs[Reg::RIP], 0);

    regs[Reg::RAX] = 0x2049381758392734;
    regs[Reg::R15] = -55;
    assert_eq!(regs[Reg::RAX], 0x2049381758392734);
    assert_eq!(regs[Reg::R15], -55);
    assert_eq!(regs[Reg::RBX], 0);

    regs.clear();
    assert_eq!(regs[Reg::RAX], 0);
    assert_eq!(regs[Reg::R15], 0);
}

bitflags! {
    /// The machine's condition flags, stored at their x86 bit positions.
    pub struct Flags: u64 {
        /// Zero flag: the most recent flag-affecting result was zero.
        const ZF = 0x0040;
        /// Sign flag: the most recent flag-affecting result was negative.
        const SF = 0x0080;
        /// Overflow flag: the most recent flag-affecting operation overflowed
        /// signed quadword arithmetic.
        const OF = 0x0800;
    }
}
impl Flags {
    pub fn condition_e(self) -> bool {
        self.contains(Flags::ZF)
    }
    pub fn condition_ne(self) -> bool {
        !self.condition_e()
    }
    pub fn condition_l(self) -> bool {
        self.contains(Flags::SF) != self.contains(Flags::OF)
    }
    pub fn condition_le(self) -> bool {
        self.condition_l() || self.condition_e()
    }
    pub fn condition_g(self) -> bool {
        !self.condition_le()
    }
    pub fn condition_ge(self) -> bool {
        !self.condition_l()
    }

    /// Evaluates a condition code against these flags.
    pub fn condition(self, cond: Cond) -> bool {
        match cond {
            Cond::E => self.condition_e(),
            Cond::NE => self.condition_ne(),
            Cond::L => self.condition_l(),
            Cond::LE => self.condition_le(),
            Cond::G => self.condition_g(),
            Cond::GE => self.condition_ge(),
        }
    }
}

#[test]
fn test_conditions() {
    // every combination of the three flags against every condition code
    for &of in &[false, true] {
        for &sf in &[false, true] {
            for &zf in &[false, true] {
                let mut flags = Flags::empty();
                flags.set(Flags::OF, of);
                flags.set(Flags::SF, sf);
                flags.set(Flags::ZF, zf);

                assert_eq!(flags.condition(Cond::E), zf);
                assert_eq!(flags.condition(Cond::NE), !zf);
                assert_eq!(flags.condition(Cond::L), sf != of);
                assert_eq!(flags.condition(Cond::GE), sf == of);
                assert_eq!(flags.condition(Cond::LE), sf != of || zf);
                assert_eq!(flags.condition(Cond::G), sf == of && !zf);
            }
        }
    }
}
