use std::io::Cursor;

use num_traits::FromPrimitive;
use proptest::prelude::*;

use super::*;
use crate::common::serialization::{BinaryRead, BinaryWrite};
use crate::exec::registers::Flags;

fn arb_reg() -> impl Strategy<Value = Reg> {
    (0..NUM_REGS as u8).prop_map(|i| Reg::from_u8(i).unwrap())
}
fn arb_cond() -> impl Strategy<Value = Cond> {
    (0u8..6).prop_map(|i| Cond::from_u8(i).unwrap())
}
fn arb_opcode() -> impl Strategy<Value = OPCode> {
    prop_oneof![
        proptest::sample::select(vec![
            OPCode::MOV,
            OPCode::ADD,
            OPCode::SUB,
            OPCode::IMUL,
            OPCode::XOR,
            OPCode::OR,
            OPCode::AND,
            OPCode::SHL,
            OPCode::SAR,
            OPCode::SHR,
            OPCode::INC,
            OPCode::DEC,
            OPCode::NOT,
            OPCode::NEG,
            OPCode::LEA,
            OPCode::CMP,
            OPCode::PUSH,
            OPCode::POP,
            OPCode::CALL,
            OPCode::RET,
            OPCode::JMP,
        ]),
        arb_cond().prop_map(OPCode::Jcc),
        arb_cond().prop_map(OPCode::SETcc),
    ]
}
fn arb_imm() -> impl Strategy<Value = Imm> {
    prop_oneof![
        any::<i64>().prop_map(Imm::Lit),
        "[a-z_][a-z0-9_]{0,7}".prop_map(Imm::Label),
    ]
}
fn arb_operand() -> impl Strategy<Value = Operand> {
    prop_oneof![
        arb_imm().prop_map(Operand::Imm),
        arb_reg().prop_map(Operand::Reg),
        arb_imm().prop_map(Operand::Abs),
        arb_reg().prop_map(Operand::Ind),
        (arb_imm(), arb_reg()).prop_map(|(imm, reg)| Operand::Disp(imm, reg)),
    ]
}
fn arb_ins() -> impl Strategy<Value = Ins> {
    (arb_opcode(), prop::collection::vec(arb_operand(), 0..3))
        .prop_map(|(op, args)| Ins::new(op, args))
}

proptest! {
    // quadword cell encoding round-trips for every value
    #[test]
    fn prop_quad_cells_roundtrip(val in any::<i64>()) {
        prop_assert_eq!(MemCell::read_quad(&MemCell::quad(val)), val);
    }

    // any instruction survives a serialization round trip
    #[test]
    fn prop_ins_roundtrip(ins in arb_ins()) {
        let mut cursor = Cursor::new(Vec::new());
        ins.bin_write(&mut cursor).unwrap();
        cursor.set_position(0);
        prop_assert_eq!(Ins::bin_read(&mut cursor).unwrap(), ins);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // addition sets the flags exactly per the signed interpretation of the result
    #[test]
    fn prop_add_flags(a in any::<i64>(), b in any::<i64>()) {
        let (res, emu) = exec_main(vec![
            ins(OPCode::MOV, vec![imm(a), reg(Reg::RAX)]),
            ins(OPCode::ADD, vec![imm(b), reg(Reg::RAX)]),
            ins(OPCode::JMP, vec![imm(EXIT_ADDR)]),
        ]);
        let expect = a.wrapping_add(b);
        prop_assert_eq!(res, expect);
        let flags = emu.get_flags();
        prop_assert_eq!(flags.contains(Flags::ZF), expect == 0);
        prop_assert_eq!(flags.contains(Flags::SF), expect < 0);
        prop_assert_eq!(flags.contains(Flags::OF), (a < 0) == (b < 0) && (expect < 0) != (a < 0));
    }

    // subtracting i64::MIN flags overflow no matter what the destination was
    #[test]
    fn prop_sub_min_overflows(a in any::<i64>()) {
        let (res, emu) = exec_main(vec![
            ins(OPCode::MOV, vec![imm(a), reg(Reg::RAX)]),
            ins(OPCode::MOV, vec![imm(i64::MIN), reg(Reg::RBX)]),
            ins(OPCode::CMP, vec![reg(Reg::RBX), reg(Reg::RAX)]),
            ins(OPCode::JMP, vec![imm(EXIT_ADDR)]),
        ]);
        prop_assert_eq!(res, a); // cmp never writes its destination
        prop_assert!(emu.get_flags().contains(Flags::OF));
    }

    // multiplication overflows exactly when the true product needs more than 64 bits
    #[test]
    fn prop_imul_overflow(a in any::<i64>(), b in any::<i64>()) {
        let (res, emu) = exec_main(vec![
            ins(OPCode::MOV, vec![imm(a), reg(Reg::RAX)]),
            ins(OPCode::IMUL, vec![imm(b), reg(Reg::RAX)]),
            ins(OPCode::JMP, vec![imm(EXIT_ADDR)]),
        ]);
        prop_assert_eq!(res, a.wrapping_mul(b));
        prop_assert_eq!(emu.get_flags().contains(Flags::OF), a.checked_mul(b).is_none());
    }

    // a push followed by a pop restores both the value and the stack pointer
    #[test]
    fn prop_push_pop_roundtrip(val in any::<i64>()) {
        let (res, emu) = exec_main(vec![
            ins(OPCode::PUSH, vec![imm(val)]),
            ins(OPCode::POP, vec![reg(Reg::RAX)]),
            ins(OPCode::JMP, vec![imm(EXIT_ADDR)]),
        ]);
        prop_assert_eq!(res, val);
        prop_assert_eq!(emu.get_rsp(), MEM_TOP - 8);
    }

    // transport and control instructions never touch the flags
    #[test]
    fn prop_transport_flag_transparency(a in any::<i64>(), b in any::<i64>()) {
        let compare = vec![
            ins(OPCode::MOV, vec![imm(a), reg(Reg::RBX)]),
            ins(OPCode::CMP, vec![imm(b), reg(Reg::RBX)]),
        ];

        let mut baseline = compare.clone();
        baseline.push(ins(OPCode::JMP, vec![imm(EXIT_ADDR)]));
        let (_, emu) = exec_main(baseline);
        let expect = emu.get_flags();

        let mut body = compare;
        body.extend(vec![
            ins(OPCode::MOV, vec![imm(17), reg(Reg::RCX)]),
            ins(OPCode::LEA, vec![ind(Reg::RSP), reg(Reg::RDX)]),
            ins(OPCode::PUSH, vec![reg(Reg::RCX)]),
            ins(OPCode::POP, vec![reg(Reg::RSI)]),
            ins(OPCode::SETcc(Cond::L), vec![reg(Reg::R9)]),
            ins(OPCode::JMP, vec![imm(EXIT_ADDR)]),
        ]);
        let (_, emu) = exec_main(body);
        prop_assert_eq!(emu.get_flags(), expect);
        prop_assert_eq!(emu.get_r9() != 0, expect.condition_l());
    }

    // an assembled image loads at its stated positions
    #[test]
    fn prop_loaded_image_matches_segments(vals in prop::collection::vec(any::<i64>(), 1..8)) {
        let decls: Vec<Data> = vals.iter().map(|&v| Data::Quad(Imm::Lit(v))).collect();
        let prog = [
            Elem::text("main", vec![ins(OPCode::JMP, vec![imm(EXIT_ADDR)])]),
            Elem::data("table", decls),
        ];
        let exe = assemble(&prog).unwrap();
        let (_, emu) = exec_prog(&prog);
        for (i, &val) in vals.iter().enumerate() {
            prop_assert_eq!(emu.read_quad(exe.data_pos + 8 * i as i64).unwrap(), val);
        }
    }
}
