use super::*;

#[test]
fn test_empty_program() {
    match assemble(&[]) {
        Err(AsmError::UndefinedLabel(lbl)) => assert_eq!(lbl, "main"),
        x => panic!("expected missing main: {:?}", x),
    }
}

#[test]
fn test_missing_main() {
    let res = assemble(&[Elem::text("start", vec![ins(OPCode::RET, vec![])])]);
    assert_eq!(res.unwrap_err(), AsmError::UndefinedLabel("main".to_owned()));
}

#[test]
fn test_entry_is_main() {
    // main need not be the first element; entry follows the label, not the layout
    let exe = assemble(&[
        Elem::text("helper", vec![ins(OPCode::RET, vec![])]),
        Elem::text("main", vec![ins(OPCode::RET, vec![])]),
    ])
    .unwrap();
    assert_eq!(exe.text_pos, MEM_BOT);
    assert_eq!(exe.entry, MEM_BOT + INS_SIZE as i64);
}

#[test]
fn test_text_layout() {
    // text blocks pack in program order, 8 bytes per instruction
    let exe = assemble(&[
        Elem::text("main", vec![
            ins(OPCode::MOV, vec![imm(0), reg(Reg::RAX)]),
            ins(OPCode::MOV, vec![imm(1), reg(Reg::RBX)]),
            ins(OPCode::RET, vec![]),
        ]),
        Elem::text("f", vec![ins(OPCode::RET, vec![])]),
        Elem::text("g", vec![ins(OPCode::RET, vec![])]),
    ])
    .unwrap();
    assert_eq!(exe.entry, MEM_BOT);
    assert_eq!(exe.text_seg.len(), 5 * INS_SIZE);
    assert_eq!(exe.data_pos, MEM_BOT + 5 * INS_SIZE as i64);
    assert!(exe.data_seg.is_empty());

    // resolve f and g by jumping to them
    let exe = assemble(&[
        Elem::text("main", vec![ins(OPCode::JMP, vec![lbl("g")])]),
        Elem::text("f", vec![ins(OPCode::RET, vec![])]),
        Elem::text("g", vec![ins(OPCode::JMP, vec![lbl("f")])]),
    ])
    .unwrap();
    match &exe.text_seg[0] {
        MemCell::Inst(i) => assert_eq!(i.args[0], imm(MEM_BOT + 2 * INS_SIZE as i64)),
        x => panic!("expected instruction head: {:?}", x),
    }
    match &exe.text_seg[2 * INS_SIZE] {
        MemCell::Inst(i) => assert_eq!(i.args[0], imm(MEM_BOT + INS_SIZE as i64)),
        x => panic!("expected instruction head: {:?}", x),
    }
}

#[test]
fn test_data_follows_text() {
    // data blocks land after all text, in program order, even when interleaved
    let exe = assemble(&[
        Elem::data("first", vec![Data::Quad(Imm::Lit(0x11))]),
        Elem::text("main", vec![ins(OPCode::RET, vec![])]),
        Elem::data("second", vec![Data::Asciz("abc".to_owned()), Data::Quad(Imm::Lit(0x22))]),
        Elem::text("f", vec![ins(OPCode::RET, vec![])]),
    ])
    .unwrap();
    assert_eq!(exe.entry, MEM_BOT);
    assert_eq!(exe.data_pos, MEM_BOT + 2 * INS_SIZE as i64);
    // first: 8 bytes, second: 4 + 8 bytes
    assert_eq!(exe.data_seg.len(), 8 + 4 + 8);
    assert_eq!(MemCell::read_quad(&exe.data_seg[..8]), 0x11);
    assert_eq!(exe.data_seg[8], MemCell::Data(b'a'));
    assert_eq!(exe.data_seg[11], MemCell::Data(0));
    assert_eq!(MemCell::read_quad(&exe.data_seg[12..]), 0x22);
}

#[test]
fn test_forward_and_data_references() {
    // labels resolve regardless of definition order
    let exe = assemble(&[
        Elem::text("main", vec![
            ins(OPCode::MOV, vec![Operand::Abs(Imm::Label("value".to_owned())), reg(Reg::RAX)]),
            ins(OPCode::RET, vec![]),
        ]),
        Elem::data("value", vec![Data::Quad(Imm::Lit(7))]),
    ])
    .unwrap();
    let expect = exe.data_pos;
    match &exe.text_seg[0] {
        MemCell::Inst(i) => assert_eq!(i.args[0], Operand::Abs(Imm::Lit(expect))),
        x => panic!("expected instruction head: {:?}", x),
    }
}

#[test]
fn test_quad_label_data() {
    // a data quadword can hold a resolved code address (a function pointer)
    let exe = assemble(&[
        Elem::text("main", vec![ins(OPCode::RET, vec![])]),
        Elem::text("f", vec![ins(OPCode::RET, vec![])]),
        Elem::data("fptr", vec![Data::Quad(Imm::Label("f".to_owned()))]),
    ])
    .unwrap();
    assert_eq!(MemCell::read_quad(&exe.data_seg), MEM_BOT + INS_SIZE as i64);
}

#[test]
fn test_undefined_label() {
    let res = assemble(&[Elem::text("main", vec![
        ins(OPCode::JMP, vec![lbl("nowhere")]),
    ])]);
    assert_eq!(res.unwrap_err(), AsmError::UndefinedLabel("nowhere".to_owned()));

    let res = assemble(&[
        Elem::text("main", vec![ins(OPCode::RET, vec![])]),
        Elem::data("d", vec![Data::Quad(Imm::Label("nowhere".to_owned()))]),
    ]);
    assert_eq!(res.unwrap_err(), AsmError::UndefinedLabel("nowhere".to_owned()));
}

#[test]
fn test_redefined_label() {
    let res = assemble(&[
        Elem::text("main", vec![ins(OPCode::RET, vec![])]),
        Elem::text("dup", vec![ins(OPCode::RET, vec![])]),
        Elem::data("dup", vec![Data::Quad(Imm::Lit(0))]),
    ]);
    assert_eq!(res.unwrap_err(), AsmError::RedefinedLabel("dup".to_owned()));
}

#[test]
fn test_program_too_large() {
    // one instruction more than the window holds
    let count = MEM_SIZE / INS_SIZE + 1;
    let body = vec![ins(OPCode::RET, vec![]); count];
    let res = assemble(&[Elem::text("main", body)]);
    assert_eq!(res.unwrap_err(), AsmError::ProgramTooLarge(count * INS_SIZE));

    // exactly full still links
    let body = vec![ins(OPCode::RET, vec![]); MEM_SIZE / INS_SIZE];
    assert!(assemble(&[Elem::text("main", body)]).is_ok());
}

#[test]
fn test_asciz_encoding() {
    let exe = assemble(&[
        Elem::text("main", vec![ins(OPCode::RET, vec![])]),
        Elem::data("empty", vec![Data::Asciz(String::new())]),
        Elem::data("msg", vec![Data::Asciz("ok".to_owned())]),
    ])
    .unwrap();
    assert_eq!(
        exe.data_seg,
        vec![
            MemCell::Data(0),
            MemCell::Data(b'o'),
            MemCell::Data(b'k'),
            MemCell::Data(0),
        ]
    );
}

#[test]
fn test_text_cells_shape() {
    let exe = assemble(&[Elem::text("main", vec![
        ins(OPCode::MOV, vec![imm(1), reg(Reg::RAX)]),
        ins(OPCode::RET, vec![]),
    ])])
    .unwrap();
    assert_eq!(exe.text_seg.len(), 2 * INS_SIZE);
    for slot in exe.text_seg.chunks(INS_SIZE) {
        assert!(matches!(slot[0], MemCell::Inst(_)));
        assert!(slot[1..].iter().all(|cell| *cell == MemCell::Tail));
    }
}

#[test]
fn test_image_serialization_roundtrip() {
    use crate::common::serialization::{BinaryRead, BinaryWrite};
    use std::io::Cursor;

    let exe = assemble(&[
        Elem::text("main", vec![
            ins(OPCode::MOV, vec![imm(5), reg(Reg::RDI)]),
            ins(OPCode::CALL, vec![lbl("f")]),
            ins(OPCode::Jcc(Cond::GE), vec![lbl("f")]),
            ins(OPCode::SETcc(Cond::NE), vec![reg(Reg::RBX)]),
            ins(OPCode::SHL, vec![reg(Reg::RCX), disp(-8, Reg::RBP)]),
            ins(OPCode::RET, vec![]),
        ]),
        Elem::text("f", vec![ins(OPCode::RET, vec![])]),
        Elem::data("stuff", vec![
            Data::Quad(Imm::Lit(i64::MIN)),
            Data::Asciz("binary".to_owned()),
        ]),
    ])
    .unwrap();

    let mut cursor = Cursor::new(Vec::new());
    exe.bin_write(&mut cursor).unwrap();
    cursor.set_position(0);
    assert_eq!(Executable::bin_read(&mut cursor).unwrap(), exe);
}

#[test]
fn test_image_deserialize_corrupt() {
    use crate::common::serialization::{BinaryRead, BinaryWrite};
    use std::io::Cursor;

    let exe = assemble(&[Elem::text("main", vec![ins(OPCode::RET, vec![])])]).unwrap();
    let mut cursor = Cursor::new(Vec::new());
    exe.bin_write(&mut cursor).unwrap();
    let mut bin = cursor.into_inner();

    // truncation is an error, not a partial image
    let mut short = Cursor::new(&bin[..bin.len() - 1]);
    assert!(Executable::bin_read(&mut short).is_err());

    // an invalid cell tag is rejected
    let last = bin.len() - 1;
    bin[last] = 0xff;
    assert!(Executable::bin_read(&mut Cursor::new(&bin)).is_err());
}
