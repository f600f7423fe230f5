//! End-to-end scenarios from spec.md §8, exercised against the public CFG,
//! jump-table, and LSDA APIs (S1/S2 already live as unit tests inside
//! `function::lifter`, since they need the real decoder; S5/S6 live inside
//! `orchestrator`, since `split_hot_cold` is crate-private).

use bolt_relayout::basic_block::BasicBlock;
use bolt_relayout::cfg;
use bolt_relayout::function::{CallSite, Function};
use bolt_relayout::instruction::{AnnotationValue, BranchKind, Instruction, ANNOT_EH_ACTION, ANNOT_EH_LANDING_PAD};
use bolt_relayout::isa;
use bolt_relayout::jump_table::{JumpTable, JumpTableType};

/// S3 — jump table: eight entries fan out to eight distinct blocks, and
/// moving the table to cold output doesn't touch target resolution.
#[test]
fn s3_jump_table_fans_out_to_eight_distinct_targets() {
    let mut func = Function::new("sw".into(), 0x3000, 0x40, 0x40);

    let mut dispatch = BasicBlock::new("BB0".into(), 0);
    dispatch.push_instruction(Instruction::new(1, vec![], 6, BranchKind::IndirectJump));
    func.blocks.push(dispatch);

    let mut jt = JumpTable::new(0x3100, 8, JumpTableType::Absolute);
    for i in 0..8u64 {
        let offset = 8 + i * 4;
        let mut bb = BasicBlock::new(format!("BB_{offset:x}"), offset);
        bb.push_instruction(Instruction::new(2, vec![], 1, BranchKind::Return));
        func.blocks.push(bb);
        jt.push_target(offset);
        cfg::add_successor(&mut func, 0, func.blocks.len() - 1, 0, 0);
        jt.resolve_label(i as usize, func.blocks.last().unwrap().label.clone());
    }
    func.layout = (0..func.blocks.len()).collect();
    func.jump_tables.insert(0x3100, jt);

    assert_eq!(func.blocks[0].successors.len(), 8);
    let distinct: std::collections::BTreeSet<_> = func.blocks[0].successors.iter().collect();
    assert_eq!(distinct.len(), 8);

    // Moving the table to cold output doesn't change which blocks its
    // resolved labels point at.
    let jt = func.jump_tables.get_mut(&0x3100).unwrap();
    jt.output_section = bolt_relayout::jump_table::OutputSection::Cold;
    for (i, label) in jt.labels.iter().enumerate() {
        let expected = format!("BB_{:x}", 8 + i as u64 * 4);
        assert_eq!(label.as_deref(), Some(expected.as_str()));
    }
}

/// S4 — EH function: a call covered by a landing pad produces symmetric
/// `landing_pads`/`throwers` back-pointers and an LSDA with one call-site
/// entry.
#[test]
fn s4_eh_call_site_roundtrips_through_landing_pads_and_lsda() {
    let mut func = Function::new("eh_fn".into(), 0x4000, 0x60, 0x60);

    let mut b0 = BasicBlock::new("BB0".into(), 0);
    let mut call = Instruction::new(3, vec![], 5, BranchKind::Call);
    call.add_annotation(ANNOT_EH_LANDING_PAD, AnnotationValue::Symbol("LP".into()));
    call.add_annotation(ANNOT_EH_ACTION, AnnotationValue::I64(1));
    b0.push_instruction(call);
    func.blocks.push(b0);

    let mut lp = BasicBlock::new("LP".into(), 0x40);
    lp.push_instruction(Instruction::new(4, vec![], 4, BranchKind::Other));
    func.blocks.push(lp);
    func.layout = vec![0, 1];

    cfg::recompute_landing_pads(&mut func);

    assert_eq!(func.blocks[0].landing_pads, vec![1]);
    assert_eq!(func.blocks[1].throwers, vec![0]);

    let call_sites = vec![CallSite { start: 0, length: 5, landing_pad_offset: Some(0x40), action_entry: 1 }];
    func.call_sites = call_sites.clone();

    let encoded = bolt_relayout::lsda::encode(&func.call_sites);
    let (_, decoded) = bolt_relayout::lsda::parse(&encoded).unwrap();
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].start, 0);
    assert_eq!(decoded[0].landing_pad_offset, Some(0x40));
}

/// Invariant 6 (spec.md §8): after `fix_branches`, no two consecutive
/// same-cold-ness blocks are joined by a redundant unconditional branch.
#[test]
fn fix_branches_removes_redundant_fallthrough_unconditional_branch() {
    let mut func = Function::new("f".into(), 0x5000, 16, 16);
    let mut b0 = BasicBlock::new("BB0".into(), 0);
    b0.push_instruction(Instruction::new(5, vec![], 5, BranchKind::Uncond));
    func.blocks.push(b0);
    let mut b1 = BasicBlock::new("BB1".into(), 5);
    b1.push_instruction(Instruction::new(6, vec![], 1, BranchKind::Return));
    func.blocks.push(b1);
    func.layout = vec![0, 1];
    cfg::add_successor(&mut func, 0, 1, 1, 0);

    let isa = isa::for_arch(isa::Arch::X86_64);
    cfg::fix_branches(&mut func, isa.as_ref(), &|_| false);

    assert!(cfg::validate_no_redundant_fallthrough_branch(&func, isa.as_ref(), &|_| false));
}
