//! Property tests for the universally-quantified CFG invariants of
//! spec.md §8 (1, 2, 4, 9, 10), run over randomly generated small CFGs
//! rather than hand-picked examples.

use bolt_relayout::basic_block::BasicBlock;
use bolt_relayout::cfg;
use bolt_relayout::function::Function;
use bolt_relayout::instruction::{AnnotationValue, BranchKind, Instruction, ANNOT_OFFSET};
use bolt_relayout::output_mapper::{self, AddressRange};
use quickcheck_macros::quickcheck;

/// Builds an N-block function with no edges, instructions carrying the
/// given per-block sizes.
fn function_with_blocks(sizes: &[u8]) -> Function {
    let mut func = Function::new("f".into(), 0x1000, sizes.iter().map(|&s| s as u64).sum(), 0x10000);
    let mut offset = 0u64;
    for (i, &size) in sizes.iter().enumerate() {
        let mut bb = BasicBlock::new(format!("BB{i}"), offset);
        let size = size.max(1);
        let mut insn = Instruction::new(1, vec![], size, BranchKind::Other);
        insn.add_annotation(ANNOT_OFFSET, AnnotationValue::U64(offset));
        bb.push_instruction(insn);
        bb.end_offset = offset + u64::from(size);
        func.blocks.push(bb);
        offset += u64::from(size);
    }
    func.layout = (0..func.blocks.len()).collect();
    func
}

/// Invariants 1/2/4 (spec.md §8): after any sequence of `add_successor`/
/// `remove_successor` calls, successor/predecessor and landing-pad/thrower
/// back-pointers stay symmetric and `branch_info` stays parallel to
/// `successors`.
#[quickcheck]
fn successor_invariants_survive_random_edit_sequence(block_count: u8, edits: Vec<(u8, u8, bool)>) -> bool {
    let n = (block_count % 8).max(1) as usize;
    let mut func = function_with_blocks(&vec![4u8; n]);

    for (src, dst, add) in edits {
        let src = src as usize % n;
        let dst = dst as usize % n;
        if src == dst {
            continue;
        }
        if add {
            cfg::add_successor(&mut func, src, dst, 1, 0);
        } else {
            cfg::remove_successor(&mut func, src, dst);
        }
    }

    cfg::validate_cfg(&func).is_ok()
}

/// Invariant 9 (spec.md §8): translating the input offset of any live
/// instruction lands inside that instruction's own output range.
#[quickcheck]
fn address_translation_lands_inside_owning_instruction(sizes: Vec<u8>) -> bool {
    if sizes.is_empty() || sizes.len() > 8 {
        return true;
    }
    let func = function_with_blocks(&sizes);
    let table = output_mapper::build_emission_table(&func, &|bid| 0x9000 + (bid as u64) * 0x100);

    for block in &func.blocks {
        for insn in &block.instructions {
            let Some(off) = insn.offset() else { continue };
            let input_addr = func.address + off;
            let Some(output_addr) = output_mapper::translate_input_to_output_address(&table, input_addr) else {
                return false;
            };
            let entry = table.iter().find(|e| e.input_offset == off).unwrap();
            if output_addr < entry.output_address || output_addr >= entry.output_address + u64::from(entry.size.max(1)) {
                return false;
            }
        }
    }
    true
}

/// Invariant 10 (spec.md §8): a range fully contained in one block
/// translates to an output range of the same length.
#[test]
fn range_translation_preserves_length_within_a_block() {
    let func = function_with_blocks(&[4, 4, 4]);
    let table = output_mapper::build_emission_table(&func, &|bid| 0x9000 + (bid as u64) * 0x100);

    let input = AddressRange { start: func.address, end: func.address + 4 };
    let output = output_mapper::translate_input_to_output_ranges(&table, &func, input);
    assert_eq!(output.len(), 1);
    assert_eq!(output[0].end - output[0].start, input.end - input.start);
}
