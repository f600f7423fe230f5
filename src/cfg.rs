//! The CFG Manipulator (spec.md §4.3): invariant maintenance under
//! mutation, unreachable-block elimination, conditional-tail-call
//! lowering, branch fixing against the final layout, and CFI state
//! finalization.

use std::collections::BTreeSet;

use crate::basic_block::{BasicBlock, BranchInfo, BlockId};
use crate::cfi::CfiProgram;
use crate::error::Error;
use crate::function::Function;
use crate::instruction::{AnnotationValue, CFIKind, Instruction, ANNOT_CONDITIONAL_TAIL_CALL};
use crate::isa::InstructionAnalysis;

/// §4.3.1: `addSuccessor`/`removeSuccessor`/`replaceSuccessor`/
/// `swapConditionalSuccessors`, the only ways to touch the parallel
/// successor/branch-info/predecessor vectors.
pub fn add_successor(func: &mut Function, src: BlockId, dst: BlockId, count: u64, mispredicted: u64) {
    func.blocks[src].successors.push(dst);
    func.blocks[src].branch_info.push(BranchInfo { count, mispredicted_count: mispredicted });
    func.blocks[dst].predecessors.push(src);
}

pub fn remove_successor(func: &mut Function, src: BlockId, dst: BlockId) {
    let Some(idx) = func.blocks[src].successor_index(dst) else { return };
    func.blocks[src].successors.remove(idx);
    func.blocks[src].branch_info.remove(idx);
    if let Some(pos) = func.blocks[dst].predecessors.iter().position(|&p| p == src) {
        func.blocks[dst].predecessors.remove(pos);
    }
}

pub fn replace_successor(func: &mut Function, src: BlockId, old: BlockId, new: BlockId) {
    let Some(idx) = func.blocks[src].successor_index(old) else { return };
    func.blocks[src].successors[idx] = new;
    if let Some(pos) = func.blocks[old].predecessors.iter().position(|&p| p == src) {
        func.blocks[old].predecessors.remove(pos);
    }
    func.blocks[new].predecessors.push(src);
}

/// The only way to flip a conditional's taken direction while keeping
/// `branch_info` aligned (spec.md §4.3.1).
pub fn swap_conditional_successors(block: &mut BasicBlock) {
    if block.successors.len() == 2 {
        block.successors.swap(0, 1);
        block.branch_info.swap(0, 1);
    }
}

/// §4.3.2: DFS from entry points and landing pads; anything unreached is
/// moved to the deleted-blocks arena, except blocks ending in an indirect
/// branch (jump-table targets are reached through data, not edges).
pub fn eliminate_unreachable_blocks(func: &mut Function, isa: &dyn InstructionAnalysis) {
    let mut seeds: Vec<BlockId> = func
        .entry_points
        .iter()
        .filter_map(|&off| func.block_containing_offset(off))
        .collect();
    // Landing pads are themselves entry points into the live set.
    for block in &func.blocks {
        for &lp in &block.landing_pads {
            seeds.push(lp);
        }
    }

    let mut live: BTreeSet<BlockId> = BTreeSet::new();
    let mut worklist = seeds;
    while let Some(id) = worklist.pop() {
        if !live.insert(id) {
            continue;
        }
        for &succ in &func.blocks[id].successors {
            worklist.push(succ);
        }
    }

    for (i, block) in func.blocks.iter().enumerate() {
        let ends_in_indirect = block.instructions.last().map(|i| isa.is_indirect_branch(i)).unwrap_or(false);
        if live.contains(&i) || ends_in_indirect {
            live.insert(i);
        }
    }

    let dead: Vec<BlockId> = (0..func.blocks.len()).filter(|i| !live.contains(i)).collect();
    for &id in dead.iter().rev() {
        for succ in func.blocks[id].successors.clone() {
            remove_successor(func, id, succ);
        }
        for pred in func.blocks[id].predecessors.clone() {
            remove_successor(func, pred, id);
        }
        let removed = func.blocks.remove(id);
        func.deleted_blocks.push(removed);
        func.layout.retain(|&b| b != id);
        shift_block_ids_above(func, id);
    }

    recompute_landing_pads(func);
}

/// Block removal from a `Vec` shifts every later index down by one; every
/// stored `BlockId` above the removed index needs the same shift so
/// `successors`/`predecessors`/`layout`/`landing_pads`/`throwers` stay
/// consistent with the new storage positions.
fn shift_block_ids_above(func: &mut Function, removed: BlockId) {
    let shift = |id: &mut BlockId| {
        if *id > removed {
            *id -= 1;
        }
    };
    for id in &mut func.layout {
        shift(id);
    }
    for block in &mut func.blocks {
        for s in &mut block.successors {
            shift(s);
        }
        for p in &mut block.predecessors {
            shift(p);
        }
        for lp in &mut block.landing_pads {
            shift(lp);
        }
        for t in &mut block.throwers {
            shift(t);
        }
    }
}

pub fn recompute_landing_pads(func: &mut Function) {
    for block in &mut func.blocks {
        block.landing_pads.clear();
        block.throwers.clear();
    }
    let mut edges = Vec::new();
    for (bi, block) in func.blocks.iter().enumerate() {
        for insn in &block.instructions {
            if let Some(AnnotationValue::Symbol(label)) = insn.get_annotation(crate::instruction::ANNOT_EH_LANDING_PAD)
            {
                edges.push((bi, label.clone()));
            }
        }
    }
    for (thrower, label) in edges {
        let Some(lp) = func.blocks.iter().position(|b| b.label == label) else { continue };
        if !func.blocks[thrower].landing_pads.contains(&lp) {
            func.blocks[thrower].landing_pads.push(lp);
        }
        if !func.blocks[lp].throwers.contains(&thrower) {
            func.blocks[lp].throwers.push(thrower);
        }
    }
}

/// §4.3.3: lowers each conditional-tail-call into a synthesized
/// unconditional-tail-call block plus a plain conditional branch to it.
pub fn lower_conditional_tail_calls(func: &mut Function, isa: &dyn InstructionAnalysis) {
    let mut ctcs = Vec::new();
    for (bi, block) in func.blocks.iter().enumerate() {
        for (ii, insn) in block.instructions.iter().enumerate() {
            if let Some(target) = isa.get_conditional_tail_call_target(insn) {
                ctcs.push((bi, ii, target, block.cfi_state_at_entry));
            }
        }
    }

    for (bi, ii, target, cfi_state) in ctcs {
        let mut new_block = BasicBlock::new(format!("{}.ctc{}", func.blocks[bi].label, ii), func.blocks[bi].end_offset);
        new_block.instructions.push(isa.create_tail_call(&target));
        new_block.cfi_state_at_entry = cfi_state;
        new_block.valid = true;

        let taken_count = func.blocks[bi]
            .instructions
            .get(ii)
            .and_then(|i| i.get_annotation(crate::instruction::ANNOT_CTC_TAKEN_COUNT))
            .and_then(AnnotationValue::as_u64)
            .unwrap_or(0);
        let mispred_count = func.blocks[bi]
            .instructions
            .get(ii)
            .and_then(|i| i.get_annotation(crate::instruction::ANNOT_CTC_MISPRED_COUNT))
            .and_then(AnnotationValue::as_u64)
            .unwrap_or(0);

        func.blocks.push(new_block);
        let new_id = func.blocks.len() - 1;
        func.layout.push(new_id);

        isa.convert_tail_call_to_jmp(&mut func.blocks[bi].instructions[ii]);
        isa.replace_branch_target(&mut func.blocks[bi].instructions[ii], &func.blocks[new_id].label.clone());
        add_successor(func, bi, new_id, taken_count, mispred_count);
        swap_conditional_successors(&mut func.blocks[bi]);
        func.blocks[bi].instructions[ii].remove_annotation(ANNOT_CONDITIONAL_TAIL_CALL);
    }
}

/// §4.3.4: fixes branch instructions in every block to match the current
/// layout (`NextBB` = the following live block with matching cold-ness).
pub fn fix_branches(func: &mut Function, isa: &dyn InstructionAnalysis, is_cold: &dyn Fn(BlockId) -> bool) {
    let layout = func.layout.clone();
    for (i, &bid) in layout.iter().enumerate() {
        let next = layout.get(i + 1).copied().filter(|&n| is_cold(n) == is_cold(bid));
        let successors = func.blocks[bid].successors.clone();
        match successors.len() {
            0 => {}
            1 => {
                let target = successors[0];
                func.blocks[bid].instructions.retain(|insn| !isa.is_branch(insn));
                if Some(target) != next {
                    let target_label = func.blocks[target].label.clone();
                    func.blocks[bid].instructions.push(isa.create_uncond_branch(&target_label));
                }
            }
            2 => {
                let (t, f) = (successors[0], successors[1]);
                if t == f {
                    remove_successor(func, bid, f);
                    let target_label = func.blocks[t].label.clone();
                    func.blocks[bid].instructions.retain(|insn| !isa.is_unconditional_branch(insn));
                    if Some(t) != next {
                        func.blocks[bid].instructions.push(isa.create_uncond_branch(&target_label));
                    }
                    continue;
                }
                let cond_idx = func.blocks[bid]
                    .instructions
                    .iter()
                    .position(|insn| isa.is_conditional_branch(insn));
                let Some(cond_idx) = cond_idx else { continue };
                if Some(t) == next {
                    let f_label = func.blocks[f].label.clone();
                    let insn = &mut func.blocks[bid].instructions[cond_idx];
                    isa.reverse_branch_condition(insn, &f_label);
                    swap_conditional_successors(&mut func.blocks[bid]);
                } else {
                    let t_label = func.blocks[t].label.clone();
                    let insn = &mut func.blocks[bid].instructions[cond_idx];
                    isa.replace_branch_target(insn, &t_label);
                }
                let successors_after = func.blocks[bid].successors.clone();
                let f_after = successors_after[1];
                if Some(f_after) != next {
                    let f_label = func.blocks[f_after].label.clone();
                    func.blocks[bid].instructions.push(isa.create_uncond_branch(&f_label));
                }
            }
            _ => {
                // Jump-table block: leave branches alone.
            }
        }
    }
}

/// Precomputes `FrameRestoreEquivalents[restore_index]` (spec.md §3): for
/// each `RestoreState` in `func.frame_instructions`, the explicit CFI
/// sequence that reproduces it without relying on a matching
/// `RememberState` landing in the same partition.
fn compute_restore_equivalents(func: &mut Function, program: &CfiProgram) {
    let mut remember_stack = Vec::new();
    for (idx, cfi) in func.frame_instructions.iter().enumerate() {
        match cfi {
            CFIKind::RememberState => remember_stack.push(idx),
            CFIKind::RestoreState => {
                if let Some(remember_idx) = remember_stack.pop() {
                    let equivalent = program.unwind(idx, remember_idx);
                    func.frame_restore_equivalents.insert(idx, equivalent);
                }
            }
            _ => {}
        }
    }
}

/// Finds the first index where a `RememberState`/`RestoreState` pair split
/// by `is_cold` would require replaying CFI state across the hot/cold
/// boundary -- the only scenario spec.md §7 calls out as a genuine CFI
/// replay hazard rather than something `unwind` can paper over.
fn remember_restore_split_across_partition(func: &Function, is_cold: &dyn Fn(BlockId) -> bool) -> bool {
    let mut remember_stack: Vec<usize> = Vec::new();
    for (idx, cfi) in func.frame_instructions.iter().enumerate() {
        match cfi {
            CFIKind::RememberState => remember_stack.push(idx),
            CFIKind::RestoreState => {
                if let Some(remember_idx) = remember_stack.pop() {
                    let mut sides = func.layout.iter().filter_map(|&bid| {
                        let state = func.blocks[bid].cfi_state_at_entry.max(0) as usize;
                        (state > remember_idx && state <= idx).then(|| is_cold(bid))
                    });
                    if let Some(first) = sides.next() {
                        if sides.any(|side| side != first) {
                            return true;
                        }
                    }
                }
            }
            _ => {}
        }
    }
    false
}

/// §4.3.5: re-threads CFI state across the final layout using the function's
/// `.eh_frame`-derived program (`crate::cfi::CfiProgram`), resetting at the
/// hot/cold boundary and materializing the `replay`/`unwind` sequence needed
/// to get from one block's exit state to the next block's entry state
/// (spec.md §4.3.5a). Functions with no attached frame-instruction vector
/// (no matching FDE) have nothing to finalize.
pub fn finalize_cfi_state(func: &mut Function, is_cold: &dyn Fn(BlockId) -> bool) -> crate::error::Result<()> {
    if func.frame_instructions.is_empty() {
        return Ok(());
    }

    if remember_restore_split_across_partition(func, is_cold) {
        return Err(Error::CfiReplayHazard(func.name().to_string()));
    }

    let program = CfiProgram::new(crate::cfi::Snapshot::default(), func.frame_instructions.clone());
    compute_restore_equivalents(func, &program);

    let mut state: usize = 0;
    let mut prev_cold = false;
    let layout = func.layout.clone();
    for &bid in &layout {
        let cold = is_cold(bid);
        if cold != prev_cold {
            state = 0;
        }
        let target = func.blocks[bid].cfi_state_at_entry.max(0) as usize;
        if target != state {
            let sequence = if target >= state { program.replay(state, target) } else { program.unwind(state, target) };
            for (i, cfi) in sequence.into_iter().enumerate() {
                func.blocks[bid].instructions.insert(i, Instruction::cfi(cfi));
            }
            state = target;
        }
        prev_cold = cold;
    }

    for block in &mut func.blocks {
        block.instructions.retain(|insn| !matches!(insn.cfi, Some(CFIKind::RememberState) | Some(CFIKind::RestoreState)));
    }
    Ok(())
}

/// §4.3.6: splices `new_blocks` into storage immediately after `after`,
/// re-indexing `layout_index`, recomputing landing pads, and optionally
/// propagating layout/CFI state.
pub fn insert_basic_blocks(
    func: &mut Function,
    after: BlockId,
    mut new_blocks: Vec<BasicBlock>,
    update_layout: bool,
    update_cfi_state: bool,
) -> Vec<BlockId> {
    let insert_at = after + 1;
    let cfi_state = func.blocks[after].cfi_state_at_entry;
    let count = new_blocks.len();
    if update_cfi_state {
        for b in &mut new_blocks {
            b.cfi_state_at_entry = cfi_state;
        }
    }
    for b in new_blocks.drain(..) {
        func.blocks.insert(insert_at, b);
    }
    for (i, block) in func.blocks.iter_mut().enumerate() {
        block.layout_index = i;
    }
    let new_ids: Vec<BlockId> = (insert_at..insert_at + count).collect();
    if update_layout {
        let pos = func.layout.iter().position(|&b| b == after).map(|p| p + 1).unwrap_or(func.layout.len());
        for (i, &id) in new_ids.iter().enumerate() {
            func.layout.insert(pos + i, id);
        }
    }
    recompute_landing_pads(func);
    new_ids
}

/// Invariant 1 (spec.md §8): successor/predecessor symmetry with aligned
/// branch-info lengths.
pub fn validate_cfg(func: &Function, isa: &dyn InstructionAnalysis) -> Result<(), String> {
    for (bi, block) in func.blocks.iter().enumerate() {
        if block.successors.len() != block.branch_info.len() {
            return Err(format!("block {bi} has {} successors but {} branch-info entries", block.successors.len(), block.branch_info.len()));
        }
        for &succ in &block.successors {
            if !func.blocks[succ].predecessors.contains(&bi) {
                return Err(format!("block {bi} -> {succ} missing reverse predecessor edge"));
            }
        }
        for &lp in &block.landing_pads {
            if !func.blocks[lp].throwers.contains(&bi) {
                return Err(format!("block {bi} -> landing pad {lp} missing reverse thrower edge"));
            }
        }
        // The Instruction Analysis Facade's source of truth for "does this
        // block end in a conditional branch" must agree with the CFG shape
        // `fix_branches` already committed to.
        let analysis = isa.analyze_branch(&block.instructions);
        if analysis.cond_index.is_some() && block.successors.len() != 2 {
            return Err(format!("block {bi} has a conditional branch but {} successor(s)", block.successors.len()));
        }
    }
    Ok(())
}

/// Invariant 6 (spec.md §8): after `fixBranches`, no same-cold-ness
/// consecutive pair in the layout ends with an unconditional branch to the
/// next block.
pub fn validate_no_redundant_fallthrough_branch(func: &Function, isa: &dyn InstructionAnalysis, is_cold: &dyn Fn(BlockId) -> bool) -> bool {
    for w in func.layout.windows(2) {
        let (a, b) = (w[0], w[1]);
        if is_cold(a) != is_cold(b) {
            continue;
        }
        if let Some(last) = func.blocks[a].instructions.last() {
            if isa.is_unconditional_branch(last) && isa.get_target_symbol(last).as_deref() == Some(&func.blocks[b].label) {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{Arch, for_arch};

    fn linear_function() -> Function {
        let mut f = Function::new("f".into(), 0x1000, 10, 10);
        f.blocks.push(BasicBlock::new("BB0".into(), 0));
        f.blocks.push(BasicBlock::new("BB1".into(), 5));
        f.layout = vec![0, 1];
        add_successor(&mut f, 0, 1, 0, 0);
        f
    }

    #[test]
    fn successor_invariants_hold_after_add() {
        let f = linear_function();
        assert!(validate_cfg(&f, for_arch(Arch::X86_64).as_ref()).is_ok());
    }

    #[test]
    fn swap_keeps_branch_info_aligned() {
        let mut f = linear_function();
        f.blocks.push(BasicBlock::new("BB2".into(), 8));
        add_successor(&mut f, 0, 2, 5, 1);
        swap_conditional_successors(&mut f.blocks[0]);
        assert_eq!(f.blocks[0].successors, vec![2, 1]);
        assert_eq!(f.blocks[0].branch_info[0].count, 5);
    }

    #[test]
    fn finalize_cfi_state_materializes_replay_sequence() {
        let mut f = linear_function();
        f.frame_instructions = vec![CFIKind::DefCfaOffset { offset: 16 }, CFIKind::DefCfaOffset { offset: 24 }];
        f.blocks[0].cfi_state_at_entry = 0;
        f.blocks[1].cfi_state_at_entry = 2;
        finalize_cfi_state(&mut f, &|_| false).unwrap();
        assert_eq!(f.blocks[1].instructions.len(), 2);
        assert_eq!(f.blocks[1].instructions[0].cfi, Some(CFIKind::DefCfaOffset { offset: 16 }));
        assert_eq!(f.blocks[1].instructions[1].cfi, Some(CFIKind::DefCfaOffset { offset: 24 }));
    }

    #[test]
    fn finalize_cfi_state_detects_remember_restore_split_across_partition() {
        let mut f = linear_function();
        f.frame_instructions = vec![
            CFIKind::RememberState,
            CFIKind::DefCfaOffset { offset: 16 },
            CFIKind::RestoreState,
        ];
        f.blocks[0].cfi_state_at_entry = 1;
        f.blocks[1].cfi_state_at_entry = 2;
        let is_cold = |bid: BlockId| bid == 1;
        let err = finalize_cfi_state(&mut f, &is_cold).unwrap_err();
        assert!(matches!(err, Error::CfiReplayHazard(_)));
    }

    #[test]
    fn eliminate_unreachable_drops_dead_block() {
        let isa = for_arch(Arch::X86_64);
        let mut f = linear_function();
        f.blocks.push(BasicBlock::new("BB2".into(), 8));
        f.entry_points = vec![0];
        eliminate_unreachable_blocks(&mut f, isa.as_ref());
        assert_eq!(f.blocks.len(), 2);
    }
}
