//! The Function Lifter (spec.md §4.2, §4.2a, §4.2b, §4.2c): disassembles a
//! byte range into an offset-keyed instruction map, discovers basic-block
//! boundaries and jump tables, attaches CFI and LSDA data, and builds CFG
//! edges.
//!
//! Written as a driver loop over decode results rather than the reference
//! implementation's single imperative routine with goto-like fall-throughs
//! (spec.md §9 "Coroutine-free lifting"): each iteration produces either an
//! instruction to append or a [`ScanDirective`], and each directive is
//! independently testable.

use std::collections::BTreeMap;

use crate::basic_block::{BasicBlock, BranchInfo};
use crate::binary_context::BinaryContext;
use crate::decode::x86_64::{self as opcodes, decode_one};
use crate::error::{Error, Result};
use crate::function::{CallSite, Function, FunctionState, TakenBranch};
use crate::instruction::{AnnotationValue, BranchKind, Instruction, Operand, ANNOT_OFFSET};
use crate::isa::IndirectBranchClass;
use crate::jump_table::{JumpTable, JumpTableType};

/// What the scan loop should do after processing the bytes at the current
/// cursor (spec.md §9 "Coroutine-free lifting").
enum ScanDirective {
    Append(Instruction, usize),
    /// Trailing zero bytes after a decode failure: stop, this is padding.
    StopPadding,
    /// Non-zero bytes after a decode failure outside relocation+trap mode:
    /// the function is left un-rewritten.
    Abort,
}

pub struct Lifter<'a> {
    ctx: &'a mut BinaryContext,
    trap_avx512: bool,
}

impl<'a> Lifter<'a> {
    pub fn new(ctx: &'a mut BinaryContext, trap_avx512: bool) -> Lifter<'a> {
        Lifter { ctx, trap_avx512 }
    }

    /// Spec.md §4.2's full algorithm, steps 1-2 (the linear scan) through
    /// appending the final instruction. Populates every `Disassembled`
    /// field on `func` and advances `func.state`.
    pub fn lift(&mut self, func: &mut Function, bytes: &[u8]) -> Result<()> {
        func.labels.insert(0, "BB0".to_string());
        func.entry_points = vec![0];

        let mut offset = 0u64;
        while (offset as usize) < bytes.len() {
            let remaining = &bytes[offset as usize..];
            match self.decode_at(remaining) {
                ScanDirective::StopPadding => break,
                ScanDirective::Abort => {
                    if self.trap_avx512 {
                        func.traps_on_entry = true;
                        log::warn!("{}: installing entry trap after decode failure at +0x{offset:x}", func.name());
                        break;
                    }
                    func.mark_non_simple("disassembly failed on non-padding bytes");
                    return Err(Error::DisassemblyFailed(func.name().to_string(), offset));
                }
                ScanDirective::Append(mut insn, len) => {
                    insn.raw_bytes = remaining[..len].to_vec();
                    self.apply_relocation(func, &mut insn, offset);
                    self.ctx.isa().shorten_instruction(&mut insn);
                    self.classify_and_record(func, &mut insn, offset, bytes);
                    if keep_offset_for_instruction(&insn) {
                        insn.add_annotation(ANNOT_OFFSET, AnnotationValue::U64(offset));
                    }
                    func.instructions.insert(offset, insn);
                    offset += len as u64;
                }
            }
        }

        func.state = FunctionState::Disassembled;
        Ok(())
    }

    fn decode_at(&self, bytes: &[u8]) -> ScanDirective {
        match decode_one(bytes) {
            Some((insn, len)) if insn.opcode != opcodes::OP_OTHER || is_zero(bytes) => {
                ScanDirective::Append(insn, len)
            }
            Some(_) => {
                if bytes.iter().all(|&b| b == 0) {
                    ScanDirective::StopPadding
                } else {
                    ScanDirective::Abort
                }
            }
            None => ScanDirective::StopPadding,
        }
    }

    fn apply_relocation(&mut self, func: &mut Function, insn: &mut Instruction, offset: u64) {
        let file_addr = func.address + offset;
        let Some(reloc) = self
            .ctx
            .relocations
            .iter()
            .find(|r| r.offset >= file_addr && r.offset < file_addr + u64::from(insn.size.max(1)))
            .cloned()
        else {
            return;
        };
        if !self.ctx.isa().replace_imm_with_symbol(insn, &reloc.symbol, reloc.addend) {
            log::warn!("{}: relocation at +0x{offset:x} did not match an immediate operand", func.name());
        }
    }

    /// The big case split of spec.md §4.2 step "Case split on the
    /// classified kind".
    fn classify_and_record(&mut self, func: &mut Function, insn: &mut Instruction, offset: u64, bytes: &[u8]) {
        let (is_cond, is_call, is_indirect) = {
            let isa = self.ctx.isa();
            (isa.is_conditional_branch(insn), isa.is_call(insn), isa.is_indirect_branch(insn))
        };
        if is_cond || self.ctx.isa().is_unconditional_branch(insn) || is_call {
            if let Some(Operand::Imm(disp)) = insn.operands.last() {
                let target = offset as i64 + i64::from(insn.size) + disp;
                if target >= 0 && (target as u64) < func.size {
                    let target_off = target as u64;
                    func.get_or_create_local_label(target_off);
                    if !is_call {
                        func.taken_branches
                            .push(TakenBranch { source_offset: offset, target_offset: target_off });
                    }
                } else if target == func.size as i64 && func.max_size > func.size {
                    // `__builtin_unreachable()`: branch to just past the end
                    // with room to grow (§4.2 step "evaluatable").
                    log::debug!("{}: treating branch at +0x{offset:x} as builtin-unreachable", func.name());
                } else {
                    let target_addr = (func.address as i64 + target) as u64;
                    let global = self.ctx.get_or_create_global_symbol(target_addr, "FUN");
                    self.ctx.bind_function(&global, target_addr);
                }
            }
            return;
        }
        if is_indirect {
            self.process_indirect_branch(func, insn, offset);
            return;
        }
        let _ = bytes;
    }

    /// §4.2a: distinguishes tail calls from jump-table dispatches and fixed
    /// computed branches. Tags `insn` with [`ANNOT_INDIRECT_BRANCH_CLASS`]
    /// whenever it reaches a definite classification, so
    /// `validate_indirect_branches` can tell a resolved indirect branch
    /// from one left ambiguous for a later pass.
    fn process_indirect_branch(&mut self, func: &mut Function, insn: &mut Instruction, offset: u64) {
        let (_, Some(mem_ref)) = self.ctx.isa().analyze_indirect_branch(std::slice::from_ref(insn), 0) else {
            // No memory operand the facade recognizes (e.g. AArch64 PIC
            // tables, spec.md §9 Open Questions): nothing to classify yet.
            return;
        };
        let Some(disp) = mem_ref.disp else { return };
        let scale = mem_ref.scale;
        let array_start = disp as u64;
        if let Some((&start, _)) = self.ctx.jump_table_covering(array_start) {
            let jt = self.ctx.jump_tables.get_mut(&start).unwrap();
            log::debug!("{}: indirect branch at +0x{offset:x} reuses jump table at 0x{start:x}", func.name());
            jt.sub_labels.entry(array_start - start).or_insert_with(|| format!("JT_{array_start:x}"));
            mark_indirect_branch_class(insn, "JumpTable");
            return;
        }

        let Some(section) = self.ctx.section_containing(array_start).cloned() else {
            log::debug!("{}: indirect branch at +0x{offset:x} has no backing section, treating as tail call", func.name());
            mark_indirect_branch_class(insn, "TailCall");
            return;
        };
        if section.writable {
            // Not read-only: can't be a fixed branch or a safely-relocated
            // table; leave classification to a later pass.
            return;
        }

        let mut targets = Vec::new();
        let mut entry_off = 0u64;
        let entry_size = u64::from(scale.max(4));
        loop {
            let entry_addr = array_start + entry_off;
            let Some(target) = self.ctx.read_table_entry(entry_addr, entry_size) else { break };
            let in_range = target >= func.address && target < func.address + func.size;
            let past_end_once = target == func.address + func.size && targets.len() as u64 == entry_off / entry_size;
            if in_range {
                targets.push(target - func.address);
            } else if past_end_once {
                targets.push(func.size);
                entry_off += entry_size;
                break;
            } else {
                break;
            }
            entry_off += entry_size;
        }

        if targets.len() >= 2 {
            let mut jt = JumpTable::new(array_start, entry_size as u8, JumpTableType::Absolute);
            for t in &targets {
                jt.push_target(*t);
                if *t < func.size {
                    func.get_or_create_local_label(*t);
                    func.taken_branches.push(TakenBranch { source_offset: offset, target_offset: *t });
                }
            }
            self.ctx.jump_tables.insert(array_start, jt);
            log::debug!("{}: registered jump table at 0x{array_start:x} with {} entries", func.name(), targets.len());
            mark_indirect_branch_class(insn, "JumpTable");
        } else {
            log::debug!("{}: indirect branch at +0x{offset:x} classified as possible tail call", func.name());
            mark_indirect_branch_class(insn, "TailCall");
        }
    }

    /// §4.2b: LSDA parse attaching EH operands to covered calls.
    pub fn parse_lsda(&mut self, func: &mut Function, call_sites: &[CallSite]) {
        for cs in call_sites {
            func.call_sites.push(*cs);
            let Some(lp_offset) = cs.landing_pad_offset else { continue };
            let label = func.get_or_create_local_label(lp_offset);
            if !func.landing_pads.contains(&lp_offset) {
                func.landing_pads.push(lp_offset);
            }
            for (off, insn) in func.instructions.range_mut(cs.start..cs.start + cs.length) {
                if self.ctx.isa().is_call(insn) {
                    insn.add_annotation(
                        crate::instruction::ANNOT_EH_LANDING_PAD,
                        AnnotationValue::Symbol(label.clone()),
                    );
                    insn.add_annotation(crate::instruction::ANNOT_EH_ACTION, AnnotationValue::I64(cs.action_entry));
                    log::debug!("{}: call at +0x{off:x} covered by landing pad {}", func.name(), label);
                }
            }
        }
    }

    /// §4.2c: builds basic blocks and CFG edges from the disassembled
    /// instruction map.
    pub fn build_cfg(&mut self, func: &mut Function) -> Result<()> {
        let mut blocks: Vec<BasicBlock> = Vec::new();
        let mut insert_bb: Option<usize> = None;

        let offsets: Vec<u64> = func.instructions.keys().copied().collect();
        for &off in &offsets {
            if let Some(label) = func.labels.get(&off).cloned() {
                insert_bb = Some(open_block(&mut blocks, label, off));
            } else if insert_bb.is_none() {
                let label = func.get_or_create_local_label(off);
                insert_bb = Some(open_block(&mut blocks, label, off));
            }
            let bb = insert_bb.unwrap();
            let insn = func.instructions.get(&off).unwrap().clone();
            let is_terminator = self.ctx.isa().is_terminator(&insn);
            blocks[bb].push_instruction(insn);
            if is_terminator {
                insert_bb = None;
            }
        }

        let block_starts: Vec<u64> = blocks.iter().map(|b| b.offset).collect();
        for (i, block) in blocks.iter_mut().enumerate() {
            block.end_offset = block_starts.get(i + 1).copied().unwrap_or(func.size);
            block.layout_index = i;
        }

        func.blocks = blocks;
        func.layout = (0..func.blocks.len()).collect();

        // Materialize CFG edges from TakenBranches (§4.2c step 7).
        let branches = func.taken_branches.clone();
        for branch in &branches {
            let Some(src) = func.block_containing_offset(branch.source_offset) else {
                return Err(Error::CfgInconsistent(
                    func.name().to_string(),
                    format!("no block contains source offset 0x{:x}", branch.source_offset),
                ));
            };
            let Some(dst) = func.block_containing_offset(branch.target_offset) else {
                return Err(Error::CfgInconsistent(
                    func.name().to_string(),
                    format!("no block starts at target offset 0x{:x}", branch.target_offset),
                ));
            };
            add_successor(func, src, dst, 0, 0);
        }

        // Fall-through edges (§4.2c step 8).
        for i in 0..func.blocks.len() {
            let Some(last) = func.blocks[i].instructions.last().cloned() else { continue };
            let isa = self.ctx.isa();
            let needs_fallthrough = !isa.is_terminator(&last)
                || isa.is_conditional_branch(&last)
                || last.has_annotation(crate::instruction::ANNOT_CONDITIONAL_TAIL_CALL);
            if needs_fallthrough && i + 1 < func.blocks.len() {
                add_successor(func, i, i + 1, 0, 0);
            }
        }

        recompute_landing_pads(func);
        self.attach_frame_info(func);
        annotate_cfi_state(func);
        propagate_gnu_args_size(func, self.ctx.isa());

        for block in &mut func.blocks {
            block.valid = true;
        }

        validate_indirect_branches(func)?;
        func.state = FunctionState::Cfg;
        Ok(())
    }

    /// §3 "frame-instruction vector": populates `func.frame_instructions`/
    /// `func.cfi_offset_map` from the FDE covering this function's address,
    /// if `.eh_frame` carries one. Left empty otherwise, which
    /// `annotate_cfi_state`/`cfg::finalize_cfi_state` both treat as
    /// "nothing to thread".
    fn attach_frame_info(&self, func: &mut Function) {
        let Some(fde) = self.ctx.eh_frame_fde_covering(func.address) else { return };
        func.frame_instructions = fde.instructions;
        func.cfi_offset_map = fde.offset_map;
    }
}

fn open_block(blocks: &mut Vec<BasicBlock>, label: String, offset: u64) -> usize {
    blocks.push(BasicBlock::new(label, offset));
    blocks.len() - 1
}

fn add_successor(func: &mut Function, src: usize, dst: usize, count: u64, mispredicted: u64) {
    if func.blocks[src].successors.contains(&dst) {
        return;
    }
    func.blocks[src].successors.push(dst);
    func.blocks[src].branch_info.push(BranchInfo { count, mispredicted_count: mispredicted });
    func.blocks[dst].predecessors.push(src);
}

/// §4.2c step 9: rebuilds landing-pad/thrower lists from the EH tags on
/// call instructions.
fn recompute_landing_pads(func: &mut Function) {
    for block in &mut func.blocks {
        block.landing_pads.clear();
    }
    let mut edges = Vec::new();
    for (bi, block) in func.blocks.iter().enumerate() {
        for insn in &block.instructions {
            if let Some(AnnotationValue::Symbol(label)) = insn.get_annotation(crate::instruction::ANNOT_EH_LANDING_PAD) {
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

/// §4.2c step 10: threads a CFI state counter across blocks in creation
/// order, recording each block's entry state. When `.eh_frame` supplied a
/// real frame-instruction vector, the state is read straight out of
/// `cfi_offset_map` instead of re-derived from inline CFI pseudos, since no
/// such pseudos exist in the decoded instruction stream -- `frame_instructions`
/// lives alongside it, addressed by offset rather than interleaved.
fn annotate_cfi_state(func: &mut Function) {
    if !func.cfi_offset_map.is_empty() {
        let map = func.cfi_offset_map.clone();
        let mut state = 0usize;
        for block in &mut func.blocks {
            if let Some((_, &idx)) = map.range(..=block.offset).next_back() {
                state = idx;
            }
            block.cfi_state_at_entry = state as i64;
        }
        return;
    }

    let mut state = 0i64;
    let mut remember_stack: Vec<i64> = Vec::new();
    for block in &mut func.blocks {
        block.cfi_state_at_entry = state;
        for insn in &block.instructions {
            match &insn.cfi {
                Some(crate::instruction::CFIKind::RememberState) => remember_stack.push(state),
                Some(crate::instruction::CFIKind::RestoreState) => {
                    state = remember_stack.pop().unwrap_or(state);
                }
                Some(crate::instruction::CFIKind::GnuArgsSize { .. }) => {}
                Some(_) => state += 1,
                None => {}
            }
        }
    }
}

/// §4.2c step 11: deletes `GNU_args_size` CFI pseudos and attaches the
/// current args-size to every subsequent invoke instruction.
fn propagate_gnu_args_size(func: &mut Function, isa: &dyn crate::isa::InstructionAnalysis) {
    let mut current: i64 = 0;
    for block in &mut func.blocks {
        block.instructions.retain_mut(|insn| {
            if let Some(crate::instruction::CFIKind::GnuArgsSize { size }) = &insn.cfi {
                current = *size;
                return false;
            }
            if isa.is_call(insn) {
                isa.add_gnu_args_size(insn, current);
            }
            true
        });
    }
}

fn mark_indirect_branch_class(insn: &mut Instruction, class: &str) {
    insn.add_annotation(
        crate::instruction::ANNOT_INDIRECT_BRANCH_CLASS,
        AnnotationValue::Symbol(class.to_string()),
    );
}

/// §4.2c step 14 / spec.md §7 "Indirect-branch ambiguity": every indirect
/// branch must have been classified by `process_indirect_branch` by the
/// time the CFG is built. A function with exactly one block has nowhere
/// else to jump to, so an unclassified indirect branch there is treated as
/// a tail call rather than an error; any other function with an
/// unclassified indirect branch is marked non-simple.
fn validate_indirect_branches(func: &mut Function) -> Result<()> {
    let sole_block = func.blocks.len() <= 1;
    let mut unresolved = false;
    for block in &mut func.blocks {
        for insn in &mut block.instructions {
            if insn.opcode != opcodes::OP_JMP_INDIRECT {
                continue;
            }
            if insn.has_annotation(crate::instruction::ANNOT_INDIRECT_BRANCH_CLASS) {
                continue;
            }
            if sole_block {
                insn.kind = BranchKind::TailCall;
                mark_indirect_branch_class(insn, "TailCall");
            } else {
                unresolved = true;
            }
        }
    }
    if unresolved {
        func.mark_non_simple("unresolved indirect branch with no matching jump table");
    }
    Ok(())
}

fn keep_offset_for_instruction(insn: &Instruction) -> bool {
    !matches!(insn.kind, BranchKind::Other) || insn.is_cfi()
}

fn is_zero(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Arch;

    /// Spec.md §8 S1: a 3-byte `ud2` function is a single block with one
    /// instruction and stays simple.
    #[test]
    fn s1_single_block_trap_function() {
        let mut ctx = BinaryContext::new(Arch::X86_64);
        let mut func = Function::new("foo".into(), 0x1000, 3, 3);
        let mut lifter = Lifter::new(&mut ctx, false);
        lifter.lift(&mut func, &[0x0f, 0x0b]).unwrap();
        lifter.build_cfg(&mut func).unwrap();
        assert_eq!(func.blocks.len(), 1);
        assert_eq!(func.blocks[0].instructions.len(), 1);
        assert!(func.simple);
    }

    /// Spec.md §8 S2: `cmp eax,0; je 0x200a; ret; ret` lifts to 3 blocks
    /// with a conditional-taken edge and a fall-through edge.
    #[test]
    fn s2_conditional_and_fallthrough() {
        let mut ctx = BinaryContext::new(Arch::X86_64);
        let mut func = Function::new("bar".into(), 0x2000, 11, 11);
        let mut lifter = Lifter::new(&mut ctx, false);
        let bytes = [0x83, 0xf8, 0x00, 0x0f, 0x84, 0x01, 0x00, 0x00, 0x00, 0xc3, 0xc3];
        lifter.lift(&mut func, &bytes).unwrap();
        lifter.build_cfg(&mut func).unwrap();
        assert_eq!(func.blocks.len(), 3);
        assert_eq!(func.blocks[0].successors.len(), 2);
    }

    /// An `.eh_frame` FDE covering the function's address range populates
    /// `frame_instructions`/`cfi_offset_map` rather than leaving them empty.
    #[test]
    fn attaches_frame_info_from_matching_fde() {
        let mut cie = Vec::new();
        cie.extend_from_slice(&0u32.to_le_bytes()); // CIE id.
        cie.push(1); // version.
        cie.push(0); // empty augmentation.
        cie.push(1); // code_alignment_factor.
        cie.push(0x7c); // data_alignment_factor = -4.
        cie.push(16); // return_address_register.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(cie.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&cie);

        let cie_start = 0usize;
        let mut fde = Vec::new();
        let cie_pointer = (bytes.len() + 4 - cie_start) as u32;
        fde.extend_from_slice(&cie_pointer.to_le_bytes());
        fde.extend_from_slice(&0x1000u64.to_le_bytes()); // pc_begin.
        fde.extend_from_slice(&0x10u64.to_le_bytes()); // pc_range.
        fde.push(0x0e); // DW_CFA_def_cfa_offset
        fde.push(16);
        bytes.extend_from_slice(&(fde.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&fde);

        let mut ctx = BinaryContext::new(Arch::X86_64);
        ctx.add_section(crate::binary_context::Section {
            name: ".eh_frame".into(),
            address: 0,
            size: bytes.len() as u64,
            file_offset: 0,
            writable: false,
            executable: false,
            bytes,
        });

        let mut func = Function::new("foo".into(), 0x1000, 2, 2);
        let mut lifter = Lifter::new(&mut ctx, false);
        lifter.lift(&mut func, &[0xc3]).unwrap();
        lifter.build_cfg(&mut func).unwrap();
        assert_eq!(func.frame_instructions.len(), 1);
        assert_eq!(func.frame_instructions[0], crate::instruction::CFIKind::DefCfaOffset { offset: 16 });
    }
}
