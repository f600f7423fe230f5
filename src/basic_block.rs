//! Basic blocks (spec.md §3), grounded in the reference implementation's
//! `BinaryBasicBlock` (`examples/original_source/bolt/BinaryBasicBlock.h`):
//! a label, an instruction vector, parallel successor/branch-info vectors,
//! and back-pointers kept symmetric by the owning [`crate::function::Function`].
//!
//! Blocks never own their cross-references: successors, predecessors,
//! landing pads, and throwers are all indices into the owning function's
//! block storage (spec.md §9 "Cyclic graphs").

use crate::instruction::Instruction;

/// Index of a basic block within its function's `blocks` storage. Stable
/// for the block's lifetime even as `layout` is reordered -- `layout` holds
/// `BlockId`s, not positions.
pub type BlockId = usize;

/// `{count, mispredicted_count}` for one successor edge, the i-th entry
/// describing the edge to `successors[i]` (spec.md §3's parallelism
/// invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BranchInfo {
    pub count: u64,
    pub mispredicted_count: u64,
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub label: String,
    /// Original input-file offset, relative to the function start.
    pub offset: u64,
    /// Offset of the next block in creation order, or the function size for
    /// the last block (spec.md §4.2c step 12).
    pub end_offset: u64,
    pub alignment: u32,
    pub max_padding: u32,
    pub valid: bool,
    /// Position within `Function::layout`; kept in sync by
    /// `insertBasicBlocks`/reordering strategies.
    pub layout_index: usize,
    /// CFI program index in effect at block entry (spec.md §4.2c step 10,
    /// §4.3.5).
    pub cfi_state_at_entry: i64,
    pub execution_count: u64,
    pub instructions: Vec<Instruction>,
    pub successors: Vec<BlockId>,
    pub branch_info: Vec<BranchInfo>,
    pub predecessors: Vec<BlockId>,
    pub landing_pads: Vec<BlockId>,
    pub throwers: Vec<BlockId>,
    /// Pseudo-instructions (CFI, EH labels) are tracked separately from the
    /// real instruction count so size estimation isn't thrown off by them.
    pub pseudo_count: u32,
}

impl BasicBlock {
    pub fn new(label: String, offset: u64) -> BasicBlock {
        BasicBlock {
            label,
            offset,
            end_offset: offset,
            alignment: 1,
            max_padding: 0,
            valid: false,
            layout_index: 0,
            cfi_state_at_entry: 0,
            execution_count: 0,
            instructions: Vec::new(),
            successors: Vec::new(),
            branch_info: Vec::new(),
            predecessors: Vec::new(),
            landing_pads: Vec::new(),
            throwers: Vec::new(),
            pseudo_count: 0,
        }
    }

    pub fn push_instruction(&mut self, insn: Instruction) {
        if insn.is_cfi() || insn.size == 0 {
            self.pseudo_count += 1;
        }
        self.instructions.push(insn);
    }

    pub fn successor_index(&self, succ: BlockId) -> Option<usize> {
        self.successors.iter().position(|&s| s == succ)
    }

    /// Checks invariant (c) from spec.md §3: 0, 1, or 2 successors, or an
    /// arbitrary number when every one is a jump-table target (a block
    /// ending in an indirect branch -- callers pass that fact in, since a
    /// `BasicBlock` alone can't tell an indirect-branch fan-out from a
    /// malformed CFG).
    pub fn has_valid_successor_count(&self, ends_in_indirect_branch: bool) -> bool {
        matches!(self.successors.len(), 0 | 1 | 2) || ends_in_indirect_branch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::BranchKind;

    #[test]
    fn pseudo_count_tracks_zero_size_instructions() {
        let mut bb = BasicBlock::new("BB0".into(), 0);
        bb.push_instruction(Instruction::new(1, vec![], 3, BranchKind::Other));
        bb.push_instruction(Instruction::cfi(crate::instruction::CFIKind::RememberState));
        assert_eq!(bb.instructions.len(), 2);
        assert_eq!(bb.pseudo_count, 1);
    }

    #[test]
    fn successor_count_invariant() {
        let mut bb = BasicBlock::new("BB0".into(), 0);
        bb.successors = vec![1, 2];
        assert!(bb.has_valid_successor_count(false));
        bb.successors = vec![1, 2, 3];
        assert!(!bb.has_valid_successor_count(false));
        assert!(bb.has_valid_successor_count(true));
    }
}
