//! Dyno-stats accumulator (spec.md §6's `-dyno-stats` flag; internals
//! unspecified by the distillation, grounded in the reference
//! implementation's use of per-block execution counts already threaded
//! through `BinaryBasicBlock`). Sums profile-weighted event counts over a
//! function's final CFG: branches taken, mispredicted branches, calls,
//! loads, and stores executed.

use crate::function::Function;
use crate::isa::InstructionAnalysis;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DynoStats {
    pub executed_instructions: u64,
    pub executed_branches: u64,
    pub executed_mispredicted_branches: u64,
    pub executed_calls: u64,
    pub executed_loads: u64,
    pub executed_stores: u64,
}

impl DynoStats {
    pub fn add(&mut self, other: DynoStats) {
        self.executed_instructions += other.executed_instructions;
        self.executed_branches += other.executed_branches;
        self.executed_mispredicted_branches += other.executed_mispredicted_branches;
        self.executed_calls += other.executed_calls;
        self.executed_loads += other.executed_loads;
        self.executed_stores += other.executed_stores;
    }
}

/// Computes one function's dyno-stats from its final (post-optimization)
/// CFG: each block's instructions are weighted by `block.execution_count`.
pub fn compute(func: &Function, isa: &dyn InstructionAnalysis) -> DynoStats {
    let mut stats = DynoStats::default();
    for block in &func.blocks {
        let count = block.execution_count;
        if count == 0 {
            continue;
        }
        for insn in &block.instructions {
            if insn.is_cfi() {
                continue;
            }
            stats.executed_instructions += count;
            if isa.is_call(insn) {
                stats.executed_calls += count;
            }
            if isa.is_branch(insn) {
                stats.executed_branches += count;
            }
            if isa.is_load(insn) {
                stats.executed_loads += count;
            }
            if isa.is_store(insn) {
                stats.executed_stores += count;
            }
        }
        for info in &block.branch_info {
            stats.executed_mispredicted_branches += info.mispredicted_count;
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic_block::{BasicBlock, BranchInfo};
    use crate::instruction::{BranchKind, Instruction};
    use crate::isa::{for_arch, Arch};

    #[test]
    fn weights_instructions_by_execution_count() {
        let isa = for_arch(Arch::X86_64);
        let mut f = Function::new("f".into(), 0x1000, 8, 8);
        let mut b = BasicBlock::new("BB0".into(), 0);
        b.execution_count = 100;
        b.push_instruction(Instruction::new(crate::decode::x86_64::OP_RET, vec![], 1, BranchKind::Return));
        b.branch_info.push(BranchInfo { count: 100, mispredicted_count: 4 });
        f.blocks.push(b);
        let stats = compute(&f, isa.as_ref());
        assert_eq!(stats.executed_instructions, 100);
        assert_eq!(stats.executed_mispredicted_branches, 4);
    }
}
