//! Instruction Analysis Facade (spec.md §4.1): architecture-specific
//! predicates and mutators over instruction records, exposed as a capability
//! interface. Call sites (the lifter, the CFG manipulator) depend only on
//! [`InstructionAnalysis`]; each target owns its own opcode table and never
//! leaks it past this trait (spec.md §9 "Dynamic dispatch over
//! architectures").

pub mod aarch64;
pub mod x86_64;

use crate::instruction::Instruction;

/// Result of `analyzeBranch`: the single source of truth for how later
/// passes interpret a block's ending (spec.md §4.1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchAnalysis {
    /// Taken-branch target, set when a conditional branch exists.
    pub taken: Option<String>,
    /// Fall-through/unconditional target, meaningful depending on `cond`.
    pub fallthrough_or_uncond: Option<String>,
    /// The conditional branch instruction's index within the block, if any.
    pub cond_index: Option<usize>,
    /// The trailing unconditional branch's index within the block, if any.
    pub uncond_index: Option<usize>,
}

/// Classification returned by `analyzeIndirectBranch` (spec.md §4.1, §4.2a).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndirectBranchClass {
    Unknown,
    PossibleTailCall,
    /// Absolute pointer-array jump table.
    PossibleJumpTable,
    /// 32-bit PC-relative jump table (PIC).
    PossiblePicJumpTable,
    /// A computed branch whose single target is a read-only constant.
    PossibleFixedBranch,
}

/// The memory reference an indirect branch loads its target from, as
/// decomposed by `analyzeIndirectBranch` (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndirectMemRef {
    pub base_reg: Option<u16>,
    pub index_reg: Option<u16>,
    pub scale: u8,
    /// Static displacement, when it is a plain constant rather than a
    /// symbol; `None` when the displacement is symbolic (resolved
    /// separately by the caller via `handlePCRelOperand`).
    pub disp: Option<i64>,
}

/// Landing-pad/action-table reference carried by an invoke instruction
/// (spec.md §4.1 `get-eh-info`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EhInfo {
    pub landing_pad_label: Option<String>,
    pub action: i64,
}

/// Per-architecture classification and mutation over [`Instruction`]
/// records. Classifier predicates return `false` on opcodes they don't
/// recognize rather than erroring; mutators that can't rewrite an operand
/// shape return `false` and leave the instruction untouched -- callers must
/// check and either bail out or mark the enclosing function non-simple
/// (spec.md §4.1 "Failure").
pub trait InstructionAnalysis {
    // -- Classification --
    fn is_branch(&self, insn: &Instruction) -> bool;
    fn is_conditional_branch(&self, insn: &Instruction) -> bool;
    fn is_unconditional_branch(&self, insn: &Instruction) -> bool;
    fn is_call(&self, insn: &Instruction) -> bool;
    fn is_tail_call(&self, insn: &Instruction) -> bool;
    fn is_return(&self, insn: &Instruction) -> bool;
    fn is_indirect_branch(&self, insn: &Instruction) -> bool;
    fn is_invoke(&self, insn: &Instruction) -> bool;
    fn is_terminator(&self, insn: &Instruction) -> bool;
    fn is_noop(&self, insn: &Instruction) -> bool;
    fn is_prefix(&self, insn: &Instruction) -> bool;
    fn is_cfi(&self, insn: &Instruction) -> bool {
        insn.is_cfi()
    }
    fn is_eh_label(&self, insn: &Instruction) -> bool;
    fn is_store(&self, insn: &Instruction) -> bool;
    fn is_load(&self, insn: &Instruction) -> bool;

    // -- Inspection --
    fn get_target_symbol(&self, insn: &Instruction) -> Option<String>;
    fn get_jump_table_address(&self, insn: &Instruction) -> Option<u64>;
    fn get_eh_info(&self, insn: &Instruction) -> Option<EhInfo>;
    fn get_conditional_tail_call_target(&self, insn: &Instruction) -> Option<String>;
    fn get_gnu_args_size(&self, insn: &Instruction) -> Option<i64>;
    fn has_pc_rel_operand(&self, insn: &Instruction) -> bool;

    // -- Mutation --
    fn create_uncond_branch(&self, target: &str) -> Instruction;
    fn create_tail_call(&self, target: &str) -> Instruction;
    fn create_noop(&self) -> Instruction;
    fn create_trap(&self) -> Instruction;
    fn create_return(&self) -> Instruction;
    fn create_eh_label(&self, label: &str) -> Instruction;
    fn replace_branch_target(&self, insn: &mut Instruction, target: &str) -> bool;
    fn reverse_branch_condition(&self, insn: &mut Instruction, new_target: &str) -> bool;
    fn convert_jmp_to_tail_call(&self, insn: &mut Instruction) -> bool;
    fn convert_tail_call_to_jmp(&self, insn: &mut Instruction) -> bool;
    fn unset_conditional_tail_call(&self, insn: &mut Instruction) -> bool;
    fn replace_mem_operand_disp(&self, insn: &mut Instruction, disp: i64) -> bool;
    fn replace_imm_with_symbol(&self, insn: &mut Instruction, name: &str, addend: i64) -> bool;
    fn set_jump_table(&self, insn: &mut Instruction, label: &str) -> bool;
    fn add_gnu_args_size(&self, insn: &mut Instruction, size: i64) -> bool;
    /// Rewrites `insn` to its shortest equivalent encoding (e.g. a `jmp
    /// rel32` whose target now fits in a `rel8`). Returns `true` if the
    /// instruction's size changed.
    fn shorten_instruction(&self, insn: &mut Instruction) -> bool;

    // -- Control-flow analysis --
    fn analyze_branch(&self, block: &[Instruction]) -> BranchAnalysis;
    fn analyze_indirect_branch(
        &self,
        stream: &[Instruction],
        at: usize,
    ) -> (IndirectBranchClass, Option<IndirectMemRef>);
}

/// The two targets lifting/emission must support (spec.md §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    AArch64,
}

pub fn for_arch(arch: Arch) -> Box<dyn InstructionAnalysis> {
    match arch {
        Arch::X86_64 => Box::new(x86_64::X86_64Analysis),
        Arch::AArch64 => Box::new(aarch64::AArch64Analysis),
    }
}
