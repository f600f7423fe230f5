//! AArch64 instantiation of the Instruction Analysis Facade.
//!
//! Shares the opcode space with `isa::x86_64` (both decoders funnel into the
//! same small set of `BranchKind`-tagged instructions); the only behavioral
//! difference that matters to the CFG Manipulator is PIC jump-table
//! classification and conditional-tail-call handling, both of which
//! preserve the reference implementation's documented limitations rather
//! than inventing a fix (spec.md §9 Open Questions).

use crate::decode::x86_64 as opcodes;
use crate::instruction::{BranchKind, Instruction, Operand};
use crate::isa::{
    BranchAnalysis, EhInfo, IndirectBranchClass, IndirectMemRef, InstructionAnalysis,
};

pub struct AArch64Analysis;

impl InstructionAnalysis for AArch64Analysis {
    fn is_branch(&self, insn: &Instruction) -> bool {
        matches!(insn.kind, BranchKind::Uncond | BranchKind::Cond | BranchKind::IndirectJump)
    }

    fn is_conditional_branch(&self, insn: &Instruction) -> bool {
        insn.kind == BranchKind::Cond
    }

    fn is_unconditional_branch(&self, insn: &Instruction) -> bool {
        insn.kind == BranchKind::Uncond
    }

    fn is_call(&self, insn: &Instruction) -> bool {
        insn.kind == BranchKind::Call
    }

    fn is_tail_call(&self, insn: &Instruction) -> bool {
        insn.kind == BranchKind::TailCall
    }

    fn is_return(&self, insn: &Instruction) -> bool {
        insn.kind == BranchKind::Return
    }

    fn is_indirect_branch(&self, insn: &Instruction) -> bool {
        insn.kind == BranchKind::IndirectJump
    }

    fn is_invoke(&self, insn: &Instruction) -> bool {
        self.is_call(insn) && insn.has_annotation(crate::instruction::ANNOT_EH_LANDING_PAD)
    }

    fn is_terminator(&self, insn: &Instruction) -> bool {
        self.is_branch(insn) || self.is_return(insn) || insn.opcode == opcodes::OP_TRAP
    }

    fn is_noop(&self, insn: &Instruction) -> bool {
        insn.opcode == opcodes::OP_NOP
    }

    fn is_prefix(&self, _insn: &Instruction) -> bool {
        false
    }

    fn is_eh_label(&self, insn: &Instruction) -> bool {
        insn.opcode == opcodes::OP_EH_LABEL
    }

    fn is_store(&self, _insn: &Instruction) -> bool {
        false
    }

    fn is_load(&self, insn: &Instruction) -> bool {
        insn.opcode == opcodes::OP_JMP_INDIRECT
    }

    fn get_target_symbol(&self, insn: &Instruction) -> Option<String> {
        insn.operands.iter().find_map(|op| match op {
            Operand::Symbol { name, .. } => Some(name.clone()),
            _ => None,
        })
    }

    fn get_jump_table_address(&self, insn: &Instruction) -> Option<u64> {
        insn.operands.iter().find_map(|op| match op {
            Operand::Mem { disp, .. } => Some(*disp as u64),
            _ => None,
        })
    }

    fn get_eh_info(&self, insn: &Instruction) -> Option<EhInfo> {
        let pad = insn
            .get_annotation(crate::instruction::ANNOT_EH_LANDING_PAD)
            .and_then(|v| v.as_symbol().map(str::to_string));
        let action = insn
            .get_annotation(crate::instruction::ANNOT_EH_ACTION)
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        if pad.is_none() && action == 0 {
            return None;
        }
        Some(EhInfo { landing_pad_label: pad, action })
    }

    fn get_conditional_tail_call_target(&self, insn: &Instruction) -> Option<String> {
        insn.get_annotation(crate::instruction::ANNOT_CONDITIONAL_TAIL_CALL)
            .and_then(|v| v.as_symbol().map(str::to_string))
    }

    fn get_gnu_args_size(&self, insn: &Instruction) -> Option<i64> {
        insn.get_annotation(crate::instruction::ANNOT_GNU_ARGS_SIZE).and_then(|v| v.as_i64())
    }

    fn has_pc_rel_operand(&self, insn: &Instruction) -> bool {
        opcodes::base_opcode(insn.opcode) == opcodes::OP_JCC || insn.opcode == opcodes::OP_JMP_REL
            || insn.opcode == opcodes::OP_CALL_REL
    }

    fn create_uncond_branch(&self, target: &str) -> Instruction {
        Instruction::new(
            opcodes::OP_JMP_REL,
            vec![Operand::Symbol { name: target.to_string(), addend: 0 }],
            4,
            BranchKind::Uncond,
        )
    }

    fn create_tail_call(&self, target: &str) -> Instruction {
        Instruction::new(
            opcodes::OP_JMP_REL,
            vec![Operand::Symbol { name: target.to_string(), addend: 0 }],
            4,
            BranchKind::TailCall,
        )
    }

    fn create_noop(&self) -> Instruction {
        Instruction::new(opcodes::OP_NOP, vec![], 4, BranchKind::Other)
    }

    fn create_trap(&self) -> Instruction {
        Instruction::new(opcodes::OP_TRAP, vec![], 4, BranchKind::Other)
    }

    fn create_return(&self) -> Instruction {
        Instruction::new(opcodes::OP_RET, vec![], 4, BranchKind::Return)
    }

    fn create_eh_label(&self, label: &str) -> Instruction {
        Instruction::new(
            opcodes::OP_EH_LABEL,
            vec![Operand::Symbol { name: label.to_string(), addend: 0 }],
            0,
            BranchKind::Other,
        )
    }

    fn replace_branch_target(&self, insn: &mut Instruction, target: &str) -> bool {
        if !self.is_branch(insn) && !self.is_call(insn) {
            return false;
        }
        for op in &mut insn.operands {
            if let Operand::Symbol { name, .. } = op {
                *name = target.to_string();
                insn.mark_mutated();
                return true;
            }
        }
        insn.operands.push(Operand::Symbol { name: target.to_string(), addend: 0 });
        insn.mark_mutated();
        true
    }

    fn reverse_branch_condition(&self, insn: &mut Instruction, new_target: &str) -> bool {
        if opcodes::base_opcode(insn.opcode) != opcodes::OP_JCC {
            return false;
        }
        let Some(Operand::Imm(cc)) = insn.operands.first_mut() else { return false };
        *cc ^= 1;
        insn.mark_mutated();
        self.replace_branch_target(insn, new_target)
    }

    fn convert_jmp_to_tail_call(&self, insn: &mut Instruction) -> bool {
        if insn.opcode != opcodes::OP_JMP_REL {
            return false;
        }
        insn.kind = BranchKind::TailCall;
        insn.mark_mutated();
        true
    }

    fn convert_tail_call_to_jmp(&self, insn: &mut Instruction) -> bool {
        if insn.kind != BranchKind::TailCall && insn.kind != BranchKind::Cond {
            return false;
        }
        insn.remove_annotation(crate::instruction::ANNOT_CONDITIONAL_TAIL_CALL);
        if insn.opcode == opcodes::OP_JMP_REL {
            insn.kind = BranchKind::Uncond;
        }
        insn.mark_mutated();
        true
    }

    fn unset_conditional_tail_call(&self, insn: &mut Instruction) -> bool {
        insn.remove_annotation(crate::instruction::ANNOT_CONDITIONAL_TAIL_CALL).is_some()
    }

    fn replace_mem_operand_disp(&self, insn: &mut Instruction, disp: i64) -> bool {
        for op in &mut insn.operands {
            if let Operand::Mem { disp: d, .. } = op {
                *d = disp;
                insn.mark_mutated();
                return true;
            }
        }
        false
    }

    fn replace_imm_with_symbol(&self, insn: &mut Instruction, name: &str, addend: i64) -> bool {
        for op in &mut insn.operands {
            if let Operand::Imm(_) = op {
                *op = Operand::Symbol { name: name.to_string(), addend };
                insn.mark_mutated();
                return true;
            }
        }
        false
    }

    fn set_jump_table(&self, insn: &mut Instruction, label: &str) -> bool {
        for op in &mut insn.operands {
            if let Operand::Mem { .. } = op {
                insn.add_annotation(
                    "JumpTableLabel",
                    crate::instruction::AnnotationValue::Symbol(label.to_string()),
                );
                return true;
            }
        }
        false
    }

    fn add_gnu_args_size(&self, insn: &mut Instruction, size: i64) -> bool {
        insn.add_annotation(crate::instruction::ANNOT_GNU_ARGS_SIZE, crate::instruction::AnnotationValue::I64(size));
        true
    }

    fn shorten_instruction(&self, _insn: &mut Instruction) -> bool {
        // AArch64 instructions are fixed-width; there is nothing to shorten.
        false
    }

    fn analyze_branch(&self, block: &[Instruction]) -> BranchAnalysis {
        let mut result = BranchAnalysis::default();
        let Some(last) = block.last() else { return result };
        if self.is_conditional_branch(last) {
            result.taken = self.get_target_symbol(last);
            result.cond_index = Some(block.len() - 1);
        } else if self.is_unconditional_branch(last) {
            result.fallthrough_or_uncond = self.get_target_symbol(last);
            result.uncond_index = Some(block.len() - 1);
        }
        result
    }

    /// Always returns `Unknown` for PIC-relative jump-table patterns: the
    /// reference implementation defers AArch64 PIC tables to a pass that is
    /// out of scope here, and that limitation is preserved rather than
    /// papered over (spec.md §9 Open Questions).
    fn analyze_indirect_branch(
        &self,
        _stream: &[Instruction],
        _at: usize,
    ) -> (IndirectBranchClass, Option<IndirectMemRef>) {
        (IndirectBranchClass::Unknown, None)
    }
}
