//! A scoped x86-64 decoder: `ud2`, `cmp r/m, imm`, `jcc rel8/rel32`, `jmp
//! rel8/rel32`, `jmp [base+index*scale+disp32]`, `call rel32`, `ret`, and
//! single-byte `nop`. Anything unrecognized decodes as one opaque byte with
//! [`OP_OTHER`], matching the lifter's "unknown opcode, not padding" path
//! (spec.md §4.2 step 2).

use crate::instruction::{BranchKind, Instruction, Operand};

pub const OP_OTHER: u32 = 0;
pub const OP_UD2: u32 = 1;
pub const OP_CMP: u32 = 2;
pub const OP_JCC: u32 = 3;
pub const OP_JMP_REL: u32 = 4;
pub const OP_JMP_INDIRECT: u32 = 5;
pub const OP_RET: u32 = 6;
pub const OP_CALL_REL: u32 = 7;
pub const OP_CALL_INDIRECT: u32 = 8;
pub const OP_NOP: u32 = 9;
pub const OP_TRAP: u32 = 10;
/// Synthetic, zero-width: never produced by `decode_one`, only by
/// `InstructionAnalysis::create_eh_label`.
pub const OP_EH_LABEL: u32 = 11;

/// `JE`'s condition code, used by the lifter/tests to build `jcc` operands
/// without hand-rolling the encoding.
pub const CC_JE: i64 = 0x4;
pub const CC_JNE: i64 = 0x5;

/// `Jcc` packs its condition code into bits [8:11] of `opcode` so that the
/// operand vector only ever needs to carry the branch target -- a single
/// `Operand::Imm`/`Operand::Symbol` slot, same as `jmp`/`call`. Compare
/// against [`OP_JCC`] via [`base_opcode`], never `==` directly.
pub fn jcc_opcode(cc: i64) -> u32 {
    OP_JCC | ((cc as u32 & 0xf) << 8)
}

pub fn jcc_cc(opcode: u32) -> i64 {
    i64::from((opcode >> 8) & 0xf)
}

pub fn base_opcode(opcode: u32) -> u32 {
    opcode & 0xff
}

/// Decodes one instruction at `bytes[0..]`. Returns `(instruction,
/// encoded_len)`, or `None` if `bytes` is empty.
pub fn decode_one(bytes: &[u8]) -> Option<(Instruction, usize)> {
    if bytes.is_empty() {
        return None;
    }
    match bytes[0] {
        0x0f if bytes.get(1) == Some(&0x0b) => {
            Some((Instruction::new(OP_UD2, vec![], 2, BranchKind::Other), 2))
        }
        0x0f if matches!(bytes.get(1), Some(0x80..=0x8f)) => {
            let cc = i64::from(bytes[1] & 0xf);
            let disp = i32::from_le_bytes(bytes.get(2..6)?.try_into().ok()?);
            let insn = Instruction::new(
                jcc_opcode(cc),
                vec![Operand::Imm(i64::from(disp))],
                6,
                BranchKind::Cond,
            );
            Some((insn, 6))
        }
        0x70..=0x7f => {
            let cc = i64::from(bytes[0] & 0xf);
            let disp = i8::from_le_bytes([*bytes.get(1)?]);
            let insn = Instruction::new(
                jcc_opcode(cc),
                vec![Operand::Imm(i64::from(disp))],
                2,
                BranchKind::Cond,
            );
            Some((insn, 2))
        }
        0xe9 => {
            let disp = i32::from_le_bytes(bytes.get(1..5)?.try_into().ok()?);
            let insn =
                Instruction::new(OP_JMP_REL, vec![Operand::Imm(i64::from(disp))], 5, BranchKind::Uncond);
            Some((insn, 5))
        }
        0xeb => {
            let disp = i8::from_le_bytes([*bytes.get(1)?]);
            let insn =
                Instruction::new(OP_JMP_REL, vec![Operand::Imm(i64::from(disp))], 2, BranchKind::Uncond);
            Some((insn, 2))
        }
        0xe8 => {
            let disp = i32::from_le_bytes(bytes.get(1..5)?.try_into().ok()?);
            let insn =
                Instruction::new(OP_CALL_REL, vec![Operand::Imm(i64::from(disp))], 5, BranchKind::Call);
            Some((insn, 5))
        }
        0xc3 => Some((Instruction::new(OP_RET, vec![], 1, BranchKind::Return), 1)),
        0x90 => Some((Instruction::new(OP_NOP, vec![], 1, BranchKind::Other), 1)),
        // `cmp eax, imm8` (83 /7 ib) and `cmp eax, imm32` (3d id), the only
        // two shapes S2 needs.
        0x83 if bytes.get(1).map(|b| b & 0x38 == 0x38).unwrap_or(false) => {
            let imm = i64::from(i8::from_le_bytes([*bytes.get(2)?]));
            Some((
                Instruction::new(OP_CMP, vec![Operand::Reg(0), Operand::Imm(imm)], 3, BranchKind::Other),
                3,
            ))
        }
        0x3d => {
            let imm = i32::from_le_bytes(bytes.get(1..5)?.try_into().ok()?);
            Some((
                Instruction::new(
                    OP_CMP,
                    vec![Operand::Reg(0), Operand::Imm(i64::from(imm))],
                    5,
                    BranchKind::Other,
                ),
                5,
            ))
        }
        // `jmp [base + index*8 + disp32]`: FF /4, ModRM with SIB, mod=00.
        0xff if bytes.get(1).map(|b| b & 0x38 == 0x20 && b & 0xc0 == 0).unwrap_or(false) => {
            let modrm = bytes[1];
            if modrm & 0x7 != 0x4 {
                return Some((Instruction::new(OP_OTHER, vec![], 1, BranchKind::Other), 1));
            }
            let sib = *bytes.get(2)?;
            let scale = 1u8 << (sib >> 6);
            let index = sib >> 3 & 0x7;
            let base = sib & 0x7;
            let disp = i32::from_le_bytes(bytes.get(3..7)?.try_into().ok()?);
            let insn = Instruction::new(
                OP_JMP_INDIRECT,
                vec![Operand::Mem {
                    base: if base == 0x5 { None } else { Some(u16::from(base)) },
                    index: Some(u16::from(index)),
                    scale,
                    disp: i64::from(disp),
                }],
                7,
                BranchKind::IndirectJump,
            );
            Some((insn, 7))
        }
        _ => Some((Instruction::new(OP_OTHER, vec![], 1, BranchKind::Other), 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ud2() {
        let (insn, len) = decode_one(&[0x0f, 0x0b]).unwrap();
        assert_eq!(len, 2);
        assert_eq!(insn.opcode, OP_UD2);
    }

    #[test]
    fn decodes_je_rel8() {
        let (insn, len) = decode_one(&[0x74, 0x08]).unwrap();
        assert_eq!(len, 2);
        assert_eq!(base_opcode(insn.opcode), OP_JCC);
        assert_eq!(jcc_cc(insn.opcode), CC_JE);
        assert_eq!(insn.operands[0], Operand::Imm(8));
    }

    #[test]
    fn decodes_jmp_indirect_sib() {
        let bytes = [0xff, 0x24, 0xc5, 0x00, 0x31, 0x00, 0x00];
        let (insn, len) = decode_one(&bytes).unwrap();
        assert_eq!(len, 7);
        assert_eq!(insn.opcode, OP_JMP_INDIRECT);
        match &insn.operands[0] {
            Operand::Mem { base, index, scale, disp } => {
                assert_eq!(*base, None);
                assert_eq!(*index, Some(0));
                assert_eq!(*scale, 8);
                assert_eq!(*disp, 0x3100);
            }
            other => panic!("expected Mem operand, got {other:?}"),
        }
    }
}
