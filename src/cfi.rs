//! CFI (call-frame information) state tracking (spec.md §4.3.5, §4.3.5a),
//! grounded in the reference implementation's `CFIReaderWriter`
//! (`examples/original_source/bolt/src/Exceptions.h`): a CIE's default
//! rule set followed by an FDE's sequential program, exposed as an
//! indexable snapshot so the CFG Manipulator can diff two points in the
//! program and emit only what changed.

use std::collections::BTreeMap;

use crate::instruction::CFIKind;

/// How a single register (or the CFA) is currently recovered, mirroring
/// the handful of DWARF rule kinds the rest of this crate needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Undefined,
    SameValue,
    /// Value is at `CFA + offset`.
    Offset(i64),
    Register(u16),
}

/// The effective unwind rule set at one point in the CFI program (spec.md
/// §4.3.5a): CFA recovery plus a rule per tracked register.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub cfa_register: u16,
    pub cfa_offset: i64,
    pub registers: BTreeMap<u16, Rule>,
}

impl Snapshot {
    /// `isRedundant` (spec.md §4.3.5a): true if emitting `cfi` against
    /// this snapshot would have no effect.
    pub fn is_redundant(&self, cfi: &CFIKind) -> bool {
        match *cfi {
            CFIKind::DefCfa { register, offset } => self.cfa_register == register && self.cfa_offset == offset,
            CFIKind::DefCfaRegister { register } => self.cfa_register == register,
            CFIKind::DefCfaOffset { offset } => self.cfa_offset == offset,
            CFIKind::Offset { register, offset } => self.registers.get(&register) == Some(&Rule::Offset(offset)),
            CFIKind::SameValue { register } => self.registers.get(&register) == Some(&Rule::SameValue),
            CFIKind::Undefined { register } => self.registers.get(&register) == Some(&Rule::Undefined),
            CFIKind::Restore { .. } | CFIKind::RememberState | CFIKind::RestoreState | CFIKind::GnuArgsSize { .. } | CFIKind::Escape => false,
        }
    }

    /// Applies one instruction destructively, for building a CIE's or FDE's
    /// default rule set up front (`eh_frame::parse`) rather than replaying
    /// against an existing program.
    pub fn apply_for_defaults(&mut self, cfi: &CFIKind) {
        self.apply(cfi);
    }

    fn apply(&mut self, cfi: &CFIKind) {
        match *cfi {
            CFIKind::DefCfa { register, offset } => {
                self.cfa_register = register;
                self.cfa_offset = offset;
            }
            CFIKind::DefCfaRegister { register } => self.cfa_register = register,
            CFIKind::DefCfaOffset { offset } => self.cfa_offset = offset,
            CFIKind::Offset { register, offset } => {
                self.registers.insert(register, Rule::Offset(offset));
            }
            CFIKind::SameValue { register } => {
                self.registers.insert(register, Rule::SameValue);
            }
            CFIKind::Undefined { register } => {
                self.registers.insert(register, Rule::Undefined);
            }
            CFIKind::Restore { register } => {
                self.registers.remove(&register);
            }
            CFIKind::RememberState | CFIKind::RestoreState | CFIKind::GnuArgsSize { .. } | CFIKind::Escape => {}
        }
    }
}

/// A CIE's default rules plus an FDE's sequential program (spec.md
/// §4.3.5a), indexable by CFI program position. CIE rules are logically
/// "index -1" and always applied first.
#[derive(Debug, Clone)]
pub struct CfiProgram {
    cie_defaults: Snapshot,
    fde_instructions: Vec<CFIKind>,
}

impl CfiProgram {
    pub fn new(cie_defaults: Snapshot, fde_instructions: Vec<CFIKind>) -> CfiProgram {
        CfiProgram { cie_defaults, fde_instructions }
    }

    pub fn len(&self) -> usize {
        self.fde_instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fde_instructions.is_empty()
    }

    pub fn instruction_at(&self, index: usize) -> Option<&CFIKind> {
        self.fde_instructions.get(index)
    }

    /// Snapshot after applying CIE defaults then FDE instructions
    /// `[0, index)`. `index == 0` is the CIE-only snapshot.
    pub fn snapshot_at(&self, index: usize) -> Snapshot {
        let mut snap = self.cie_defaults.clone();
        for cfi in self.fde_instructions.iter().take(index) {
            if !matches!(cfi, CFIKind::RememberState | CFIKind::RestoreState) {
                snap.apply(cfi);
            }
        }
        snap
    }

    /// `replayCFIInstrs(from, to)` (spec.md §4.3.5): the non-redundant
    /// instructions that move the unwind state forward from `from` to
    /// `to`, each checked against the snapshot built up so far.
    pub fn replay(&self, from: usize, to: usize) -> Vec<CFIKind> {
        let mut snap = self.snapshot_at(from);
        let mut out = Vec::new();
        for idx in from..to {
            let Some(cfi) = self.fde_instructions.get(idx) else { break };
            if matches!(cfi, CFIKind::RememberState | CFIKind::RestoreState) {
                continue;
            }
            if !snap.is_redundant(cfi) {
                out.push(cfi.clone());
            }
            snap.apply(cfi);
        }
        out
    }

    /// `unwindCFIState(from, to)` (spec.md §4.3.5): builds the explicit
    /// sequence of rules that turns the `from` snapshot into the `to`
    /// snapshot, expressed as direct `DefCfa`/`Offset`/`SameValue`/
    /// `Undefined` assignments (never `Restore`, since there is no single
    /// earlier point to restore from once the layout has moved).
    pub fn unwind(&self, from: usize, to: usize) -> Vec<CFIKind> {
        let source = self.snapshot_at(from);
        let target = self.snapshot_at(to);
        let mut out = Vec::new();

        if source.cfa_register != target.cfa_register || source.cfa_offset != target.cfa_offset {
            out.push(CFIKind::DefCfa { register: target.cfa_register, offset: target.cfa_offset });
        }

        let mut registers: Vec<u16> = source.registers.keys().chain(target.registers.keys()).copied().collect();
        registers.sort_unstable();
        registers.dedup();
        for reg in registers {
            let want = target.registers.get(&reg).copied().unwrap_or(Rule::Undefined);
            let have = source.registers.get(&reg).copied().unwrap_or(Rule::Undefined);
            if want == have {
                continue;
            }
            match want {
                Rule::Offset(offset) => out.push(CFIKind::Offset { register: reg, offset }),
                Rule::SameValue => out.push(CFIKind::SameValue { register: reg }),
                Rule::Undefined => out.push(CFIKind::Undefined { register: reg }),
                Rule::Register(_) => out.push(CFIKind::Undefined { register: reg }),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program() -> CfiProgram {
        CfiProgram::new(
            Snapshot { cfa_register: 7, cfa_offset: 8, registers: BTreeMap::new() },
            vec![
                CFIKind::DefCfaOffset { offset: 16 },
                CFIKind::Offset { register: 6, offset: -16 },
                CFIKind::RememberState,
                CFIKind::DefCfaOffset { offset: 24 },
                CFIKind::RestoreState,
            ],
        )
    }

    #[test]
    fn snapshot_accumulates_in_order() {
        let p = program();
        assert_eq!(p.snapshot_at(0).cfa_offset, 8);
        assert_eq!(p.snapshot_at(2).cfa_offset, 16);
        assert_eq!(p.snapshot_at(2).registers.get(&6), Some(&Rule::Offset(-16)));
    }

    #[test]
    fn replay_skips_redundant_instructions() {
        let p = program();
        let seq = p.replay(0, 2);
        assert_eq!(seq, vec![CFIKind::DefCfaOffset { offset: 16 }, CFIKind::Offset { register: 6, offset: -16 }]);
        // Replaying the same range twice from the same starting point is redundant.
        let snap_after = p.snapshot_at(2);
        assert!(snap_after.is_redundant(&CFIKind::DefCfaOffset { offset: 16 }));
    }

    #[test]
    fn unwind_restores_cfa_offset_backwards() {
        let p = program();
        let seq = p.unwind(4, 2);
        assert_eq!(seq, vec![CFIKind::DefCfa { register: 7, offset: 16 }]);
    }
}
