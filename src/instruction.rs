//! Instruction records and the annotation map that rides along with them
//! through lifting, CFG construction, and re-emission (spec.md §3).
//!
//! The record is deliberately opaque to everything except the Instruction
//! Analysis Facade (`isa`): the CFG Manipulator and Output Mapper only ever
//! touch `Instruction` through facade calls or through the annotation map's
//! reserved keys.

use indexmap::IndexMap;

/// Reserved annotation key: byte offset of the instruction relative to its
/// function's start, used for profile matching and output-address
/// translation.
pub const ANNOT_OFFSET: &str = "Offset";
/// Reserved annotation key: same as `Offset`, attached to memory-sample
/// carrying instructions.
pub const ANNOT_MEM_DATA_OFFSET: &str = "MemDataOffset";
/// Conditional-tail-call taken count from the profile.
pub const ANNOT_CTC_TAKEN_COUNT: &str = "CTCTakenCount";
/// Conditional-tail-call mispredict count from the profile.
pub const ANNOT_CTC_MISPRED_COUNT: &str = "CTCMispredCount";
/// Marks a linker-generated long-branch stub on AArch64.
pub const ANNOT_AARCH64_VENEER: &str = "AArch64Veneer";
/// The conditional-tail-call target symbol, set during lifting (§4.2 step
/// "conditional branches whose target is an external address").
pub const ANNOT_CONDITIONAL_TAIL_CALL: &str = "ConditionalTailCall";
/// GNU args-size value threaded onto invoke instructions (§4.2c step 11).
pub const ANNOT_GNU_ARGS_SIZE: &str = "GnuArgsSize";
/// Landing-pad label attached to a covered call (§4.2b).
pub const ANNOT_EH_LANDING_PAD: &str = "EHLandingPad";
/// LSDA action-table index attached to a covered call (§4.2b).
pub const ANNOT_EH_ACTION: &str = "EHAction";
/// Marks an instruction whose immediate was cross-checked against a
/// relocation's precomputed value (§4.2 step 4, AArch64 branch).
pub const ANNOT_USED_RELOC: &str = "UsedReloc";
/// Marks a legacy-PIC internal call whose branch target must not move
/// (§4.2 step "Direct branch or call, evaluatable").
pub const ANNOT_PRESERVE_NOPS: &str = "PreserveNops";
/// How an indirect branch was classified during lifting (§4.2a): a
/// `Symbol` value of `"JumpTable"` or `"TailCall"`. Absence means the
/// branch is still ambiguous, which `validate_indirect_branches` treats as
/// an indirect-branch-ambiguity error (spec.md §7).
pub const ANNOT_INDIRECT_BRANCH_CLASS: &str = "IndirectBranchClass";

/// A typed annotation value. Kept as a small enum rather than per-kind
/// struct fields -- different architectures and different passes attach
/// different data, and this keeps the `Instruction` record itself
/// architecture-agnostic (spec.md §9 "Annotation map").
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationValue {
    U64(u64),
    I64(i64),
    Bool(bool),
    Symbol(String),
    /// `(landing_pad_label, action_index)`, i.e. `get-eh-info`'s payload.
    EhInfo(String, i64),
}

impl AnnotationValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            AnnotationValue::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AnnotationValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AnnotationValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            AnnotationValue::Symbol(s) => Some(s),
            _ => None,
        }
    }
}

/// A 64-bit token encoding a DWARF compile-unit index and a row index into
/// that unit's line table (spec.md §3's "Instruction record").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLocation(u64);

impl SourceLocation {
    pub fn new(cu_index: u32, row_index: u32) -> SourceLocation {
        SourceLocation((u64::from(cu_index) << 32) | u64::from(row_index))
    }

    pub fn cu_index(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn row_index(&self) -> u32 {
        self.0 as u32
    }
}

/// Sum type for branch classification (spec.md §9 "Sum types"), produced by
/// `analyzeBranch`/`analyzeIndirectBranch` and consumed by the CFG
/// Manipulator. Kept independent of any one architecture's opcode space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    Uncond,
    Cond,
    IndirectJump,
    Call,
    TailCall,
    Return,
    Other,
}

/// DWARF CFI opcode, tagged rather than modeled via inheritance (spec.md §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CFIKind {
    DefCfa { register: u16, offset: i64 },
    DefCfaRegister { register: u16 },
    DefCfaOffset { offset: i64 },
    Offset { register: u16, offset: i64 },
    Restore { register: u16 },
    RememberState,
    RestoreState,
    GnuArgsSize { size: i64 },
    SameValue { register: u16 },
    Undefined { register: u16 },
    Escape,
}

/// An operand of a lifted instruction. Intentionally coarse: the core never
/// needs to fully general-purpose-decode operands, only to recognize the
/// shapes the facade's mutators rewrite (branch targets, memory
/// base+index*scale+disp addressing, and relocation-carrying immediates).
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Reg(u16),
    Imm(i64),
    /// `base + index*scale + disp`, any field optional except `disp`.
    Mem { base: Option<u16>, index: Option<u16>, scale: u8, disp: i64 },
    /// An unresolved or resolved symbolic reference with addend, produced by
    /// `replaceImmWithSymbol`/`replaceMemOperandDisp`.
    Symbol { name: String, addend: i64 },
}

/// A decoded instruction. Carries raw bytes (so the emitter can re-encode an
/// unmodified instruction by copying them verbatim -- the encoder proper is
/// out of scope per spec.md §1) plus the Instruction Analysis Facade's view
/// of it via `kind`/`operands`.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Raw architecture opcode/mnemonic identifier; meaningful only to the
    /// `isa` implementation that produced it.
    pub opcode: u32,
    pub operands: Vec<Operand>,
    /// Original encoded length in bytes, 0 for purely synthetic
    /// instructions (CFI pseudos, EH labels) that never reach the emitter.
    pub size: u8,
    pub kind: BranchKind,
    pub cfi: Option<CFIKind>,
    pub source_location: Option<SourceLocation>,
    /// The bytes `decode_one` read this instruction from, empty for
    /// synthetic instructions. Valid for verbatim re-emission only while
    /// `mutated` is false and `raw_bytes.len() == size as usize`.
    pub raw_bytes: Vec<u8>,
    /// Set by any `isa` mutator that successfully rewrites this
    /// instruction's opcode/operands/kind/size; the emitter can no longer
    /// trust `raw_bytes` once this is true, since the machine-code encoder
    /// that would re-encode the new fields is out of scope (spec.md §1).
    pub mutated: bool,
    annotations: IndexMap<String, AnnotationValue>,
}

impl Instruction {
    pub fn new(opcode: u32, operands: Vec<Operand>, size: u8, kind: BranchKind) -> Instruction {
        Instruction {
            opcode,
            operands,
            size,
            kind,
            cfi: None,
            source_location: None,
            raw_bytes: Vec::new(),
            mutated: false,
            annotations: IndexMap::new(),
        }
    }

    pub fn cfi(kind: CFIKind) -> Instruction {
        Instruction {
            opcode: 0,
            operands: Vec::new(),
            size: 0,
            kind: BranchKind::Other,
            cfi: Some(kind),
            source_location: None,
            raw_bytes: Vec::new(),
            mutated: false,
            annotations: IndexMap::new(),
        }
    }

    pub fn is_cfi(&self) -> bool {
        self.cfi.is_some()
    }

    pub fn mark_mutated(&mut self) {
        self.mutated = true;
    }

    /// True if the emitter can copy `raw_bytes` verbatim instead of falling
    /// back to a placeholder (spec.md §8 S1/S7: untouched instructions
    /// round-trip byte-for-byte).
    pub fn is_emit_verbatim(&self) -> bool {
        !self.mutated && self.raw_bytes.len() == self.size as usize
    }

    pub fn add_annotation(&mut self, key: &str, value: AnnotationValue) {
        self.annotations.insert(key.to_string(), value);
    }

    pub fn get_annotation(&self, key: &str) -> Option<&AnnotationValue> {
        self.annotations.get(key)
    }

    pub fn remove_annotation(&mut self, key: &str) -> Option<AnnotationValue> {
        self.annotations.shift_remove(key)
    }

    pub fn has_annotation(&self, key: &str) -> bool {
        self.annotations.contains_key(key)
    }

    pub fn offset(&self) -> Option<u64> {
        self.get_annotation(ANNOT_OFFSET).and_then(AnnotationValue::as_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_location_roundtrips_through_token() {
        let loc = SourceLocation::new(7, 4200);
        assert_eq!(loc.cu_index(), 7);
        assert_eq!(loc.row_index(), 4200);
    }

    #[test]
    fn annotation_roundtrip_and_removal() {
        let mut insn = Instruction::new(0, vec![], 1, BranchKind::Other);
        insn.add_annotation(ANNOT_OFFSET, AnnotationValue::U64(0x40));
        assert_eq!(insn.offset(), Some(0x40));
        assert!(insn.has_annotation(ANNOT_OFFSET));
        insn.remove_annotation(ANNOT_OFFSET);
        assert!(!insn.has_annotation(ANNOT_OFFSET));
    }
}
