//! Functions (spec.md §3): owner of basic blocks, the pre-CFG disassembly
//! state, and everything the CFG Manipulator and Output Mapper need once a
//! function has been lifted.

pub mod lifter;

use indexmap::IndexMap;
use std::collections::BTreeMap;

use crate::basic_block::BasicBlock;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;

/// Lifecycle states from spec.md §3's "Lifecycle" paragraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionState {
    Empty,
    Disassembled,
    Cfg,
    CfgFinalized,
    Emitted,
}

/// One call-site table entry, populated post-CFG for EH emission (spec.md
/// §3, §4.2b).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub start: u64,
    pub length: u64,
    pub landing_pad_offset: Option<u64>,
    pub action_entry: i64,
}

/// A `(source_offset, target_offset_relative_to_function)` edge discovered
/// during lifting, pre-CFG (spec.md §3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TakenBranch {
    pub source_offset: u64,
    pub target_offset: u64,
}

pub struct Function {
    /// A function may have aliases; `names[0]` is the canonical name.
    pub names: Vec<String>,
    pub address: u64,
    pub size: u64,
    /// Distance to the next symbol -- the largest size an in-place
    /// re-emission may use before it must spill to extra storage.
    pub max_size: u64,
    pub state: FunctionState,

    // -- Disassembled fields --
    /// offset -> instruction, valid once `state >= Disassembled`.
    pub instructions: BTreeMap<u64, Instruction>,
    /// offset -> label, contains at minimum offset 0 and every discovered
    /// branch target / entry point.
    pub labels: BTreeMap<u64, String>,
    pub entry_points: Vec<u64>,
    pub jump_tables: IndexMap<u64, JumpTable>,
    pub frame_instructions: Vec<crate::instruction::CFIKind>,
    /// offset (pre-CFG) -> index into `frame_instructions`.
    pub cfi_offset_map: BTreeMap<u64, usize>,
    pub taken_branches: Vec<TakenBranch>,
    pub call_sites: Vec<CallSite>,
    pub landing_pads: Vec<u64>,
    pub lsda_address: Option<u64>,

    // -- CFG fields --
    pub blocks: Vec<BasicBlock>,
    /// Retains invalidated blocks until function teardown so that stale
    /// handles held by annotations or debug-info translators remain
    /// dereferenceable (spec.md §9 "Cyclic graphs").
    pub deleted_blocks: Vec<BasicBlock>,
    /// Block order for emission; may differ from creation (block-index)
    /// order after a reordering pass.
    pub layout: Vec<crate::basic_block::BlockId>,
    /// `FrameRestoreEquivalents[restore_state_id]`: the explicit CFI
    /// sequence that reproduces a RestoreState's effect (§4.2c step 13).
    pub frame_restore_equivalents: BTreeMap<usize, Vec<crate::instruction::CFIKind>>,

    // -- Emission fields --
    pub output_address: Option<u64>,
    pub output_size: u64,
    pub cold_output_address: Option<u64>,
    pub cold_output_size: u64,
    pub cold_file_offset: Option<u64>,

    // -- Profile / status flags --
    pub execution_count: u64,
    /// A function whose CFG was fully recovered and may be optimized
    /// (spec.md glossary "Simple function"). Cleared by any recoverable
    /// lifting/CFG error per spec.md §7's propagation policy.
    pub simple: bool,
    pub traps_on_entry: bool,
    pub used_reloc: bool,
    pub preserve_nops: bool,
}

impl Function {
    pub fn new(name: String, address: u64, size: u64, max_size: u64) -> Function {
        Function {
            names: vec![name],
            address,
            size,
            max_size,
            state: FunctionState::Empty,
            instructions: BTreeMap::new(),
            labels: BTreeMap::new(),
            entry_points: vec![0],
            jump_tables: IndexMap::new(),
            frame_instructions: Vec::new(),
            cfi_offset_map: BTreeMap::new(),
            taken_branches: Vec::new(),
            call_sites: Vec::new(),
            landing_pads: Vec::new(),
            lsda_address: None,
            blocks: Vec::new(),
            deleted_blocks: Vec::new(),
            layout: Vec::new(),
            frame_restore_equivalents: BTreeMap::new(),
            output_address: None,
            output_size: 0,
            cold_output_address: None,
            cold_output_size: 0,
            cold_file_offset: None,
            execution_count: 0,
            simple: true,
            traps_on_entry: false,
            used_reloc: false,
            preserve_nops: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.names[0]
    }

    pub fn mark_non_simple(&mut self, reason: &str) {
        log::debug!("marking {} non-simple: {}", self.name(), reason);
        self.simple = false;
    }

    /// `getOrCreateLocalLabel` (spec.md §4.2 step "Direct branch or call,
    /// evaluatable"): returns the label at `offset`, synthesizing
    /// `BB_<offset>` if none exists yet.
    pub fn get_or_create_local_label(&mut self, offset: u64) -> String {
        if let Some(label) = self.labels.get(&offset) {
            return label.clone();
        }
        let label = format!("BB_{offset:x}");
        self.labels.insert(offset, label.clone());
        label
    }

    pub fn block_by_label(&self, label: &str) -> Option<crate::basic_block::BlockId> {
        self.blocks.iter().position(|b| b.label == label)
    }

    /// Finds the block containing `offset` (a per-block offset index would
    /// back this with a binary search in a size-sensitive implementation;
    /// the function count here is small enough that a linear scan over
    /// `layout`-independent `blocks` in offset order is sufficient and the
    /// invariant -- blocks are non-overlapping and span `[0, size)` -- holds
    /// regardless of layout).
    pub fn block_containing_offset(&self, offset: u64) -> Option<crate::basic_block::BlockId> {
        self.blocks.iter().position(|b| offset >= b.offset && offset < b.end_offset)
    }

    pub fn is_split(&self) -> bool {
        self.cold_output_address.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_labels_are_memoized() {
        let mut f = Function::new("foo".into(), 0x1000, 32, 32);
        let a = f.get_or_create_local_label(8);
        let b = f.get_or_create_local_label(8);
        assert_eq!(a, b);
    }
}
