//! Jump tables (spec.md §3, §4.2a): address, entry layout, and the
//! pre-CFG/post-CFG views of a switch dispatch's targets.

use indexmap::IndexMap;

/// How entries are encoded on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpTableType {
    /// Each entry is a full pointer to the target.
    Absolute,
    /// Each entry is a signed 32-bit offset relative to the table's own
    /// address (PIC).
    PicRelative32,
}

/// Hot/cold assignment for the emitted table, decided during optimization
/// (spec.md §8 S3: "moving the jump-table block to cold does not affect its
/// correctness under `jump-tables=move`").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputSection {
    #[default]
    Hot,
    Cold,
}

/// A single physical jump table. A single address may back multiple logical
/// sub-tables when indirect branches reference non-zero offsets into the
/// same array (spec.md §3); those are represented by separate `JumpTable`
/// values sharing `address` but not `start_entry`, registered under
/// distinct keys in `BinaryContext::jump_tables`.
#[derive(Debug, Clone)]
pub struct JumpTable {
    pub address: u64,
    pub entry_size: u8,
    pub table_type: JumpTableType,
    /// Target offsets relative to the owning function's start, in table
    /// order, populated during lifting (§4.2a step 5-6).
    pub offsets: Vec<u64>,
    /// Resolved block labels, populated once the CFG exists; parallel to
    /// `offsets`.
    pub labels: Vec<Option<String>>,
    /// Labels for sub-tables keyed by their starting byte offset into this
    /// table (§4.2a step 3, "creating a sub-label for the new starting
    /// offset if needed").
    pub sub_labels: IndexMap<u64, String>,
    pub output_section: OutputSection,
}

impl JumpTable {
    pub fn new(address: u64, entry_size: u8, table_type: JumpTableType) -> JumpTable {
        JumpTable {
            address,
            entry_size,
            table_type,
            offsets: Vec::new(),
            labels: Vec::new(),
            sub_labels: IndexMap::new(),
            output_section: OutputSection::Hot,
        }
    }

    pub fn push_target(&mut self, offset: u64) {
        self.offsets.push(offset);
        self.labels.push(None);
    }

    /// Truncates entries to the prefix before `at_offset_index`, used when a
    /// second indirect branch is found to reference the middle of an
    /// already-registered table in PIC-jump-table mode (§4.2a step 3).
    pub fn truncate_before(&mut self, at_offset_index: usize) {
        self.offsets.truncate(at_offset_index);
        self.labels.truncate(at_offset_index);
    }

    pub fn resolve_label(&mut self, index: usize, label: String) {
        if let Some(slot) = self.labels.get_mut(index) {
            *slot = Some(label);
        }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_drops_suffix() {
        let mut jt = JumpTable::new(0x3100, 8, JumpTableType::Absolute);
        for off in [0u64, 8, 16, 24] {
            jt.push_target(off);
        }
        jt.truncate_before(2);
        assert_eq!(jt.len(), 2);
        assert_eq!(jt.offsets, vec![0, 8]);
    }
}
