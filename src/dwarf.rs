//! Minimal DWARF debug-info patching (spec.md §4.5 step 10): address
//! ranges attached to DIEs are translated through the Output Mapper and
//! rewritten in place; `.debug_aranges` and `.gdb_index`'s address table
//! are regenerated from the collected per-compile-unit ranges. A full
//! DWARF abbreviation/form reader is out of scope (spec.md §1's "low-level
//! machine-code encoder... assumed available as a service" sets the same
//! precedent for debug info: this module works over an already-decoded
//! DIE model, not raw `.debug_abbrev` bytes).

use crate::function::Function;
use crate::output_mapper::{self, AddressRange, EmittedInstruction};

/// One DIE's address-range attribute, in whichever form the producer used
/// (spec.md §4.5 step 10: "patching the abbreviation table to convert
/// (low_pc, high_pc) attribute pairs to (ranges, low_pc=udata) when the
/// original representation can't fit a ranges-offset").
#[derive(Debug, Clone, PartialEq)]
pub enum DieRange {
    LowHigh { low_pc: u64, high_pc: u64 },
    /// An offset into `.debug_ranges`, resolved to a flat list of ranges
    /// by the caller before this module ever sees it.
    Ranges(Vec<AddressRange>),
}

#[derive(Debug, Clone)]
pub struct Die {
    pub offset: u64,
    pub range: Option<DieRange>,
    /// `DW_AT_location` entries: one location-list entry per covered
    /// input range, carrying an opaque DWARF expression.
    pub location_list: Vec<output_mapper::LocationListEntry<Vec<u8>>>,
}

#[derive(Debug, Clone, Default)]
pub struct CompileUnit {
    pub dies: Vec<Die>,
}

/// Translates one DIE's range attribute through the Output Mapper,
/// converting to the `Ranges` form whenever translation produced more
/// than one disjoint output range (a single `(low_pc, high_pc)` pair
/// can't represent a split function).
pub fn patch_die_range(die: &mut Die, table: &[EmittedInstruction], func: &Function) {
    let Some(range) = &die.range else { return };
    let input_ranges: Vec<AddressRange> = match range {
        DieRange::LowHigh { low_pc, high_pc } => vec![AddressRange { start: *low_pc, end: *high_pc }],
        DieRange::Ranges(ranges) => ranges.clone(),
    };

    let mut output_ranges = Vec::new();
    for input in input_ranges {
        output_ranges.extend(output_mapper::translate_input_to_output_ranges(table, func, input));
    }

    die.range = Some(match output_ranges.as_slice() {
        [single] => DieRange::LowHigh { low_pc: single.start, high_pc: single.end },
        _ => DieRange::Ranges(output_ranges),
    });
}

pub fn patch_die_location_list(die: &mut Die, table: &[EmittedInstruction], func: &Function) {
    die.location_list = output_mapper::translate_location_list(table, func, &die.location_list);
    merge_adjacent_identical(&mut die.location_list);
}

/// `translateInputToOutputLocationList`'s "merging adjacent entries that
/// share identical location expressions" (spec.md §4.3.4/§4.4).
fn merge_adjacent_identical(entries: &mut Vec<output_mapper::LocationListEntry<Vec<u8>>>) {
    let mut merged: Vec<output_mapper::LocationListEntry<Vec<u8>>> = Vec::with_capacity(entries.len());
    for entry in entries.drain(..) {
        match merged.last_mut() {
            Some(last) if last.range.end == entry.range.start && last.value == entry.value => {
                last.range.end = entry.range.end;
            }
            _ => merged.push(entry),
        }
    }
    *entries = merged;
}

/// Walks every DIE in `cu` with an address range and patches it,
/// returning the flattened set of output ranges for `.debug_aranges`
/// regeneration.
pub fn patch_compile_unit(cu: &mut CompileUnit, table: &[EmittedInstruction], func: &Function) -> Vec<AddressRange> {
    let mut all_ranges = Vec::new();
    for die in &mut cu.dies {
        patch_die_range(die, table, func);
        patch_die_location_list(die, table, func);
        match &die.range {
            Some(DieRange::LowHigh { low_pc, high_pc }) => all_ranges.push(AddressRange { start: *low_pc, end: *high_pc }),
            Some(DieRange::Ranges(ranges)) => all_ranges.extend(ranges.iter().copied()),
            None => {}
        }
    }
    all_ranges
}

/// Regenerates the `.debug_aranges` address table: one `{start, length}`
/// pair per compile unit's merged address ranges (spec.md §4.5 step 10).
pub fn build_debug_aranges(per_cu_ranges: &[Vec<AddressRange>]) -> Vec<(u64, u64)> {
    per_cu_ranges
        .iter()
        .flat_map(|ranges| ranges.iter().map(|r| (r.start, r.end - r.start)))
        .collect()
}

/// Regenerates `.gdb_index`'s address table: `{low, high, cu_index}`
/// triples, one per compile unit range, in the format GDB's fast-lookup
/// index expects.
pub fn build_gdb_index_address_table(per_cu_ranges: &[Vec<AddressRange>]) -> Vec<(u64, u64, u32)> {
    let mut table = Vec::new();
    for (cu_index, ranges) in per_cu_ranges.iter().enumerate() {
        for r in ranges {
            table.push((r.start, r.end, cu_index as u32));
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic_block::BasicBlock;
    use crate::instruction::{AnnotationValue, BranchKind, Instruction, ANNOT_OFFSET};

    fn sample_function() -> (Function, Vec<EmittedInstruction>) {
        let mut f = Function::new("f".into(), 0x1000, 8, 8);
        let mut b0 = BasicBlock::new("BB0".into(), 0);
        let mut i0 = Instruction::new(1, vec![], 8, BranchKind::Other);
        i0.add_annotation(ANNOT_OFFSET, AnnotationValue::U64(0));
        b0.instructions.push(i0);
        f.blocks.push(b0);
        f.layout = vec![0];
        let table = output_mapper::build_emission_table(&f, &|_| 0x5000);
        (f, table)
    }

    #[test]
    fn patches_low_high_range_through_translation() {
        let (func, table) = sample_function();
        let mut die = Die { offset: 0, range: Some(DieRange::LowHigh { low_pc: 0x1000, high_pc: 0x1008 }), location_list: vec![] };
        patch_die_range(&mut die, &table, &func);
        assert_eq!(die.range, Some(DieRange::LowHigh { low_pc: 0x5000, high_pc: 0x5008 }));
    }

    #[test]
    fn merges_adjacent_identical_location_entries() {
        let mut entries = vec![
            output_mapper::LocationListEntry { range: AddressRange { start: 0, end: 4 }, value: vec![1, 2] },
            output_mapper::LocationListEntry { range: AddressRange { start: 4, end: 8 }, value: vec![1, 2] },
            output_mapper::LocationListEntry { range: AddressRange { start: 8, end: 12 }, value: vec![3] },
        ];
        merge_adjacent_identical(&mut entries);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].range, AddressRange { start: 0, end: 8 });
    }
}
