//! The Output Mapper (spec.md §4.4): input-address/input-range to
//! output-address/output-range translation for debug info and exception
//! tables, once a function has been emitted.

use crate::basic_block::BlockId;
use crate::function::Function;

/// One emitted instruction's placement, enough to answer both direction-1
/// queries in spec.md §4.4.
#[derive(Debug, Clone, Copy)]
pub struct EmittedInstruction {
    pub input_offset: u64,
    pub output_address: u64,
    pub size: u8,
}

/// Builds the ordered table of emitted instruction placements by walking
/// `func.layout`, assuming each block's instructions were emitted
/// contiguously starting at its resolved output address. Real encoded
/// sizes come from the teacher's `size` field (re-emission is always a
/// copy-or-shrink of the original encoding, never a grow past `max_size`).
pub fn build_emission_table(func: &Function, block_output_addr: &dyn Fn(BlockId) -> u64) -> Vec<EmittedInstruction> {
    let mut table = Vec::new();
    for &bid in &func.layout {
        let block = &func.blocks[bid];
        let mut cursor = block_output_addr(bid);
        for insn in &block.instructions {
            if insn.size == 0 {
                continue;
            }
            let Some(input_offset) = insn.offset() else { continue };
            table.push(EmittedInstruction { input_offset, output_address: cursor, size: insn.size });
            cursor += u64::from(insn.size);
        }
    }
    table.sort_by_key(|e| e.input_offset);
    table
}

/// `translateInputToOutputAddress` (spec.md §4.4): the output address of
/// the instruction occupying `input_address`, found by locating the
/// largest table entry whose input offset does not exceed it.
pub fn translate_input_to_output_address(table: &[EmittedInstruction], func: &Function, input_address: u64) -> Option<u64> {
    if input_address == func.address + func.size {
        return table.last().map(|e| e.output_address + u64::from(e.size));
    }
    if input_address < func.address || input_address >= func.address + func.size {
        return None;
    }
    let offset = input_address - func.address;
    let idx = table.partition_point(|e| e.input_offset <= offset);
    if idx == 0 {
        return None;
    }
    let entry = &table[idx - 1];
    let within = offset - entry.input_offset;
    Some(entry.output_address + within.min(u64::from(entry.size.saturating_sub(1))))
}

/// One contiguous `[start, end)` range in either input or output space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub start: u64,
    pub end: u64,
}

/// `translateInputToOutputRanges` (spec.md §4.4): an input range may map to
/// several disjoint output ranges once a function has been split hot/cold
/// or its blocks reordered; returned in output-address order.
pub fn translate_input_to_output_ranges(table: &[EmittedInstruction], func: &Function, input: AddressRange) -> Vec<AddressRange> {
    let mut ranges: Vec<AddressRange> = Vec::new();
    for entry in table {
        let insn_start = func.address + entry.input_offset;
        let insn_end = insn_start + u64::from(entry.size);
        if insn_end <= input.start || insn_start >= input.end {
            continue;
        }
        let out_start = entry.output_address;
        let out_end = entry.output_address + u64::from(entry.size);
        match ranges.last_mut() {
            Some(last) if last.end == out_start => last.end = out_end,
            _ => ranges.push(AddressRange { start: out_start, end: out_end }),
        }
    }
    ranges.sort_by_key(|r| r.start);
    ranges
}

/// One `(input_range, value)` entry of a DWARF location list.
#[derive(Debug, Clone)]
pub struct LocationListEntry<V> {
    pub range: AddressRange,
    pub value: V,
}

/// `translateInputToOutputLocationList` (spec.md §4.4): splits each input
/// location-list entry across however many output ranges its input range
/// now maps to, duplicating the DWARF expression unchanged.
pub fn translate_location_list<V: Clone>(
    table: &[EmittedInstruction],
    func: &Function,
    entries: &[LocationListEntry<V>],
) -> Vec<LocationListEntry<V>> {
    let mut out = Vec::new();
    for entry in entries {
        for range in translate_input_to_output_ranges(table, func, entry.range) {
            out.push(LocationListEntry { range, value: entry.value.clone() });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic_block::BasicBlock;
    use crate::instruction::{AnnotationValue, BranchKind, Instruction, ANNOT_OFFSET};

    fn sample_function() -> Function {
        let mut f = Function::new("f".into(), 0x1000, 8, 8);
        let mut b0 = BasicBlock::new("BB0".into(), 0);
        let mut i0 = Instruction::new(1, vec![], 4, BranchKind::Other);
        i0.add_annotation(ANNOT_OFFSET, AnnotationValue::U64(0));
        let mut i1 = Instruction::new(1, vec![], 4, BranchKind::Other);
        i1.add_annotation(ANNOT_OFFSET, AnnotationValue::U64(4));
        b0.instructions.push(i0);
        b0.instructions.push(i1);
        f.blocks.push(b0);
        f.layout = vec![0];
        f
    }

    #[test]
    fn translates_addresses_inside_known_instructions() {
        let f = sample_function();
        let table = build_emission_table(&f, &|_| 0x5000);
        assert_eq!(translate_input_to_output_address(&table, &f, 0x1000), Some(0x5000));
        assert_eq!(translate_input_to_output_address(&table, &f, 0x1004), Some(0x5004));
        assert_eq!(translate_input_to_output_address(&table, &f, 0x1006), Some(0x5006));
    }

    #[test]
    fn translates_function_end_address_to_function_output_end() {
        let f = sample_function();
        let table = build_emission_table(&f, &|_| 0x5000);
        assert_eq!(translate_input_to_output_address(&table, &f, 0x1008), Some(0x5008));
    }

    #[test]
    fn translates_contiguous_range_into_single_output_range() {
        let f = sample_function();
        let table = build_emission_table(&f, &|_| 0x5000);
        let ranges = translate_input_to_output_ranges(&table, &f, AddressRange { start: 0x1000, end: 0x1008 });
        assert_eq!(ranges, vec![AddressRange { start: 0x5000, end: 0x5008 }]);
    }
}
