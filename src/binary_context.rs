//! Process-wide state (spec.md §3, §9 "Global mutable state"): the symbol
//! table, allocatable sections, global relocations, the jump-table
//! registry, and the Instruction Analysis Facade. A single
//! [`BinaryContext`] is built once by the orchestrator and passed by shared
//! reference to every function's lifter; mutation of its maps is confined
//! to the lifting phase (spec.md §5).

use std::cmp::Ordering;
use std::collections::BTreeMap;

use indexmap::IndexMap;

use crate::isa::{self, Arch, InstructionAnalysis};
use crate::jump_table::JumpTable;

/// A process-wide-unique name. Globals keep their original name; locals are
/// uniqued by appending `/<file>/<counter>` at creation time (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol(pub String);

/// `{offset, symbol, type, addend, precomputed_value}` (spec.md §3).
/// Ordering by `offset` is total, which is what the Output Mapper and the
/// file-patching step rely on for a deterministic walk.
#[derive(Debug, Clone, PartialEq)]
pub struct Relocation {
    pub offset: u64,
    pub symbol: String,
    pub reloc_type: u32,
    pub addend: i64,
    pub precomputed_value: u64,
}

impl PartialOrd for Relocation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for Relocation {}

impl Ord for Relocation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.offset.cmp(&other.offset)
    }
}

/// An allocatable section of the input binary, addressable by its original
/// virtual address range.
#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub address: u64,
    pub size: u64,
    pub file_offset: u64,
    pub writable: bool,
    pub executable: bool,
    /// The section's on-disk contents, empty for `SHT_NOBITS` (`.bss`-like)
    /// sections. Backs jump-table entry discovery (§4.2a step 5).
    pub bytes: Vec<u8>,
}

impl Section {
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.address && addr < self.address + self.size
    }

    fn read_le(&self, addr: u64, size: u64) -> Option<u64> {
        let offset = (addr - self.address) as usize;
        let size = size as usize;
        let slice = self.bytes.get(offset..offset + size)?;
        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(slice);
        Some(u64::from_le_bytes(buf))
    }
}

/// Process-wide state shared (by reference) across every function's
/// lifting, optimization, and emission pass (spec.md §2 "Binary Context").
pub struct BinaryContext {
    pub arch: Arch,
    isa: Box<dyn InstructionAnalysis>,
    /// address -> canonical symbol name.
    addr_to_name: BTreeMap<u64, String>,
    /// name -> address, the inverse of `addr_to_name`.
    name_to_addr: IndexMap<String, u64>,
    /// symbol name -> owning function address, populated as functions are
    /// created from the symbol table (§4.5 step 1).
    symbol_to_function: IndexMap<String, u64>,
    /// Sections ordered by address for containment queries.
    sections: Vec<Section>,
    pub relocations: Vec<Relocation>,
    /// Jump tables keyed by their physical array address; a single entry
    /// may back multiple logical sub-tables via `JumpTable::sub_labels`
    /// (spec.md §3).
    pub jump_tables: IndexMap<u64, JumpTable>,
    /// Addresses referenced from outside their owning function that turned
    /// out to point strictly inside it (§4.5 step 4); such functions are
    /// marked non-simple because we don't own their internal labels.
    pub interprocedural_references: Vec<u64>,
    local_symbol_counter: u32,
}

impl BinaryContext {
    pub fn new(arch: Arch) -> BinaryContext {
        BinaryContext {
            arch,
            isa: isa::for_arch(arch),
            addr_to_name: BTreeMap::new(),
            name_to_addr: IndexMap::new(),
            symbol_to_function: IndexMap::new(),
            sections: Vec::new(),
            relocations: Vec::new(),
            jump_tables: IndexMap::new(),
            interprocedural_references: Vec::new(),
            local_symbol_counter: 0,
        }
    }

    pub fn isa(&self) -> &dyn InstructionAnalysis {
        self.isa.as_ref()
    }

    pub fn add_section(&mut self, section: Section) {
        let pos = self.sections.partition_point(|s| s.address < section.address);
        self.sections.insert(pos, section);
    }

    pub fn section_containing(&self, addr: u64) -> Option<&Section> {
        self.sections.iter().find(|s| s.contains(addr))
    }

    pub fn section_named(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Parses `.eh_frame` and returns the FDE covering `addr`, if any
    /// (spec.md §3 "frame-instruction vector...as parsed from `.eh_frame`").
    /// `None` for a binary with no `.eh_frame` section, a malformed one, or
    /// simply no FDE covering this address.
    pub fn eh_frame_fde_covering(&self, addr: u64) -> Option<crate::eh_frame::Fde> {
        let section = self.section_named(".eh_frame")?;
        let fdes = crate::eh_frame::parse(&section.bytes).ok()?;
        fdes.into_iter().find(|fde| fde.covers(addr))
    }

    /// Reads one `size`-byte little-endian jump-table entry at `addr`
    /// (§4.2a step 5: "starting at the array offset, read entries of the
    /// expected size"). `None` if `addr` falls outside any known section
    /// or past its backing bytes, which ends the discovery scan.
    pub fn read_table_entry(&self, addr: u64, size: u64) -> Option<u64> {
        self.section_containing(addr)?.read_le(addr, size)
    }

    /// Registers a global symbol name at `addr`, returning the name that
    /// should be used to reference it (unchanged; globals keep their name).
    pub fn register_global(&mut self, name: &str, addr: u64) -> String {
        self.addr_to_name.insert(addr, name.to_string());
        self.name_to_addr.insert(name.to_string(), addr);
        name.to_string()
    }

    /// Registers a local symbol, uniquing its name by appending
    /// `/<file>/<counter>` (spec.md §3).
    pub fn register_local(&mut self, name: &str, addr: u64, file: &str) -> String {
        self.local_symbol_counter += 1;
        let unique = format!("{name}/{file}/{}", self.local_symbol_counter);
        self.addr_to_name.insert(addr, unique.clone());
        self.name_to_addr.insert(unique.clone(), addr);
        unique
    }

    pub fn name_of(&self, addr: u64) -> Option<&str> {
        self.addr_to_name.get(&addr).map(String::as_str)
    }

    pub fn address_of(&self, name: &str) -> Option<u64> {
        self.name_to_addr.get(name).copied()
    }

    /// `get-or-create a global symbol for the target` (§4.2 step for
    /// external direct branches): returns the existing name if one is
    /// registered at `addr`, otherwise synthesizes and registers one.
    pub fn get_or_create_global_symbol(&mut self, addr: u64, prefix: &str) -> String {
        if let Some(name) = self.name_of(addr) {
            return name.to_string();
        }
        let name = format!("{prefix}_{addr:x}");
        self.register_global(&name, addr)
    }

    pub fn bind_function(&mut self, symbol: &str, function_address: u64) {
        self.symbol_to_function.insert(symbol.to_string(), function_address);
    }

    pub fn function_of_symbol(&self, symbol: &str) -> Option<u64> {
        self.symbol_to_function.get(symbol).copied()
    }

    /// Looks up the jump table backing `addr` exactly, or the jump table
    /// whose range contains `addr` as a non-zero offset (the "new reference
    /// points into the middle of that table" case in spec.md §4.2a step 3).
    pub fn jump_table_covering(&self, addr: u64) -> Option<(&u64, &JumpTable)> {
        self.jump_tables.iter().find(|(&start, jt)| {
            addr >= start && addr < start + jt.len() as u64 * u64::from(jt.entry_size)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locals_are_uniqued_but_globals_are_not() {
        let mut ctx = BinaryContext::new(Arch::X86_64);
        let g = ctx.register_global("main", 0x1000);
        assert_eq!(g, "main");
        let l1 = ctx.register_local(".L0", 0x1010, "a.c");
        let l2 = ctx.register_local(".L0", 0x1020, "a.c");
        assert_ne!(l1, l2);
        assert_eq!(ctx.address_of("main"), Some(0x1000));
    }

    #[test]
    fn section_containment_respects_address_range() {
        let mut ctx = BinaryContext::new(Arch::X86_64);
        ctx.add_section(Section {
            name: ".text".into(),
            address: 0x1000,
            size: 0x100,
            file_offset: 0x1000,
            writable: false,
            executable: true,
            bytes: vec![0; 0x100],
        });
        assert!(ctx.section_containing(0x1050).is_some());
        assert!(ctx.section_containing(0x2000).is_none());
    }

    #[test]
    fn read_table_entry_reads_little_endian_bytes_from_section() {
        let mut ctx = BinaryContext::new(Arch::X86_64);
        let mut bytes = vec![0u8; 16];
        bytes[8..16].copy_from_slice(&0x1000_2000u64.to_le_bytes());
        ctx.add_section(Section {
            name: ".rodata".into(),
            address: 0x3000,
            size: 16,
            file_offset: 0x3000,
            writable: false,
            executable: false,
            bytes,
        });
        assert_eq!(ctx.read_table_entry(0x3008, 8), Some(0x1000_2000));
        assert_eq!(ctx.read_table_entry(0x3100, 8), None);
    }
}
