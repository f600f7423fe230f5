//! Profile parsing (spec.md §6, SPEC_FULL.md §14), grounded in the
//! reference implementation's `DataReader.h`/`DataReader.cpp` (fdata text
//! format) and `ProfileYAMLMapping.h` (YAML format). Both formats collapse
//! into one [`Profile`]: per-function branch and call-site counts keyed by
//! `(from_offset, to_offset)`, since that's all the Rewriter Orchestrator's
//! steps 3 and 5 need to attach counts to CFG edges.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// How a `Location` in an fdata line identified its function, mirroring
/// `DataReader.h`'s `{IsSymbol}` discriminant collapsed to the two cases
/// this crate's `BinaryContext` actually distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    Symbol,
    Dso,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub kind: LocationKind,
    pub name: String,
    pub offset: u64,
}

/// One parsed branch or memory-sample record (spec.md §6 "Profile input").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRecord {
    pub from: Location,
    pub to: Location,
    pub mispreds: u64,
    pub branches: u64,
}

/// Per-function profile: branch/call edge counts keyed by
/// `(from_offset, to_offset)`, execution count, and per-block counts when
/// the source was YAML (fdata has no block-level granularity).
#[derive(Debug, Clone, Default)]
pub struct FunctionProfile {
    pub execution_count: u64,
    pub edge_counts: BTreeMap<(u64, u64), (u64, u64)>,
    pub block_counts: BTreeMap<u64, u64>,
    /// Per-block content hash as recorded by a YAML profile's `hash`
    /// field, keyed by block index. Empty for fdata-sourced profiles,
    /// which carry no per-block hash at all.
    pub block_hashes: BTreeMap<u64, u64>,
}

impl FunctionProfile {
    /// Additive merge on matching edges/blocks (spec.md §6: "merging
    /// between YAML profiles is additive on matching block indices and
    /// call-site offsets").
    pub fn merge(&mut self, other: &FunctionProfile) {
        self.execution_count += other.execution_count;
        for (&key, &(mis, cnt)) in &other.edge_counts {
            let entry = self.edge_counts.entry(key).or_insert((0, 0));
            entry.0 += mis;
            entry.1 += cnt;
        }
        for (&off, &cnt) in &other.block_counts {
            *self.block_counts.entry(off).or_insert(0) += cnt;
        }
        for (&bid, &hash) in &other.block_hashes {
            self.block_hashes.entry(bid).or_insert(hash);
        }
    }
}

/// FNV-1a over each instruction's opcode and encoded size, the coarse
/// content fingerprint a YAML profile's per-block `hash` is checked
/// against (spec.md §7 "function hash differs from profile's expected
/// hash").
pub fn block_content_hash(block: &crate::basic_block::BasicBlock) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for insn in &block.instructions {
        for byte in insn.opcode.to_le_bytes().into_iter().chain(std::iter::once(insn.size)) {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
    }
    hash
}

#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub sample_only: bool,
    pub self_profiling: bool,
    pub functions: BTreeMap<String, FunctionProfile>,
}

impl Profile {
    pub fn function(&self, name: &str) -> Option<&FunctionProfile> {
        self.functions.get(name)
    }
}

fn parse_location(is_symbol: &str, name: &str, offset: &str) -> Result<Location> {
    let kind = match is_symbol {
        "0" => LocationKind::Dso,
        "1" | "2" => LocationKind::Symbol,
        other => return Err(Error::Malformed(format!("unknown profile location kind {other}"))),
    };
    let offset = u64::from_str_radix(offset.trim_start_matches("0x"), 16)
        .map_err(|e| Error::Malformed(format!("bad profile offset {offset:?}: {e}")))?;
    Ok(Location { kind, name: name.to_string(), offset })
}

/// Parses the newline-delimited fdata text format (spec.md §6): each
/// branch line is `<from-is-symbol> <from-name> <from-offset-hex>
/// <to-is-symbol> <to-name> <to-offset-hex> <mispreds> <branches>`, with
/// `is-symbol` codes `{3,4,5}` denoting memory-sample lines (folded into
/// the same edge-count table, since this crate only needs aggregate
/// counts per offset pair, not the sample/branch distinction).
pub fn parse_fdata(text: &str) -> Result<Profile> {
    let mut profile = Profile::default();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("no_lbr") {
            profile.sample_only = true;
            let _ = rest;
            continue;
        }
        if line == "boltedcollection" {
            profile.self_profiling = true;
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 8 {
            return Err(Error::Malformed(format!("fdata line {}: expected 8 fields, got {}", lineno + 1, fields.len())));
        }
        let from = parse_location(fields[0], fields[1], fields[2])?;
        let to = parse_location(fields[3], fields[4], fields[5])?;
        let mispreds: u64 = fields[6].parse().map_err(|e| Error::Malformed(format!("fdata line {}: bad mispreds: {e}", lineno + 1)))?;
        let branches: u64 = fields[7].parse().map_err(|e| Error::Malformed(format!("fdata line {}: bad branches: {e}", lineno + 1)))?;

        let fp = profile.functions.entry(from.name.clone()).or_default();
        let entry = fp.edge_counts.entry((from.offset, to.offset)).or_insert((0, 0));
        entry.0 += mispreds;
        entry.1 += branches;
        fp.execution_count += branches;
    }
    Ok(profile)
}

/// Wire shape for one `{off, fid, cnt, mis}` flow-style entry, matching
/// `ProfileYAMLMapping.h`'s `CallSiteInfo` (`off`/`fid`/`disc`/`cnt`/`mis`
/// short keys).
#[cfg(feature = "yaml-profile")]
#[derive(Debug, serde::Deserialize)]
struct YamlCallSiteInfo {
    off: u64,
    #[serde(default)]
    fid: u32,
    #[serde(default)]
    disc: u32,
    #[serde(default)]
    cnt: u64,
    #[serde(default)]
    mis: u64,
}

#[cfg(feature = "yaml-profile")]
#[derive(Debug, serde::Deserialize)]
struct YamlBlock {
    bid: u64,
    #[serde(default)]
    hash: u64,
    #[serde(default)]
    insns: u32,
    #[serde(default)]
    cnt: u64,
    #[serde(default)]
    calls: Vec<YamlCallSiteInfo>,
    #[serde(default)]
    succs: Vec<YamlCallSiteInfo>,
}

#[cfg(feature = "yaml-profile")]
#[derive(Debug, serde::Deserialize)]
struct YamlFunction {
    name: String,
    #[serde(default)]
    exec: u64,
    #[serde(default)]
    blocks: Vec<YamlBlock>,
}

/// Parses BOLT's YAML profile format via `serde_yaml`, using the field
/// names `ProfileYAMLMapping.h`'s `MappingTraits` specializations define
/// (`off`/`fid`/`cnt`/`mis` for edges, `bid`/`cnt` for blocks).
#[cfg(feature = "yaml-profile")]
pub fn parse_yaml(text: &str) -> Result<Profile> {
    let functions: Vec<YamlFunction> =
        serde_yaml::from_str(text).map_err(|e| Error::Malformed(format!("invalid YAML profile: {e}")))?;

    let mut profile = Profile::default();
    for yf in functions {
        let fp = profile.functions.entry(yf.name).or_default();
        fp.execution_count += yf.exec;
        for block in yf.blocks {
            let _ = block.insns;
            fp.block_hashes.entry(block.bid).or_insert(block.hash);
            *fp.block_counts.entry(block.bid).or_insert(0) += block.cnt;
            for edge in block.calls.iter().chain(block.succs.iter()) {
                let _ = (edge.fid, edge.disc);
                let entry = fp.edge_counts.entry((block.bid, edge.off)).or_insert((0, 0));
                entry.0 += edge.mis;
                entry.1 += edge.cnt;
            }
        }
    }
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fdata_branch_lines() {
        let text = "1 main 0 1 main a 1 100\n1 main 0 1 main 9 0 10\n";
        let profile = parse_fdata(text).unwrap();
        let fp = profile.function("main").unwrap();
        assert_eq!(fp.edge_counts.get(&(0, 0xa)), Some(&(1, 100)));
        assert_eq!(fp.edge_counts.get(&(0, 0x9)), Some(&(0, 10)));
        assert_eq!(fp.execution_count, 110);
    }

    #[test]
    fn no_lbr_marks_sample_only() {
        let profile = parse_fdata("no_lbr cycles\n").unwrap();
        assert!(profile.sample_only);
    }

    #[test]
    fn rejects_malformed_line() {
        assert!(parse_fdata("1 main 0 1 main\n").is_err());
    }

    #[test]
    fn block_content_hash_differs_when_opcodes_differ() {
        use crate::basic_block::BasicBlock;
        use crate::instruction::{BranchKind, Instruction};

        let mut a = BasicBlock::new("BB0".into(), 0);
        a.push_instruction(Instruction::new(1, vec![], 2, BranchKind::Other));
        let mut b = BasicBlock::new("BB0".into(), 0);
        b.push_instruction(Instruction::new(2, vec![], 2, BranchKind::Other));

        assert_ne!(block_content_hash(&a), block_content_hash(&b));
    }

    #[test]
    fn merges_additively_on_matching_edges() {
        let mut a = FunctionProfile::default();
        a.edge_counts.insert((0, 4), (1, 10));
        let mut b = FunctionProfile::default();
        b.edge_counts.insert((0, 4), (2, 20));
        a.merge(&b);
        assert_eq!(a.edge_counts.get(&(0, 4)), Some(&(3, 30)));
    }

    #[test]
    #[cfg(feature = "yaml-profile")]
    fn parses_minimal_yaml_function_block() {
        let text = "- name: main\n  exec: 500\n  blocks:\n    - bid: 0\n      cnt: 500\n      succs:\n        - { off: 0, fid: 1, cnt: 400, mis: 2 }\n";
        let profile = parse_yaml(text).unwrap();
        let fp = profile.function("main").unwrap();
        assert_eq!(fp.execution_count, 500);
        assert_eq!(fp.block_counts.get(&0), Some(&500));
        assert_eq!(fp.edge_counts.get(&(0, 0)), Some(&(2, 400)));
    }
}
