//! LSDA (Language-Specific Data Area) parsing and regeneration (spec.md
//! §4.2b, §4.5 step 9), grounded in the reference implementation's
//! `Exceptions.h`/`Exceptions.cpp` call-site table walk. The `.gcc_except_table`
//! section holds, per function with a non-empty action table: a header
//! naming the landing-pad-start encoding and the type-table offset,
//! followed by a call-site table in `uleb128`-encoded GCC LSDA format.

use crate::error::{Error, Result};
use crate::function::CallSite;

/// DWARF exception-header encodings this parser recognizes in the call-site
/// table's length fields (the GCC LSDA call-site table always uses
/// `uleb128`; this covers the landing-pad-start encoding byte that precedes
/// it, which is the one real degree of freedom producers use).
pub const DW_EH_PE_ULEB128: u8 = 0x01;
pub const DW_EH_PE_UDATA4: u8 = 0x03;
pub const DW_EH_PE_OMIT: u8 = 0xff;

fn read_uleb128(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *bytes.get(*pos).ok_or_else(|| Error::Malformed("truncated uleb128 in LSDA".into()))?;
        *pos += 1;
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(result)
}

fn write_uleb128(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Parsed LSDA header: the two encoding bytes plus the byte offset (within
/// the LSDA) where the call-site table begins and ends.
#[derive(Debug, Clone, Copy)]
pub struct LsdaHeader {
    pub lp_start_encoding: u8,
    pub ttype_encoding: u8,
    pub call_site_table_start: usize,
    pub call_site_table_end: usize,
}

/// Parses the header and call-site table at `lsda` (the bytes of
/// `.gcc_except_table` starting at the function's LSDA address), returning
/// the header and the decoded `{start, length, landing_pad_offset,
/// action_entry}` entries (spec.md §4.2b).
pub fn parse(lsda: &[u8]) -> Result<(LsdaHeader, Vec<CallSite>)> {
    let mut pos = 0usize;
    let lp_start_encoding = *lsda.get(pos).ok_or_else(|| Error::Malformed("empty LSDA".into()))?;
    pos += 1;
    if lp_start_encoding != DW_EH_PE_OMIT {
        // landing pad base, absent in the GCC LSDA layout we target; skip a uleb128 if present.
        read_uleb128(lsda, &mut pos)?;
    }
    let ttype_encoding = *lsda.get(pos).ok_or_else(|| Error::Malformed("truncated LSDA header".into()))?;
    pos += 1;
    if ttype_encoding != DW_EH_PE_OMIT {
        read_uleb128(lsda, &mut pos)?;
    }
    let cs_encoding = *lsda.get(pos).ok_or_else(|| Error::Malformed("truncated LSDA header".into()))?;
    pos += 1;
    let cs_table_len = read_uleb128(lsda, &mut pos)? as usize;
    let call_site_table_start = pos;
    let call_site_table_end = call_site_table_start + cs_table_len;

    let mut call_sites = Vec::new();
    while pos < call_site_table_end {
        let (start, length, landing_pad, action) = if cs_encoding == DW_EH_PE_UDATA4 {
            let chunk = lsda
                .get(pos..pos + 12)
                .ok_or_else(|| Error::Malformed("truncated call-site entry in LSDA".into()))?;
            let start = u32::from_le_bytes(chunk[0..4].try_into().unwrap()) as u64;
            let length = u32::from_le_bytes(chunk[4..8].try_into().unwrap()) as u64;
            let landing_pad = u32::from_le_bytes(chunk[8..12].try_into().unwrap()) as u64;
            pos += 12;
            let action = read_uleb128(lsda, &mut pos)?;
            (start, length, landing_pad, action)
        } else {
            let start = read_uleb128(lsda, &mut pos)?;
            let length = read_uleb128(lsda, &mut pos)?;
            let landing_pad = read_uleb128(lsda, &mut pos)?;
            let action = read_uleb128(lsda, &mut pos)?;
            (start, length, landing_pad, action)
        };
        call_sites.push(CallSite {
            start,
            length,
            landing_pad_offset: if landing_pad == 0 { None } else { Some(landing_pad) },
            // GCC stores action+1 so that 0 can mean "no action"; call sites
            // without a type filter (cleanup-only) still carry a landing pad.
            action_entry: action as i64 - 1,
        });
    }

    Ok((
        LsdaHeader { lp_start_encoding, ttype_encoding, call_site_table_start, call_site_table_end },
        call_sites,
    ))
}

/// Regenerates a `.gcc_except_table` entry for one function from its
/// (possibly reordered, possibly pruned) call-site table (spec.md §4.5
/// step 9): always emits in `uleb128` call-site encoding with an omitted
/// type table, since this crate never mutates C++ type filters.
pub fn encode(call_sites: &[CallSite]) -> Vec<u8> {
    let mut table = Vec::new();
    for cs in call_sites {
        write_uleb128(&mut table, cs.start);
        write_uleb128(&mut table, cs.length);
        write_uleb128(&mut table, cs.landing_pad_offset.unwrap_or(0));
        write_uleb128(&mut table, (cs.action_entry + 1) as u64);
    }

    let mut out = Vec::new();
    out.push(DW_EH_PE_OMIT); // lp_start_encoding: landing pads are function-relative.
    out.push(DW_EH_PE_OMIT); // ttype_encoding: no type table regenerated.
    out.push(DW_EH_PE_ULEB128); // call-site table encoding.
    write_uleb128(&mut out, table.len() as u64);
    out.extend_from_slice(&table);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_call_site_table() {
        let sites = vec![
            CallSite { start: 0, length: 8, landing_pad_offset: Some(0x20), action_entry: 0 },
            CallSite { start: 8, length: 4, landing_pad_offset: None, action_entry: -1 },
        ];
        let bytes = encode(&sites);
        let (_, parsed) = parse(&bytes).unwrap();
        assert_eq!(parsed, sites);
    }

    #[test]
    fn rejects_truncated_header() {
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn rejects_truncated_udata4_call_site_entry() {
        // lp_start omitted, ttype omitted, udata4 call-site encoding, a
        // table length claiming 12 bytes but only 4 actually present.
        let bytes = vec![DW_EH_PE_OMIT, DW_EH_PE_OMIT, DW_EH_PE_UDATA4, 12, 0, 0, 0, 0];
        assert!(parse(&bytes).is_err());
    }
}
