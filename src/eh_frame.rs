//! `.eh_frame` CIE/FDE parsing (spec.md §3 "frame-instruction vector...as
//! parsed from `.eh_frame`"), grounded in the reference implementation's
//! `CFIReaderWriter` (`examples/original_source/bolt/src/Exceptions.h`): a
//! CIE's initial instructions establish the default unwind rules, each FDE
//! then layers its own sequential program on top, scoped to one `[pc_begin,
//! pc_begin + pc_range)` address range.
//!
//! Pointer fields (`pc_begin`, `pc_range`, and any augmentation pointers) are
//! read as absolute 8-byte little-endian values rather than decoded per the
//! DWARF exception-header encoding byte that a real producer's augmentation
//! string would specify (commonly `DW_EH_PE_pcrel | DW_EH_PE_sdata4`):
//! covering every encoding a producer might choose is out of scope here, so
//! only the `.eh_frame` layout this crate itself regenerates is round-tripped
//! faithfully (spec.md §9 Open Questions).

use std::collections::BTreeMap;

use crate::cfi::Snapshot;
use crate::error::{Error, Result};
use crate::instruction::CFIKind;

/// One parsed FDE: its covered address range, the CIE-derived default rule
/// set, and its own program decoded into `(index, CFIKind)` entries plus an
/// offset map from PC-relative offset to the state index in effect there.
#[derive(Debug, Clone)]
pub struct Fde {
    pub pc_begin: u64,
    pub pc_range: u64,
    pub cie_defaults: Snapshot,
    pub instructions: Vec<CFIKind>,
    /// PC offset (relative to `pc_begin`) -> index into `instructions`: the
    /// state index in effect once every op up to and including that offset
    /// has been applied.
    pub offset_map: BTreeMap<u64, usize>,
}

impl Fde {
    pub fn covers(&self, addr: u64) -> bool {
        addr >= self.pc_begin && addr < self.pc_begin + self.pc_range
    }
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    let chunk = bytes.get(*pos..*pos + 4).ok_or_else(|| Error::Malformed("truncated .eh_frame record length".into()))?;
    *pos += 4;
    Ok(u32::from_le_bytes(chunk.try_into().unwrap()))
}

fn read_u64_field(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let chunk = bytes.get(*pos..*pos + 8).ok_or_else(|| Error::Malformed("truncated .eh_frame address field".into()))?;
    *pos += 8;
    Ok(u64::from_le_bytes(chunk.try_into().unwrap()))
}

fn read_cstr<'a>(bytes: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    let start = *pos;
    loop {
        let byte = *bytes.get(*pos).ok_or_else(|| Error::Malformed("unterminated .eh_frame augmentation string".into()))?;
        *pos += 1;
        if byte == 0 {
            return Ok(&bytes[start..*pos - 1]);
        }
    }
}

fn read_uleb128(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *bytes.get(*pos).ok_or_else(|| Error::Malformed("truncated uleb128 in .eh_frame".into()))?;
        *pos += 1;
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(result)
}

fn read_sleb128(bytes: &[u8], pos: &mut usize) -> Result<i64> {
    let mut result = 0i64;
    let mut shift = 0u32;
    let mut byte;
    loop {
        byte = *bytes.get(*pos).ok_or_else(|| Error::Malformed("truncated sleb128 in .eh_frame".into()))?;
        *pos += 1;
        result |= i64::from(byte & 0x7f) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    if shift < 64 && byte & 0x40 != 0 {
        result |= -1i64 << shift;
    }
    Ok(result)
}

/// DW_CFA_* opcode decoding into `CFIKind`, tracking `DW_CFA_advance_loc*`
/// as offset bookkeeping rather than an emitted instruction (spec.md §9
/// "Sum types" -- there is no `AdvanceLoc` variant, since nothing downstream
/// of the Function Lifter ever needs to see it directly).
fn decode_program(bytes: &[u8], code_alignment: u64, data_alignment: i64) -> Result<(Vec<CFIKind>, BTreeMap<u64, usize>)> {
    let mut pos = 0usize;
    let mut offset = 0u64;
    let mut instructions = Vec::new();
    let mut offset_map = BTreeMap::new();

    while pos < bytes.len() {
        let op = bytes[pos];
        pos += 1;
        let high = op & 0xc0;
        let low = op & 0x3f;

        if high == 0x40 {
            offset += u64::from(low) * code_alignment;
            continue;
        }
        if high == 0x80 {
            let delta = read_uleb128(bytes, &mut pos)? as i64 * data_alignment;
            instructions.push(CFIKind::Offset { register: u16::from(low), offset: delta });
            offset_map.insert(offset, instructions.len());
            continue;
        }
        if high == 0xc0 {
            instructions.push(CFIKind::Restore { register: u16::from(low) });
            offset_map.insert(offset, instructions.len());
            continue;
        }

        match low {
            0x00 => {} // DW_CFA_nop
            0x01 => offset = read_u64_field(bytes, &mut pos)?, // DW_CFA_set_loc
            0x02 => offset += u64::from(*bytes.get(pos).ok_or_else(|| Error::Malformed("truncated advance_loc1".into()))?) * code_alignment,
            0x03 => {
                let chunk = bytes.get(pos..pos + 2).ok_or_else(|| Error::Malformed("truncated advance_loc2".into()))?;
                offset += u64::from(u16::from_le_bytes(chunk.try_into().unwrap())) * code_alignment;
                pos += 2;
            }
            0x04 => {
                let chunk = bytes.get(pos..pos + 4).ok_or_else(|| Error::Malformed("truncated advance_loc4".into()))?;
                offset += u64::from(u32::from_le_bytes(chunk.try_into().unwrap())) * code_alignment;
                pos += 4;
            }
            0x05 => {
                let reg = read_uleb128(bytes, &mut pos)?;
                let delta = read_uleb128(bytes, &mut pos)? as i64 * data_alignment;
                instructions.push(CFIKind::Offset { register: reg as u16, offset: delta });
                offset_map.insert(offset, instructions.len());
            }
            0x06 => {
                let reg = read_uleb128(bytes, &mut pos)?;
                instructions.push(CFIKind::Restore { register: reg as u16 });
                offset_map.insert(offset, instructions.len());
            }
            0x07 => {
                let reg = read_uleb128(bytes, &mut pos)?;
                instructions.push(CFIKind::Undefined { register: reg as u16 });
                offset_map.insert(offset, instructions.len());
            }
            0x08 => {
                let reg = read_uleb128(bytes, &mut pos)?;
                instructions.push(CFIKind::SameValue { register: reg as u16 });
                offset_map.insert(offset, instructions.len());
            }
            0x0a => {
                instructions.push(CFIKind::RememberState);
                offset_map.insert(offset, instructions.len());
            }
            0x0b => {
                instructions.push(CFIKind::RestoreState);
                offset_map.insert(offset, instructions.len());
            }
            0x0c => {
                let reg = read_uleb128(bytes, &mut pos)?;
                let off = read_uleb128(bytes, &mut pos)? as i64;
                instructions.push(CFIKind::DefCfa { register: reg as u16, offset: off });
                offset_map.insert(offset, instructions.len());
            }
            0x0d => {
                let reg = read_uleb128(bytes, &mut pos)?;
                instructions.push(CFIKind::DefCfaRegister { register: reg as u16 });
                offset_map.insert(offset, instructions.len());
            }
            0x0e => {
                let off = read_uleb128(bytes, &mut pos)? as i64;
                instructions.push(CFIKind::DefCfaOffset { offset: off });
                offset_map.insert(offset, instructions.len());
            }
            0x0f => {
                // DW_CFA_def_cfa_expression: a DWARF expression, not a single
                // register/offset pair -- recorded as Escape (spec.md §9).
                let len = read_uleb128(bytes, &mut pos)? as usize;
                pos += len;
                instructions.push(CFIKind::Escape);
                offset_map.insert(offset, instructions.len());
            }
            0x10 => {
                // DW_CFA_expression
                read_uleb128(bytes, &mut pos)?;
                let len = read_uleb128(bytes, &mut pos)? as usize;
                pos += len;
                instructions.push(CFIKind::Escape);
                offset_map.insert(offset, instructions.len());
            }
            0x11 => {
                let reg = read_uleb128(bytes, &mut pos)?;
                let off = read_sleb128(bytes, &mut pos)? * data_alignment;
                instructions.push(CFIKind::Offset { register: reg as u16, offset: off });
                offset_map.insert(offset, instructions.len());
            }
            0x12 => {
                let reg = read_uleb128(bytes, &mut pos)?;
                let off = read_sleb128(bytes, &mut pos)?;
                instructions.push(CFIKind::DefCfa { register: reg as u16, offset: off });
                offset_map.insert(offset, instructions.len());
            }
            0x13 => {
                let off = read_sleb128(bytes, &mut pos)?;
                instructions.push(CFIKind::DefCfaOffset { offset: off });
                offset_map.insert(offset, instructions.len());
            }
            0x2e => {
                // DW_CFA_GNU_args_size
                let size = read_uleb128(bytes, &mut pos)? as i64;
                instructions.push(CFIKind::GnuArgsSize { size });
                offset_map.insert(offset, instructions.len());
            }
            _ => {
                // Unrecognized or rarely-producer-emitted opcode (DW_CFA_register,
                // DW_CFA_GNU_window_save, ...); preserved as an opaque marker
                // rather than silently dropped.
                instructions.push(CFIKind::Escape);
                offset_map.insert(offset, instructions.len());
            }
        }
    }

    Ok((instructions, offset_map))
}

struct Cie {
    code_alignment: u64,
    data_alignment: i64,
    defaults: Snapshot,
}

fn apply_all(instructions: &[CFIKind]) -> Snapshot {
    let mut snap = Snapshot::default();
    for cfi in instructions {
        snap.apply_for_defaults(cfi);
    }
    snap
}

/// Parses every CIE and FDE out of a `.eh_frame` section's raw bytes,
/// returning the FDEs in file order. CIEs are consumed internally to resolve
/// each FDE's initial rule set; callers only need the FDEs.
pub fn parse(bytes: &[u8]) -> Result<Vec<Fde>> {
    let mut cies: BTreeMap<usize, Cie> = BTreeMap::new();
    let mut fdes = Vec::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let record_start = pos;
        let length = read_u32(bytes, &mut pos)? as usize;
        if length == 0 {
            break; // terminator record.
        }
        let record_end = pos + length;
        if record_end > bytes.len() {
            return Err(Error::Malformed("`.eh_frame` record length exceeds section size".into()));
        }
        let id_field_pos = pos;
        let id = read_u32(bytes, &mut pos)?;

        if id == 0 {
            // CIE.
            let version = *bytes.get(pos).ok_or_else(|| Error::Malformed("truncated CIE version".into()))?;
            pos += 1;
            let _ = version;
            let augmentation = read_cstr(bytes, &mut pos)?.to_vec();
            let code_alignment = read_uleb128(bytes, &mut pos)?;
            let data_alignment = read_sleb128(bytes, &mut pos)?;
            read_uleb128(bytes, &mut pos)?; // return_address_register.
            if augmentation.first() == Some(&b'z') {
                let aug_len = read_uleb128(bytes, &mut pos)? as usize;
                pos += aug_len; // 'R'/'P'/'L' augmentation data, not needed here.
            }
            let (initial, _) = decode_program(&bytes[pos..record_end], code_alignment, data_alignment)?;
            let defaults = apply_all(&initial);
            cies.insert(record_start, Cie { code_alignment, data_alignment, defaults });
            pos = record_end;
            continue;
        }

        // FDE: `id` is the distance back from `id_field_pos` to its CIE.
        let cie_start = id_field_pos.checked_sub(id as usize).ok_or_else(|| Error::Malformed("FDE CIE pointer underflows record start".into()))?;
        let cie = cies.get(&cie_start).ok_or_else(|| Error::Malformed("FDE references unknown CIE".into()))?;
        let pc_begin = read_u64_field(bytes, &mut pos)?;
        let pc_range = read_u64_field(bytes, &mut pos)?;
        let (instructions, offset_map) = decode_program(&bytes[pos..record_end], cie.code_alignment, cie.data_alignment)?;
        fdes.push(Fde { pc_begin, pc_range, cie_defaults: cie.defaults.clone(), instructions, offset_map });
        pos = record_end;
    }

    Ok(fdes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_record(out: &mut Vec<u8>, body: impl FnOnce(&mut Vec<u8>)) {
        let mut rec = Vec::new();
        body(&mut rec);
        out.extend_from_slice(&(rec.len() as u32).to_le_bytes());
        out.extend_from_slice(&rec);
    }

    fn sample_eh_frame() -> Vec<u8> {
        let mut bytes = Vec::new();
        let cie_start = bytes.len();
        push_record(&mut bytes, |rec| {
            rec.extend_from_slice(&0u32.to_le_bytes()); // CIE id.
            rec.push(1); // version.
            rec.push(0); // empty augmentation string.
            rec.push(1); // code_alignment_factor = 1.
            rec.push(0x7c); // data_alignment_factor = -4 (sleb128).
            rec.push(16); // return_address_register.
            rec.push(0x0c); // DW_CFA_def_cfa
            rec.push(7); // register = rsp (7)
            rec.push(8); // offset = 8
        });

        push_record(&mut bytes, |rec| {
            // Distance from this field back to the CIE's record start.
            let cie_pointer = (rec.len() + bytes.len() + 4 - cie_start) as u32;
            rec.extend_from_slice(&cie_pointer.to_le_bytes());
            rec.extend_from_slice(&0x1000u64.to_le_bytes()); // pc_begin
            rec.extend_from_slice(&0x20u64.to_le_bytes()); // pc_range
            rec.push(0x0e); // DW_CFA_def_cfa_offset
            rec.push(16);
            rec.push(0x0a); // DW_CFA_remember_state
            rec.push(0x0e); // DW_CFA_def_cfa_offset
            rec.push(24);
            rec.push(0x0b); // DW_CFA_restore_state
        });
        bytes
    }

    #[test]
    fn parses_cie_defaults_and_fde_program() {
        let bytes = sample_eh_frame();
        let fdes = parse(&bytes).unwrap();
        assert_eq!(fdes.len(), 1);
        let fde = &fdes[0];
        assert_eq!(fde.pc_begin, 0x1000);
        assert_eq!(fde.pc_range, 0x20);
        assert_eq!(fde.cie_defaults.cfa_register, 7);
        assert_eq!(fde.cie_defaults.cfa_offset, 8);
        assert_eq!(fde.instructions.len(), 4);
        assert!(fde.covers(0x1010));
        assert!(!fde.covers(0x1020));
    }

    #[test]
    fn rejects_truncated_record_length() {
        assert!(parse(&[5, 0, 0, 0]).is_err());
    }
}
