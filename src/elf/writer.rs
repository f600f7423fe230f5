//! In-place ELF patcher used by the Rewriter Orchestrator's final step
//! (spec.md §4.5 step 9): overwrite each simple function's original byte
//! range with its re-emitted image, pad the remainder with no-ops, and
//! relocate `PT_GNU_EH_FRAME` to the regenerated `.eh_frame_hdr`.
//!
//! This is deliberately narrower than a general-purpose `patchelf`: we never
//! grow `PT_LOAD` segments or touch `.dynamic` (the input is a static
//! executable), we only ever overwrite existing byte ranges or append into
//! the pre-reserved extra-storage region.

use crate::error::{self, Error};
use crate::elf::program_header::{ProgramHeader, PT_GNU_EH_FRAME};
use scroll::Pwrite;

/// Rewrites function bodies and patched metadata sections directly into a
/// copy of the original file bytes.
#[derive(Debug)]
pub struct ElfPatcher {
    output: Vec<u8>,
    ctx: scroll::Endian,
}

impl ElfPatcher {
    pub fn new(original: &[u8]) -> ElfPatcher {
        ElfPatcher { output: original.to_vec(), ctx: scroll::LE }
    }

    /// Overwrite `[file_offset, file_offset + image.len())` with `image`,
    /// then pad the remainder up to `max_size` with single-byte no-ops
    /// (`0x90` on x86-64, `0xd5 0x03 0x20 0x1f` NOP on AArch64 handled by the
    /// caller passing a pre-built padding instruction).
    pub fn overwrite_function(
        &mut self,
        file_offset: u64,
        max_size: u64,
        image: &[u8],
        nop_byte: u8,
    ) -> error::Result<()> {
        if image.len() as u64 > max_size {
            return Err(Error::Malformed(format!(
                "emitted image of {} bytes exceeds max in-place size {}",
                image.len(),
                max_size
            )));
        }
        let start = file_offset as usize;
        let end = start + image.len();
        if end > self.output.len() {
            return Err(Error::Malformed("function image would write past end of file".into()));
        }
        self.output[start..end].copy_from_slice(image);
        let pad_end = (file_offset + max_size) as usize;
        for byte in &mut self.output[end..pad_end.min(self.output.len())] {
            *byte = nop_byte;
        }
        Ok(())
    }

    /// Append bytes into the pre-reserved extra-storage region at a
    /// bump-allocated file offset (cold fragments, grown `.eh_frame`, grown
    /// `.gcc_except_table`). The caller (the Output Mapper / orchestrator)
    /// is responsible for bounds-checking against the region's size.
    pub fn write_extra_storage(&mut self, file_offset: u64, bytes: &[u8]) -> error::Result<()> {
        let start = file_offset as usize;
        let end = start + bytes.len();
        if end > self.output.len() {
            return Err(Error::Malformed("extra-storage write would write past end of file".into()));
        }
        self.output[start..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Patch `PT_GNU_EH_FRAME`'s offset/vaddr/paddr/filesz/memsz to point at
    /// the regenerated `.eh_frame_hdr`.
    pub fn patch_eh_frame_hdr_segment(
        &mut self,
        phdr_file_offset: u64,
        new_segment: ProgramHeader,
    ) -> error::Result<()> {
        if new_segment.p_type != PT_GNU_EH_FRAME {
            return Err(Error::Malformed("expected a PT_GNU_EH_FRAME program header".into()));
        }
        self.output.pwrite_with(new_segment, phdr_file_offset as usize, self.ctx)?;
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_pads_with_nops() {
        let original = vec![0u8; 16];
        let mut patcher = ElfPatcher::new(&original);
        patcher.overwrite_function(0, 8, &[0xc3], 0x90).unwrap();
        let out = patcher.into_bytes();
        assert_eq!(out[0], 0xc3);
        assert_eq!(&out[1..8], &[0x90; 7]);
    }

    #[test]
    fn overwrite_rejects_oversized_image() {
        let original = vec![0u8; 16];
        let mut patcher = ElfPatcher::new(&original);
        let err = patcher.overwrite_function(0, 2, &[0xc3, 0xc3, 0xc3], 0x90);
        assert!(err.is_err());
    }
}
