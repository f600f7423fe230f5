use core::result;

use quick_error::quick_error;

quick_error! {
    #[derive(Debug)]
    pub enum Error {
        Io(err: std::io::Error) {
            from()
            display("I/O error: {}", err)
        }
        Scroll(err: scroll::Error) {
            from()
            display("malformed on-disk structure: {}", err)
        }
        BadMagic(magic: u64) {
            display("invalid ELF magic number: 0x{:x}", magic)
        }
        Malformed(msg: String) {
            display("malformed binary: {}", msg)
        }
        /// Disassembly could not continue past `offset` (relative to the
        /// function's start) on non-padding bytes.
        DisassemblyFailed(function: String, offset: u64) {
            display("disassembly failed in {} at offset 0x{:x}", function, offset)
        }
        /// A branch target inside a function's instruction stream did not
        /// resolve to any block we created while building the CFG.
        CfgInconsistent(function: String, detail: String) {
            display("inconsistent CFG in {}: {}", function, detail)
        }
        /// Reordering would require replaying CFI across a RememberState /
        /// RestoreState pair that was split across the boundary.
        CfiReplayHazard(function: String) {
            display("CFI replay hazard in {}: RememberState/RestoreState pair split by reordering", function)
        }
        /// The extra-storage bump allocator ran out of room.
        ExtraStorageExhausted(requested: u64, available: u64) {
            display("extra storage exhausted: requested {} bytes, {} available", requested, available)
        }
        RelocationParse(detail: String) {
            display("failed to parse relocation: {}", detail)
        }
        /// The function's on-disk hash didn't match what the profile expected.
        ProfileMismatch(function: String) {
            display("profile hash mismatch for {}", function)
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
