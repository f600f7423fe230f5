//! Minimal instruction decoders feeding the Function Lifter.
//!
//! Spec.md §1 places "the low-level machine-code encoder" out of scope as
//! "a service that takes an instruction record and produces bytes"; the
//! *decoder* direction gets the same treatment here in spirit -- rather than
//! a full ISA table, this recognizes exactly the instruction shapes the
//! lifter's branch/indirect-branch/CFI classification needs to see
//! (spec.md §8's S1-S6 scenarios and the jump-table/EH paths they exercise).
//! Anything else decodes as a single-byte opaque instruction so the scan
//! always makes forward progress.

pub mod x86_64;
