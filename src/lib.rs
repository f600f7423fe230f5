//! `bolt-relayout`: a post-link ELF layout optimizer.
//!
//! Lifts each function's machine code into a control-flow graph using a
//! branch-frequency profile, reorders/splits/folds blocks to improve icache
//! and branch-predictor behavior, then rewrites a new binary with patched
//! debug info, exception tables, symbol tables, and `.eh_frame_hdr`.
//!
//! The crate is organized the way the input binary is processed, in pipeline
//! order: parse (`elf`) -> lift (`function`) -> manipulate (`cfg`) -> map
//! addresses (`output_mapper`) -> patch (`elf::writer`), with `orchestrator`
//! driving the whole thing and `config` exposing the CLI surface.

pub mod basic_block;
pub mod binary_context;
pub mod callgraph;
pub mod cfg;
pub mod cfi;
pub mod config;
pub mod decode;
pub mod dyno_stats;
pub mod dwarf;
pub mod eh_frame;
pub mod elf;
pub mod error;
pub mod function;
pub mod instruction;
pub mod isa;
pub mod jump_table;
pub mod lsda;
pub mod orchestrator;
pub mod output_mapper;
pub mod profile;
pub mod reorder;

pub use error::{Error, Result};
