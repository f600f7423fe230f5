//! CLI surface (spec.md §6, SPEC_FULL.md §12): a flag struct constructed
//! via `clap::Parser`, mirroring the reference tool's flags one-to-one.
//! Ambient CLI plumbing, not a core subsystem -- built fresh in the idiom
//! the broader example pack uses for this shape of flag struct, since the
//! teacher crate has no CLI of its own.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReorderStrategyArg {
    None,
    Reverse,
    Normal,
    BranchPredictor,
    Cache,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JumpTableMode {
    None,
    Basic,
    Move,
    Split,
    Aggressive,
}

/// `bolt-relayout`: a post-link ELF layout optimizer.
#[derive(Debug, Parser)]
#[command(name = "relayout", about = "post-link ELF layout optimizer")]
pub struct Config {
    /// Output file path.
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,

    /// Input ELF executable.
    pub input: PathBuf,

    /// Branch-frequency profile (fdata or YAML).
    #[arg(long = "data")]
    pub profile: Option<PathBuf>,

    /// Only process these functions (by name); empty means "all".
    #[arg(long = "funcs")]
    pub funcs: Vec<String>,

    /// File listing functions to process, one name per line.
    #[arg(long = "funcs-file")]
    pub funcs_file: Option<PathBuf>,

    /// Never process these functions.
    #[arg(long = "skip-funcs")]
    pub skip_funcs: Vec<String>,

    /// Stop after optimizing this many functions.
    #[arg(long = "max-funcs")]
    pub max_funcs: Option<usize>,

    #[arg(long = "eliminate-unreachable", default_value_t = false)]
    pub eliminate_unreachable: bool,

    #[arg(long = "split-functions", default_value_t = false)]
    pub split_functions: bool,

    #[arg(long = "reorder-blocks", value_enum, default_value_t = ReorderStrategyArg::None)]
    pub reorder_blocks: ReorderStrategyArg,

    #[arg(long = "jump-tables", value_enum, default_value_t = JumpTableMode::None)]
    pub jump_tables: JumpTableMode,

    #[arg(long = "align-blocks", default_value_t = false)]
    pub align_blocks: bool,

    #[arg(long = "trap-avx512", default_value_t = false)]
    pub trap_avx512: bool,

    #[arg(long = "dyno-stats", default_value_t = false)]
    pub dyno_stats: bool,

    #[arg(long = "print-cfg", default_value_t = false)]
    pub print_cfg: bool,

    #[arg(long = "print-disasm", default_value_t = false)]
    pub print_disasm: bool,

    #[arg(long = "print-reordered", default_value_t = false)]
    pub print_reordered: bool,

    #[arg(long = "print-eh-ranges", default_value_t = false)]
    pub print_eh_ranges: bool,
}

impl Config {
    /// Resolves the allow-list from `--funcs` plus `--funcs-file`, one name
    /// per line, blanks and `#`-comments ignored.
    pub fn resolve_funcs(&self) -> crate::error::Result<Vec<String>> {
        let mut names = self.funcs.clone();
        if let Some(path) = &self.funcs_file {
            let text = std::fs::read_to_string(path)?;
            for line in text.lines() {
                let line = line.trim();
                if !line.is_empty() && !line.starts_with('#') {
                    names.push(line.to_string());
                }
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_flag_set() {
        let cfg = Config::parse_from(["relayout", "-o", "out.elf", "in.elf"]);
        assert_eq!(cfg.output, PathBuf::from("out.elf"));
        assert_eq!(cfg.input, PathBuf::from("in.elf"));
        assert_eq!(cfg.reorder_blocks, ReorderStrategyArg::None);
    }

    #[test]
    fn parses_reorder_strategy_enum() {
        let cfg = Config::parse_from(["relayout", "-o", "out.elf", "in.elf", "--reorder-blocks", "cache"]);
        assert_eq!(cfg.reorder_blocks, ReorderStrategyArg::Cache);
    }
}
