use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "seedgraph")]
#[command(version, about = "Fill SQLite tables and CSV sheets with linked synthetic rows")]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where generation starts from
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Mode {
    /// Start from empty units
    #[default]
    Fresh,
    /// Load the latest snapshot, then generate on top of it
    Incremental,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate rows and save them as a new snapshot
    Generate {
        /// Schema description (JSON)
        #[arg(short, long)]
        config: PathBuf,

        #[arg(short, long, value_enum, default_value_t = Mode::Fresh)]
        mode: Mode,

        /// Rows per unit as Name=N, overriding the schema's Counts
        #[arg(long = "count", value_parser = parse_count)]
        counts: Vec<(String, u64)>,

        /// RNG seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,

        /// Snapshot root directory
        #[arg(long)]
        snapshots: Option<PathBuf>,

        /// SQLite database file (in-memory when omitted)
        #[arg(long)]
        database: Option<PathBuf>,
    },

    /// Check a row-count request without generating anything
    Validate {
        #[arg(short, long)]
        config: PathBuf,

        #[arg(long = "count", value_parser = parse_count)]
        counts: Vec<(String, u64)>,
    },

    /// List units in execution order with their dependencies
    ListUnits {
        #[arg(short, long)]
        config: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

/// Parse one `Name=N` pair.
pub fn parse_count(raw: &str) -> Result<(String, u64), String> {
    let (name, count) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected Name=N, got '{}'", raw))?;
    let count = count
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("bad row count in '{}': {}", raw, e))?;
    Ok((name.trim().to_string(), count))
}

/// Schema defaults with command-line pairs laid over them.
pub fn merge_counts(
    defaults: &BTreeMap<String, u64>,
    overrides: &[(String, u64)],
) -> BTreeMap<String, u64> {
    let mut counts = defaults.clone();
    counts.extend(overrides.iter().cloned());
    counts
}
