//! Tick Store Inspection Tool
//!
//! Prints per-partition row counts, time coverage, null-return counts, and
//! (optionally) content fingerprints for a directory of tick partitions.
//!
//! Usage:
//!   cargo run --release --bin tick_inspect -- --dir ./data/ticks
//!   cargo run --release --bin tick_inspect -- --dir ./data/ticks --fingerprint

use anyhow::Result;
use clap::Parser;
use nbbolab::pipeline::{list_partitions, TickStore};
use std::path::PathBuf;

/// Inspect per-year tick partitions.
#[derive(Parser, Debug)]
#[command(name = "tick_inspect")]
struct Cli {
    /// Directory holding the partitions.
    #[arg(short, long)]
    dir: PathBuf,

    /// Partition filename prefix.
    #[arg(long, default_value = "ticks")]
    prefix: String,

    /// Also compute a SHA-256 content fingerprint per partition (slow).
    #[arg(long)]
    fingerprint: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let parts = list_partitions(&cli.dir, &cli.prefix)?;
    if parts.is_empty() {
        eprintln!("no '{}' partitions under {:?}", cli.prefix, cli.dir);
        return Ok(());
    }

    println!("=== Tick Partitions ({:?}) ===", cli.dir);
    for (year, path) in parts {
        let store = TickStore::open_readonly(&path)?;
        let rows = store.row_count()?;
        let nulls = store.null_return_count()?;
        match store.ts_range()? {
            Some((lo, hi)) => {
                println!("{}: {} rows, {} null returns, ts {}..{}", year, rows, nulls, lo, hi)
            }
            None => println!("{}: empty", year),
        }
        if cli.fingerprint {
            println!("    sha256 {}", store.fingerprint()?);
        }
    }
    Ok(())
}
