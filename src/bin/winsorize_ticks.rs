//! Winsorization CLI
//!
//! Computes the extreme-tail log-return cutoffs over the raw tick partitions
//! and streams every partition through the clip/drop policy into the final
//! tick store.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use nbbolab::pipeline::{run_winsor_stage, TailSketchConfig, WinsorMode, DEFAULT_BATCH_ROWS};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Clip,
    Drop,
}

/// Winsorize tick log returns at extreme quantiles.
#[derive(Parser, Debug)]
#[command(name = "winsorize_ticks")]
struct Cli {
    /// Directory holding the raw tick partitions.
    #[arg(short, long)]
    in_dir: PathBuf,

    #[arg(long, default_value = "ticks_raw")]
    in_prefix: String,

    /// Output directory for the winsorized tick store.
    #[arg(short, long)]
    out_dir: PathBuf,

    #[arg(long, default_value = "ticks")]
    out_prefix: String,

    /// Lower quantile.
    #[arg(long, default_value = "1e-5")]
    q_lo: f64,

    /// Upper quantile.
    #[arg(long, default_value = "0.99999")]
    q_hi: f64,

    /// Per-side heap bound.
    #[arg(long, default_value = "200000")]
    heap_len: usize,

    #[arg(long, value_enum, default_value = "clip")]
    mode: ModeArg,

    /// Worker threads (0 = auto).
    #[arg(long, default_value = "0")]
    threads: usize,

    #[arg(long, default_value_t = DEFAULT_BATCH_ROWS)]
    batch_rows: usize,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nbbolab=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let sketch_cfg = TailSketchConfig {
        q_lo: cli.q_lo,
        q_hi: cli.q_hi,
        heap_len: cli.heap_len,
    };
    let mode = match cli.mode {
        ModeArg::Clip => WinsorMode::Clip,
        ModeArg::Drop => WinsorMode::Drop,
    };

    let summary = run_winsor_stage(
        &cli.in_dir,
        &cli.in_prefix,
        &cli.out_dir,
        &cli.out_prefix,
        &sketch_cfg,
        mode,
        cli.threads,
        cli.batch_rows,
    )?;

    eprintln!("cutoffs: {}", summary.cutoffs.summary());
    for (year, s) in &summary.per_year {
        eprintln!(
            "  {}: in={} out={} clipped_lo={} clipped_hi={} dropped={}",
            year, s.rows_in, s.rows_out, s.clipped_lo, s.clipped_hi, s.dropped
        );
    }
    Ok(())
}
