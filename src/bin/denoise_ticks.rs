//! Spike Denoiser CLI
//!
//! Streams every per-year tick partition through the spike filter and prints
//! the kept/removed report.

use anyhow::{Context, Result};
use clap::Parser;
use nbbolab::pipeline::{run_denoise_stage, DenoiseConfig, DEFAULT_BATCH_ROWS};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Remove implausible mid spikes from per-year tick partitions.
#[derive(Parser, Debug)]
#[command(name = "denoise_ticks")]
struct Cli {
    /// Directory holding the tick partitions.
    #[arg(short, long)]
    in_dir: PathBuf,

    #[arg(long, default_value = "ticks")]
    in_prefix: String,

    /// Output directory for cleaned partitions.
    #[arg(short, long)]
    out_dir: PathBuf,

    #[arg(long, default_value = "ticks_clean")]
    out_prefix: String,

    /// Level cap; mids strictly above are dropped.
    #[arg(long, default_value = "1000")]
    mid_max: f64,

    /// Delta cap; moves at or above are dropped.
    #[arg(long, default_value = "100")]
    delta_threshold: f64,

    #[arg(long, default_value_t = DEFAULT_BATCH_ROWS)]
    batch_rows: usize,

    /// Write the report here instead of stdout.
    #[arg(long)]
    report: Option<PathBuf>,
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

    let cfg = DenoiseConfig {
        mid_max: cli.mid_max,
        delta_threshold: cli.delta_threshold,
        ..DenoiseConfig::default()
    };
    let summary = run_denoise_stage(
        &cli.in_dir,
        &cli.in_prefix,
        &cli.out_dir,
        &cli.out_prefix,
        &cfg,
        cli.batch_rows,
    )?;

    let report = summary.report.render();
    match cli.report {
        Some(path) => std::fs::write(&path, &report)
            .with_context(|| format!("failed to write denoise report {:?}", path))?,
        None => print!("{}", report),
    }
    Ok(())
}
