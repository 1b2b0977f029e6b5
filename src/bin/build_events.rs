//! Event Builder CLI
//!
//! Turns cleaned per-year tick partitions into labeled-event partitions.

use anyhow::Result;
use clap::Parser;
use nbbolab::pipeline::{run_event_stage, EventBuilderConfig, DEFAULT_BATCH_ROWS};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Build labeled mid-change events from cleaned tick partitions.
#[derive(Parser, Debug)]
#[command(name = "build_events")]
struct Cli {
    /// Directory holding the cleaned tick partitions.
    #[arg(short, long)]
    in_dir: PathBuf,

    #[arg(long, default_value = "ticks_clean")]
    in_prefix: String,

    /// Output directory for event partitions.
    #[arg(short, long)]
    out_dir: PathBuf,

    #[arg(long, default_value = "events")]
    out_prefix: String,

    /// Largest |mid_next - mid| accepted when labeling, price units.
    #[arg(long, default_value = "1.0")]
    threshold_next: f64,

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

    let cfg = EventBuilderConfig {
        threshold_next: cli.threshold_next,
    };
    let summary = run_event_stage(
        &cli.in_dir,
        &cli.in_prefix,
        &cli.out_dir,
        &cli.out_prefix,
        &cfg,
        cli.batch_rows,
    )?;

    eprintln!(
        "events: {} emitted, {} dropped at boundaries, {} dropped big-move",
        summary.counters.events_emitted,
        summary.counters.events_dropped_boundary,
        summary.counters.events_dropped_bigmove
    );
    for (year, n) in &summary.per_year {
        eprintln!("  {}: {} events", year, n);
    }
    Ok(())
}
