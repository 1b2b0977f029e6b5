//! Model Builder CLI
//!
//! Accumulates all labeled-event partitions into the 4-D histogram model and
//! persists it as JSON.

use anyhow::Result;
use clap::Parser;
use nbbolab::pipeline::run_model_stage;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Build the histogram model from labeled events.
#[derive(Parser, Debug)]
#[command(name = "build_model")]
struct Cli {
    /// Directory holding the event partitions.
    #[arg(short, long)]
    in_dir: PathBuf,

    #[arg(long, default_value = "events")]
    in_prefix: String,

    /// Output model file (JSON).
    #[arg(short, long)]
    model: PathBuf,

    /// Symbol the model was trained on.
    #[arg(short, long)]
    symbol: String,

    /// Laplace smoothing strength.
    #[arg(long, default_value = "1.0")]
    alpha: f64,
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

    let model = run_model_stage(&cli.in_dir, &cli.in_prefix, &cli.model, &cli.symbol, cli.alpha)?;
    let populated = model.cells.iter().filter(|c| c.n > 0).count();
    eprintln!(
        "model written: {} ({}..{}), {}/{} cells populated",
        cli.model.display(),
        model.year_lo,
        model.year_hi,
        populated,
        model.cells.len()
    );
    Ok(())
}
