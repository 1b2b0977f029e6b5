//! Backtest Runner CLI
//!
//! Streams labeled events against a trained model and writes the per-year
//! trades and daily PnL tables.
//!
//! Usage:
//!   cargo run --release --bin backtest_run -- \
//!     --events-dir ./data/events --model ./data/model.json \
//!     --config strategy.json --out-dir ./data/results

use anyhow::Result;
use clap::Parser;
use nbbolab::pipeline::{run_backtest_stage, HistogramModel, StrategyConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Backtest the state-conditioned single-step strategy.
#[derive(Parser, Debug)]
#[command(name = "backtest_run")]
struct Cli {
    /// Directory holding the event partitions.
    #[arg(short, long)]
    events_dir: PathBuf,

    #[arg(long, default_value = "events")]
    in_prefix: String,

    /// Trained model file (JSON).
    #[arg(short, long)]
    model: PathBuf,

    /// Strategy config file (JSON); defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory for trades/daily tables.
    #[arg(short, long)]
    out_dir: PathBuf,
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

    let model = HistogramModel::load(&cli.model)?;
    let cfg = match cli.config {
        Some(ref path) => StrategyConfig::load(path)?,
        None => StrategyConfig::default(),
    };
    std::fs::create_dir_all(&cli.out_dir)?;

    let summary = run_backtest_stage(&cli.events_dir, &cli.in_prefix, &cli.out_dir, &model, cfg)?;

    eprintln!(
        "backtest: {} trades, net {:.6}; skips: invalid={} magnitude={} edge={} wait={} boundary={}",
        summary.trades_total,
        summary.net_total,
        summary.skips.invalid,
        summary.skips.magnitude_gate,
        summary.skips.edge_gate,
        summary.skips.wait_gate,
        summary.skips.day_boundary
    );
    Ok(())
}
