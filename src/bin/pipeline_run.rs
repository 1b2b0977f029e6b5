//! Pipeline Driver CLI
//!
//! Runs every stage in order under one working directory:
//! aggregate -> tail cutoffs + winsorize -> denoise -> events -> model ->
//! backtest. Each stage starts only after the previous one completed; the
//! run finishes with the glitch, denoise, and timing reports.
//!
//! Usage:
//!   cargo run --release --bin pipeline_run -- \
//!     --work-dir ./data --symbol SPY quotes_2020.csv.gz quotes_2021.csv.gz

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use nbbolab::pipeline::{
    run_aggregate_stage, run_backtest_stage, run_denoise_stage, run_event_stage, run_model_stage,
    run_winsor_stage, AggregateStageConfig, DenoiseConfig, EventBuilderConfig, RunContext,
    StrategyConfig, TailSketchConfig, WinsorMode, DEFAULT_BATCH_ROWS,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Clip,
    Drop,
}

/// Run the full NBBO research pipeline.
#[derive(Parser, Debug)]
#[command(name = "pipeline_run")]
struct Cli {
    /// Raw gzip quote files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Working directory; stage outputs land in subdirectories.
    #[arg(short, long)]
    work_dir: PathBuf,

    /// Symbol recorded in the model file.
    #[arg(short, long)]
    symbol: String,

    /// Strategy config file (JSON); defaults apply when omitted.
    #[arg(long)]
    strategy_config: Option<PathBuf>,

    /// Winsor policy.
    #[arg(long, value_enum, default_value = "clip")]
    winsor_mode: ModeArg,

    /// Laplace smoothing strength for the model.
    #[arg(long, default_value = "1.0")]
    alpha: f64,

    /// Worker threads (0 = auto).
    #[arg(long, default_value = "0")]
    threads: usize,
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
    let ctx = RunContext::new();

    let ticks_dir = cli.work_dir.join("ticks");
    let events_dir = cli.work_dir.join("events");
    let results_dir = cli.work_dir.join("results");
    std::fs::create_dir_all(&results_dir)
        .with_context(|| format!("failed to create {:?}", results_dir))?;

    let strategy = match cli.strategy_config {
        Some(ref path) => StrategyConfig::load(path)?,
        None => StrategyConfig::default(),
    };

    // Stage A: raw quotes -> event-grid tick partitions.
    let agg_cfg = AggregateStageConfig {
        threads: cli.threads,
        ..AggregateStageConfig::default()
    };
    let agg = ctx.time("aggregate", || {
        run_aggregate_stage(&cli.inputs, &ticks_dir, "ticks_raw", &agg_cfg)
    })?;
    std::fs::write(
        results_dir.join("glitch_report.txt"),
        agg.glitches.render_report(),
    )?;

    // Stage B + winsor: cutoffs, then the final tick store.
    let winsor = ctx.time("winsorize", || {
        run_winsor_stage(
            &ticks_dir,
            "ticks_raw",
            &ticks_dir,
            "ticks",
            &TailSketchConfig::default(),
            match cli.winsor_mode {
                ModeArg::Clip => WinsorMode::Clip,
                ModeArg::Drop => WinsorMode::Drop,
            },
            cli.threads,
            DEFAULT_BATCH_ROWS,
        )
    })?;
    info!(cutoffs = %winsor.cutoffs.summary(), "winsor stage finished");

    // Stage C: denoise.
    let denoise = ctx.time("denoise", || {
        run_denoise_stage(
            &ticks_dir,
            "ticks",
            &ticks_dir,
            "ticks_clean",
            &DenoiseConfig::default(),
            DEFAULT_BATCH_ROWS,
        )
    })?;
    std::fs::write(
        results_dir.join("denoise_report.txt"),
        denoise.report.render(),
    )?;

    // Stage D: labeled events.
    let events = ctx.time("events", || {
        run_event_stage(
            &ticks_dir,
            "ticks_clean",
            &events_dir,
            "events",
            &EventBuilderConfig::default(),
            DEFAULT_BATCH_ROWS,
        )
    })?;
    info!(
        emitted = events.counters.events_emitted,
        "event stage finished"
    );

    // Stage E: model.
    let model_path = cli.work_dir.join("model.json");
    let model = ctx.time("model", || {
        run_model_stage(&events_dir, "events", &model_path, &cli.symbol, cli.alpha)
    })?;

    // Stage F: backtest.
    let backtest = ctx.time("backtest", || {
        run_backtest_stage(&events_dir, "events", &results_dir, &model, strategy)
    })?;

    print!("{}", ctx.render_report());
    eprintln!(
        "pipeline complete: {} ticks -> {} events -> {} trades (net {:.6})",
        agg.ticks_written,
        events.counters.events_emitted,
        backtest.trades_total,
        backtest.net_total
    );
    Ok(())
}
