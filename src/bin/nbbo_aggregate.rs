//! NBBO Aggregation CLI
//!
//! Parses raw gzip quote files and writes per-year per-ms tick partitions
//! in event- or clock-grid form, plus a glitch report.
//!
//! Usage:
//!   cargo run --release --bin nbbo_aggregate -- \
//!     --out-dir ./data/ticks quotes_2020.csv.gz quotes_2021.csv.gz

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use nbbolab::pipeline::{
    run_aggregate_stage, AggregateConfig, AggregateStageConfig, GridMode, QuoteFilter,
    SessionWindow, VenueSet,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GridArg {
    Event,
    Clock,
}

/// Aggregate raw Level-1 quotes into per-ms NBBO tick partitions.
#[derive(Parser, Debug)]
#[command(name = "nbbo_aggregate")]
struct Cli {
    /// Raw gzip quote files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory for tick partitions.
    #[arg(short, long)]
    out_dir: PathBuf,

    /// Partition filename prefix.
    #[arg(long, default_value = "ticks_raw")]
    prefix: String,

    /// Output grid policy.
    #[arg(long, value_enum, default_value = "event")]
    grid: GridArg,

    /// Largest gap bridged by forward fill in clock mode, ms.
    #[arg(long, default_value = "250")]
    max_ffill_gap_ms: i64,

    /// Regular trading session, half-open, as HH:MM-HH:MM.
    #[arg(long, default_value = "09:30-16:00")]
    session: String,

    /// Venue allow-set, one tag per character.
    #[arg(long, default_value = "PTQZYJK")]
    venues: String,

    /// Required quote-condition character.
    #[arg(long, default_value = "R")]
    condition: String,

    /// Worker threads (0 = auto).
    #[arg(long, default_value = "0")]
    threads: usize,

    /// Write the glitch report here instead of stdout.
    #[arg(long)]
    glitch_report: Option<PathBuf>,
}

fn parse_session(s: &str) -> Result<SessionWindow> {
    let parse_hm = |part: &str| -> Result<(u16, u16)> {
        let (hh, mm) = part
            .split_once(':')
            .with_context(|| format!("bad session time {:?}", part))?;
        Ok((hh.parse()?, mm.parse()?))
    };
    let (start, end) = s
        .split_once('-')
        .with_context(|| format!("bad session window {:?}", s))?;
    let (sh, sm) = parse_hm(start)?;
    let (eh, em) = parse_hm(end)?;
    Ok(SessionWindow::new(sh, sm, eh, em))
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

    if cli.condition.len() != 1 {
        bail!("--condition must be a single character");
    }
    let filter = QuoteFilter {
        session: parse_session(&cli.session)?,
        venues: VenueSet::from_bytes(cli.venues.as_bytes()),
        condition: cli.condition.as_bytes()[0],
    };
    let cfg = AggregateStageConfig {
        filter,
        agg: AggregateConfig {
            grid: match cli.grid {
                GridArg::Event => GridMode::Event,
                GridArg::Clock => GridMode::Clock,
            },
            max_ffill_gap_ms: cli.max_ffill_gap_ms,
        },
        threads: cli.threads,
        ..AggregateStageConfig::default()
    };

    let summary = run_aggregate_stage(&cli.inputs, &cli.out_dir, &cli.prefix, &cfg)?;

    let report = summary.glitches.render_report();
    match cli.glitch_report {
        Some(path) => std::fs::write(&path, &report)
            .with_context(|| format!("failed to write glitch report {:?}", path))?,
        None => print!("{}", report),
    }

    eprintln!(
        "aggregated {} lines -> {} ticks ({} fills) across {} year(s)",
        summary.lines_read,
        summary.ticks_written,
        summary.fills_written,
        summary.years.len()
    );
    Ok(())
}
