//! Stage Driver
//!
//! Orchestration for the pipeline stages. Stages are externally sequential:
//! each one validates that its inputs exist before touching them and returns
//! a summary struct the caller can log. Within stage A, parallelism is at
//! the granularity of input files: OS-thread workers pull shard indexes off
//! a shared atomic counter and merge their glitch counters under one mutex
//! at end of shard. The per-year stages (winsorize, denoise, events) fan out
//! over partitions with rayon.
//!
//! Timing goes through a per-run [`RunContext`] rather than any process-wide
//! registry; its lifetime is bounded by the driver.

use crate::pipeline::aggregate::{AggregateConfig, ClockFill, GridMode, NbboAggregator, Tick};
use crate::pipeline::backtest::{write_daily_csv, write_trades_csv, Backtester, SkipCounters};
use crate::pipeline::denoise::{DenoiseConfig, DenoiseReport, SpikeDenoiser};
use crate::pipeline::features::{EventBuilder, EventBuilderConfig, EventCounters};
use crate::pipeline::glitch::GlitchCounts;
use crate::pipeline::histogram::{BinSpec, HistogramAccumulator, HistogramModel};
use crate::pipeline::quantile::{
    compute_cutoffs, winsorize_partition, TailCutoffs, TailSketchConfig, WinsorMode, WinsorSummary,
};
use crate::pipeline::quote::{parse_quote_line, QuoteFilter, Reject};
use crate::pipeline::store::{
    list_partitions, partition_path, EventStore, TickStore, YearTickWriters, DEFAULT_BATCH_ROWS,
};
use crate::pipeline::strategy::StrategyConfig;
use crate::pipeline::time::{hour_from_ts, year_from_ts};
use anyhow::{ensure, Context, Result};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Deterministic progress cadence, in input rows.
const PROGRESS_EVERY_ROWS: u64 = 5_000_000;

/// Rows buffered per year before a worker flushes to the shared writers.
const WRITER_FLUSH_ROWS: usize = 65_536;

// =============================================================================
// RUN CONTEXT
// =============================================================================

/// Per-run timing registry, passed explicitly to whoever needs it.
pub struct RunContext {
    started: Instant,
    timings: Mutex<Vec<(String, Duration)>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            timings: Mutex::new(Vec::new()),
        }
    }

    /// Time one stage.
    pub fn time<T>(&self, stage: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.timings
            .lock()
            .push((stage.to_string(), start.elapsed()));
        out
    }

    pub fn render_report(&self) -> String {
        let mut out = String::new();
        writeln!(
            out,
            "=== Timing Report ({}) ===",
            chrono::Utc::now().to_rfc3339()
        )
        .unwrap();
        for (stage, elapsed) in self.timings.lock().iter() {
            writeln!(out, "  {:<12} {:>10.3}s", stage, elapsed.as_secs_f64()).unwrap();
        }
        writeln!(
            out,
            "  {:<12} {:>10.3}s",
            "total",
            self.started.elapsed().as_secs_f64()
        )
        .unwrap();
        out
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// STAGE A: AGGREGATE
// =============================================================================

/// Stage A settings.
#[derive(Debug, Clone)]
pub struct AggregateStageConfig {
    pub filter: QuoteFilter,
    pub agg: AggregateConfig,
    /// Worker threads; 0 means one per shard up to the core count.
    pub threads: usize,
    pub batch_rows: usize,
}

impl Default for AggregateStageConfig {
    fn default() -> Self {
        Self {
            filter: QuoteFilter::default(),
            agg: AggregateConfig::default(),
            threads: 0,
            batch_rows: DEFAULT_BATCH_ROWS,
        }
    }
}

/// Stage A outcome.
#[derive(Debug, Default)]
pub struct AggregateStageSummary {
    pub lines_read: u64,
    pub quotes_accepted: u64,
    pub ticks_written: u64,
    pub fills_written: u64,
    pub glitches: GlitchCounts,
    /// Per-year row counts, sorted by year.
    pub years: Vec<(u16, u64)>,
}

#[derive(Default)]
struct ShardTotals {
    lines_read: u64,
    quotes_accepted: u64,
    ticks_written: u64,
    fills_written: u64,
}

/// Run stage A: raw gz quote files into per-year tick partitions.
///
/// Shards are processed in sorted order assignment; appends into a year
/// partition are serialized through the writer lock. Reads of the output
/// stores are `ts`-ordered, so the logical content is deterministic
/// regardless of worker interleaving.
pub fn run_aggregate_stage(
    inputs: &[PathBuf],
    out_dir: &Path,
    out_prefix: &str,
    cfg: &AggregateStageConfig,
) -> Result<AggregateStageSummary> {
    ensure!(!inputs.is_empty(), "aggregate stage: no input files");
    let mut shards: Vec<PathBuf> = inputs.to_vec();
    shards.sort();

    let threads = effective_threads(cfg.threads, shards.len());
    info!(
        shards = shards.len(),
        threads = threads,
        grid = ?cfg.agg.grid,
        "aggregate stage starting"
    );

    let writers = YearTickWriters::new(out_dir, out_prefix);
    let next_shard = AtomicUsize::new(0);
    let merged: Mutex<(GlitchCounts, ShardTotals)> = Mutex::new(Default::default());

    std::thread::scope(|scope| -> Result<()> {
        let mut handles = Vec::with_capacity(threads);
        for _ in 0..threads {
            handles.push(scope.spawn(|| -> Result<()> {
                loop {
                    let idx = next_shard.fetch_add(1, Ordering::Relaxed);
                    let Some(path) = shards.get(idx) else { break };
                    let (glitches, totals) = aggregate_shard(path, &writers, cfg)
                        .with_context(|| format!("aggregate stage, shard {:?}", path))?;
                    let mut shared = merged.lock();
                    shared.0.merge(&glitches);
                    shared.1.lines_read += totals.lines_read;
                    shared.1.quotes_accepted += totals.quotes_accepted;
                    shared.1.ticks_written += totals.ticks_written;
                    shared.1.fills_written += totals.fills_written;
                }
                Ok(())
            }));
        }
        for handle in handles {
            handle.join().expect("aggregate worker panicked")?;
        }
        Ok(())
    })?;

    let years = writers.close_all()?;
    let (glitches, totals) = merged.into_inner();
    let summary = AggregateStageSummary {
        lines_read: totals.lines_read,
        quotes_accepted: totals.quotes_accepted,
        ticks_written: totals.ticks_written,
        fills_written: totals.fills_written,
        glitches,
        years,
    };
    info!(
        lines = summary.lines_read,
        accepted = summary.quotes_accepted,
        ticks = summary.ticks_written,
        fills = summary.fills_written,
        "aggregate stage finished"
    );
    Ok(summary)
}

/// Process one raw input file end to end.
fn aggregate_shard(
    path: &Path,
    writers: &YearTickWriters,
    cfg: &AggregateStageConfig,
) -> Result<(GlitchCounts, ShardTotals)> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open raw quote file {:?}", path))?;
    let reader = std::io::BufReader::new(flate2::read::GzDecoder::new(file));

    let mut glitches = GlitchCounts::new();
    let mut totals = ShardTotals::default();
    let mut agg = NbboAggregator::new();
    let mut fill = match cfg.agg.grid {
        GridMode::Clock => Some(ClockFill::new(cfg.agg.max_ffill_gap_ms)),
        GridMode::Event => None,
    };
    let mut pending: Vec<Tick> = Vec::new();
    let mut buffers: HashMap<u16, Vec<Tick>> = HashMap::new();

    let mut lines = reader.lines();
    // Header row, discarded.
    if let Some(header) = lines.next() {
        header.with_context(|| format!("failed to read header of {:?}", path))?;
    }

    for line in lines {
        let line = line.with_context(|| format!("read error in {:?}", path))?;
        totals.lines_read += 1;
        if totals.lines_read % PROGRESS_EVERY_ROWS == 0 {
            debug!(path = ?path, rows = totals.lines_read, "aggregate progress");
        }

        let quote = match parse_quote_line(&line) {
            Ok(q) => q,
            Err(fail) => {
                glitches.record(crate::pipeline::glitch::GlitchCategory::ParseFail, fail.hour);
                continue;
            }
        };
        match cfg.filter.check(&quote) {
            Ok(()) => {}
            Err(Reject::Glitch(category)) => {
                glitches.record(category, hour_from_ts(quote.ts));
                continue;
            }
            Err(_) => continue,
        }
        totals.quotes_accepted += 1;

        if let Some(tick) = agg.push(&quote) {
            route_tick(tick, &mut fill, &mut pending, &mut buffers, &mut totals);
            flush_full_buffers(&mut buffers, writers)?;
        }
    }
    if let Some(tick) = agg.finish() {
        route_tick(tick, &mut fill, &mut pending, &mut buffers, &mut totals);
    }
    for (year, buffer) in buffers {
        writers.append(year, &buffer)?;
    }
    Ok((glitches, totals))
}

fn route_tick(
    tick: Tick,
    fill: &mut Option<ClockFill>,
    pending: &mut Vec<Tick>,
    buffers: &mut HashMap<u16, Vec<Tick>>,
    totals: &mut ShardTotals,
) {
    pending.clear();
    match fill {
        Some(fill) => {
            let before = fill.fills_emitted;
            fill.push(tick, pending);
            totals.fills_written += fill.fills_emitted - before;
        }
        None => pending.push(tick),
    }
    for t in pending.drain(..) {
        totals.ticks_written += 1;
        buffers.entry(year_from_ts(t.ts)).or_default().push(t);
    }
}

fn flush_full_buffers(
    buffers: &mut HashMap<u16, Vec<Tick>>,
    writers: &YearTickWriters,
) -> Result<()> {
    for (year, buffer) in buffers.iter_mut() {
        if buffer.len() >= WRITER_FLUSH_ROWS {
            writers.append(*year, buffer)?;
            buffer.clear();
        }
    }
    Ok(())
}

fn effective_threads(requested: usize, shards: usize) -> usize {
    let cap = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let threads = if requested == 0 { cap } else { requested };
    threads.clamp(1, shards.max(1))
}

/// Derive a clock-grid partition set from a cached event-grid set without
/// re-parsing raw quotes. Semantically identical to running stage A in
/// clock mode directly.
pub fn synthesize_clock_grid(
    in_dir: &Path,
    in_prefix: &str,
    out_dir: &Path,
    out_prefix: &str,
    max_ffill_gap_ms: i64,
    batch_rows: usize,
) -> Result<Vec<(u16, u64)>> {
    let parts = list_partitions(in_dir, in_prefix)?;
    ensure!(
        !parts.is_empty(),
        "clock synthesis: no event-grid partitions under {:?}",
        in_dir
    );
    let mut years = Vec::new();
    for (year, path) in parts {
        let input = TickStore::open_readonly(&path)?;
        let mut output = TickStore::create(&partition_path(out_dir, out_prefix, year))?;
        let mut fill = ClockFill::new(max_ffill_gap_ms);
        let mut pending = Vec::new();
        let mut batch = Vec::with_capacity(batch_rows);
        let mut rows = 0u64;
        input.for_each_tick(|t| {
            pending.clear();
            fill.push(t, &mut pending);
            for filled in pending.drain(..) {
                batch.push(filled);
                rows += 1;
                if batch.len() >= batch_rows {
                    output.append_batch(&batch)?;
                    batch.clear();
                }
            }
            Ok(())
        })?;
        output.append_batch(&batch)?;
        info!(year = year, rows = rows, "clock grid synthesized");
        years.push((year, rows));
    }
    Ok(years)
}

// =============================================================================
// STAGE B + WINSOR
// =============================================================================

/// Winsor stage outcome.
#[derive(Debug)]
pub struct WinsorStageSummary {
    pub cutoffs: TailCutoffs,
    pub per_year: Vec<(u16, WinsorSummary)>,
}

/// Compute tail cutoffs over the raw tick partitions, then stream every
/// partition through the winsor policy into the final tick store.
pub fn run_winsor_stage(
    in_dir: &Path,
    in_prefix: &str,
    out_dir: &Path,
    out_prefix: &str,
    sketch_cfg: &TailSketchConfig,
    mode: WinsorMode,
    threads: usize,
    batch_rows: usize,
) -> Result<WinsorStageSummary> {
    let parts = list_partitions(in_dir, in_prefix)?;
    ensure!(
        !parts.is_empty(),
        "winsor stage: no tick partitions under {:?} (did the aggregate stage complete?)",
        in_dir
    );

    let shard_paths: Vec<PathBuf> = parts.iter().map(|(_, p)| p.clone()).collect();
    let cutoffs = compute_cutoffs(&shard_paths, sketch_cfg, effective_threads(threads, shard_paths.len()))?;

    let per_year = parts
        .par_iter()
        .map(|(year, path)| -> Result<(u16, WinsorSummary)> {
            let input = TickStore::open_readonly(path)?;
            let mut output = TickStore::create(&partition_path(out_dir, out_prefix, *year))?;
            let summary = winsorize_partition(&input, &mut output, &cutoffs, mode, batch_rows)
                .with_context(|| format!("winsor stage, shard {:?}", path))?;
            info!(year = *year, rows_in = summary.rows_in, rows_out = summary.rows_out, "winsorized");
            Ok((*year, summary))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(WinsorStageSummary { cutoffs, per_year })
}

// =============================================================================
// STAGE C: DENOISE
// =============================================================================

/// Denoise stage outcome.
#[derive(Debug)]
pub struct DenoiseStageSummary {
    pub report: DenoiseReport,
    pub per_year: Vec<(u16, u64)>,
}

/// Stream every per-year tick partition through the spike denoiser.
pub fn run_denoise_stage(
    in_dir: &Path,
    in_prefix: &str,
    out_dir: &Path,
    out_prefix: &str,
    cfg: &DenoiseConfig,
    batch_rows: usize,
) -> Result<DenoiseStageSummary> {
    let parts = list_partitions(in_dir, in_prefix)?;
    ensure!(
        !parts.is_empty(),
        "denoise stage: no tick partitions under {:?}",
        in_dir
    );

    let results = parts
        .par_iter()
        .map(|(year, path)| -> Result<(u16, u64, DenoiseReport)> {
            let input = TickStore::open_readonly(path)?;
            let mut output = TickStore::create(&partition_path(out_dir, out_prefix, *year))?;
            let mut denoiser = SpikeDenoiser::new(*cfg);
            let mut batch = Vec::with_capacity(batch_rows);
            let mut kept = 0u64;
            input.for_each_tick(|t| {
                if let Some(clean) = denoiser.push(&t) {
                    kept += 1;
                    batch.push(clean);
                    if batch.len() >= batch_rows {
                        output.append_batch(&batch)?;
                        batch.clear();
                    }
                }
                Ok(())
            })?;
            output.append_batch(&batch)?;
            info!(year = *year, kept = kept, removed = denoiser.report.removed_total(), "denoised");
            Ok((*year, kept, denoiser.report))
        })
        .collect::<Result<Vec<_>>>()
        .with_context(|| "denoise stage failed")?;

    let mut report = DenoiseReport::default();
    let mut per_year = Vec::new();
    for (year, kept, partial) in results {
        for (day, counts) in partial.per_day {
            let entry = report.per_day.entry(day).or_default();
            entry.kept += counts.kept;
            entry.removed_by_delta += counts.removed_by_delta;
            entry.removed_by_level += counts.removed_by_level;
        }
        let room = cfg.max_examples.saturating_sub(report.examples.len());
        report.examples.extend(partial.examples.into_iter().take(room));
        report.dropped_null += partial.dropped_null;
        per_year.push((year, kept));
    }
    per_year.sort_by_key(|(year, _)| *year);
    Ok(DenoiseStageSummary { report, per_year })
}

// =============================================================================
// STAGE D: EVENTS
// =============================================================================

/// Event stage outcome.
#[derive(Debug)]
pub struct EventStageSummary {
    pub counters: EventCounters,
    pub per_year: Vec<(u16, u64)>,
}

/// Build labeled events from cleaned per-year tick partitions.
pub fn run_event_stage(
    in_dir: &Path,
    in_prefix: &str,
    out_dir: &Path,
    out_prefix: &str,
    cfg: &EventBuilderConfig,
    batch_rows: usize,
) -> Result<EventStageSummary> {
    let parts = list_partitions(in_dir, in_prefix)?;
    ensure!(
        !parts.is_empty(),
        "event stage: no tick partitions under {:?}",
        in_dir
    );

    let results = parts
        .par_iter()
        .map(|(year, path)| -> Result<(u16, u64, EventCounters)> {
            let input = TickStore::open_readonly(path)?;
            let mut output = EventStore::create(&partition_path(out_dir, out_prefix, *year))?;
            let mut builder = EventBuilder::new(*cfg);
            let mut batch = Vec::with_capacity(batch_rows);
            let mut emitted = 0u64;
            input.for_each_tick(|t| {
                if let Some(event) = builder.push(&t) {
                    emitted += 1;
                    batch.push(event);
                    if batch.len() >= batch_rows {
                        output.append_batch(&batch)?;
                        batch.clear();
                    }
                }
                Ok(())
            })?;
            builder.finish();
            output.append_batch(&batch)?;
            info!(year = *year, events = emitted, "events built");
            Ok((*year, emitted, builder.counters))
        })
        .collect::<Result<Vec<_>>>()
        .with_context(|| "event stage failed")?;

    let mut counters = EventCounters::default();
    let mut per_year = Vec::new();
    for (year, emitted, partial) in results {
        counters.events_emitted += partial.events_emitted;
        counters.events_dropped_boundary += partial.events_dropped_boundary;
        counters.events_dropped_bigmove += partial.events_dropped_bigmove;
        per_year.push((year, emitted));
    }
    per_year.sort_by_key(|(year, _)| *year);
    Ok(EventStageSummary { counters, per_year })
}

// =============================================================================
// STAGE E: MODEL
// =============================================================================

/// Accumulate all event partitions into a persisted histogram model.
pub fn run_model_stage(
    in_dir: &Path,
    in_prefix: &str,
    model_path: &Path,
    symbol: &str,
    alpha: f64,
) -> Result<HistogramModel> {
    let parts = list_partitions(in_dir, in_prefix)?;
    ensure!(
        !parts.is_empty(),
        "model stage: no event partitions under {:?}",
        in_dir
    );
    let year_lo = parts.first().expect("non-empty").0;
    let year_hi = parts.last().expect("non-empty").0;

    let partials = parts
        .par_iter()
        .map(|(_, path)| -> Result<HistogramAccumulator> {
            let store = EventStore::open_readonly(path)?;
            let mut acc = HistogramAccumulator::new(BinSpec::default());
            store.for_each_event(|e| {
                acc.observe(&e);
                Ok(())
            })?;
            Ok(acc)
        })
        .collect::<Result<Vec<_>>>()
        .with_context(|| "model stage failed")?;

    let mut acc = HistogramAccumulator::new(BinSpec::default());
    for partial in &partials {
        acc.merge(partial);
    }
    info!(
        events = acc.total_events(),
        skipped = acc.skipped,
        "histogram accumulated"
    );

    let model = acc.into_model(symbol, year_lo, year_hi, alpha);
    model.save(model_path)?;
    info!(path = ?model_path, "model written");
    Ok(model)
}

// =============================================================================
// STAGE F: BACKTEST
// =============================================================================

/// Backtest stage outcome.
#[derive(Debug, Default)]
pub struct BacktestStageSummary {
    pub trades_total: u64,
    pub net_total: f64,
    pub skips: SkipCounters,
    pub per_year: Vec<(u16, u64)>,
}

/// Backtest every event partition against a trained model.
pub fn run_backtest_stage(
    in_dir: &Path,
    in_prefix: &str,
    out_dir: &Path,
    model: &HistogramModel,
    cfg: StrategyConfig,
) -> Result<BacktestStageSummary> {
    let parts = list_partitions(in_dir, in_prefix)?;
    ensure!(
        !parts.is_empty(),
        "backtest stage: no event partitions under {:?}",
        in_dir
    );

    let mut summary = BacktestStageSummary::default();
    for (year, path) in parts {
        let store = EventStore::open_readonly(&path)?;
        let events = store.load_all()?;
        let backtester = Backtester::new(cfg, model);
        let result = backtester
            .run(&events)
            .with_context(|| format!("backtest stage, shard {:?}", path))?;

        write_trades_csv(&out_dir.join(format!("trades_{}.csv", year)), &result.trades)?;
        write_daily_csv(&out_dir.join(format!("daily_{}.csv", year)), &result.daily)?;

        summary.trades_total += result.trades.len() as u64;
        summary.net_total += result.net_total();
        summary.skips.invalid += result.skips.invalid;
        summary.skips.magnitude_gate += result.skips.magnitude_gate;
        summary.skips.edge_gate += result.skips.edge_gate;
        summary.skips.wait_gate += result.skips.wait_gate;
        summary.skips.day_boundary += result.skips.day_boundary;
        summary.per_year.push((year, result.trades.len() as u64));
        info!(
            year = year,
            trades = result.trades.len(),
            net = result.net_total(),
            "backtest year finished"
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::time::make_ts;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_gz(path: &Path, lines: &[&str]) {
        let file = std::fs::File::create(path).unwrap();
        let mut enc = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
        writeln!(enc, "date,time,venue,bid,bid_size,ask,ask_size,cond,seq").unwrap();
        for line in lines {
            writeln!(enc, "{}", line).unwrap();
        }
        enc.finish().unwrap();
    }

    #[test]
    fn test_aggregate_stage_end_to_end() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("quotes.csv.gz");
        write_gz(
            &input,
            &[
                "20200102,09:30:00.000,P,100.01,5,100.02,7,R,1",
                "20200102,09:30:00.000,P,100.00,10,100.03,4,R,2",
                "20200102,09:30:00.005,P,100.02,6,100.04,8,R,3",
                // Rejected rows of each recoverable kind.
                "20200102,09:29:00.000,P,100.00,5,100.02,7,R,4",
                "20200102,09:31:00.000,X,100.00,5,100.02,7,R,5",
                "20200102,09:31:00.000,P,100.00,5,100.02,7,A,6",
                "20200102,09:31:00.000,P,0,5,100.02,7,R,7",
                "20200102,09:31:00.000,P,100.02,5,100.01,7,R,8",
                "garbage line",
            ],
        );

        let out = dir.path().join("ticks");
        let summary = run_aggregate_stage(
            &[input],
            &out,
            "ticks_raw",
            &AggregateStageConfig::default(),
        )
        .unwrap();

        assert_eq!(summary.lines_read, 9);
        assert_eq!(summary.quotes_accepted, 3);
        assert_eq!(summary.ticks_written, 2);
        assert_eq!(summary.glitches.grand_total(), 3); // nonpos, crossed, parse
        assert_eq!(summary.years, vec![(2020, 2)]);

        let store =
            TickStore::open_readonly(&partition_path(&out, "ticks_raw", 2020)).unwrap();
        let ticks = store.load_all().unwrap();
        assert_eq!(ticks.len(), 2);
        // Same-ms quotes coalesced inside the first bucket.
        assert_eq!(ticks[0].bid, 100.01);
        assert_eq!(ticks[0].ask, 100.02);
        assert_eq!(ticks[0].log_return, None);
        assert!(ticks[1].log_return.is_some());
    }

    #[test]
    fn test_clock_mode_matches_synthesis_from_event_grid() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("quotes.csv.gz");
        write_gz(
            &input,
            &[
                "20200102,09:30:00.100,P,100.00,5,100.02,7,R,1",
                "20200102,09:30:00.103,P,100.04,5,100.06,7,R,2",
                "20200102,09:30:01.000,P,100.10,5,100.12,7,R,3",
            ],
        );

        // Direct clock path.
        let clock_dir = dir.path().join("clock");
        let cfg = AggregateStageConfig {
            agg: AggregateConfig {
                grid: GridMode::Clock,
                max_ffill_gap_ms: 250,
            },
            ..AggregateStageConfig::default()
        };
        run_aggregate_stage(&[input.clone()], &clock_dir, "ticks", &cfg).unwrap();

        // Event path plus synthesis.
        let event_dir = dir.path().join("event");
        run_aggregate_stage(
            &[input],
            &event_dir,
            "ticks",
            &AggregateStageConfig::default(),
        )
        .unwrap();
        let synth_dir = dir.path().join("synth");
        synthesize_clock_grid(&event_dir, "ticks", &synth_dir, "ticks", 250, 1000).unwrap();

        let direct = TickStore::open_readonly(&partition_path(&clock_dir, "ticks", 2020))
            .unwrap();
        let synth = TickStore::open_readonly(&partition_path(&synth_dir, "ticks", 2020))
            .unwrap();
        assert_eq!(direct.load_all().unwrap(), synth.load_all().unwrap());
        assert_eq!(
            direct.fingerprint().unwrap(),
            synth.fingerprint().unwrap()
        );
        // ms 100..103 filled (2 synthetic), the 896ms gap not filled.
        let ticks = direct.load_all().unwrap();
        assert_eq!(ticks.len(), 5);
        assert_eq!(ticks[1].ts, make_ts(20200102, 9, 30, 0, 101));
        assert_eq!(ticks[1].log_return, Some(0.0));
        assert_eq!(ticks[4].log_return, None);
    }

    #[test]
    fn test_aggregate_idempotence() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("quotes.csv.gz");
        write_gz(
            &input,
            &[
                "20200102,09:30:00.000,P,100.01,5,100.02,7,R,1",
                "20200102,09:30:00.005,P,100.02,6,100.04,8,R,2",
            ],
        );
        let out_a = dir.path().join("a");
        let out_b = dir.path().join("b");
        let cfg = AggregateStageConfig::default();
        run_aggregate_stage(&[input.clone()], &out_a, "ticks", &cfg).unwrap();
        run_aggregate_stage(&[input], &out_b, "ticks", &cfg).unwrap();

        let fp_a = TickStore::open_readonly(&partition_path(&out_a, "ticks", 2020))
            .unwrap()
            .fingerprint()
            .unwrap();
        let fp_b = TickStore::open_readonly(&partition_path(&out_b, "ticks", 2020))
            .unwrap()
            .fingerprint()
            .unwrap();
        assert_eq!(fp_a, fp_b);
    }

    #[test]
    fn test_stage_gating_on_missing_inputs() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();
        let err = run_denoise_stage(
            &dir.path().join("empty"),
            "ticks",
            dir.path(),
            "clean",
            &DenoiseConfig::default(),
            1000,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no tick partitions"));
    }

    #[test]
    fn test_run_context_report() {
        let ctx = RunContext::new();
        let value = ctx.time("aggregate", || 41 + 1);
        assert_eq!(value, 42);
        let report = ctx.render_report();
        assert!(report.contains("aggregate"));
        assert!(report.contains("total"));
    }
}
