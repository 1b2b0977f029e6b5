//! NBBO Research Pipeline
//!
//! Data flows leaf-first:
//!
//! ```text
//! raw quote files ──► aggregate ──► per-ms ticks (event or clock grid)
//!                                     │
//!                                     ├──► tail-quantile sketch ──► (q_lo, q_hi)
//!                                     │
//!                                     └──► winsorize ──► partitioned tick store
//!                                                          │
//!                               per-year ticks ──► denoise ──► cleaned ticks
//!                                                               │
//!                                          event builder ──► labeled events
//!                                                               │
//!                    events (all years) ──► histogram ──► model
//!                                                               │
//!                    events + model ──► backtest ──► trades + daily PnL
//! ```
//!
//! # Determinism
//!
//! - Within a shard, processing is strictly sequential: the per-ms bucket,
//!   the denoiser baseline, and the pending event are all order-sensitive.
//! - Across shards, outputs are grouped by year and read back in `ts` order,
//!   so logical content does not depend on worker interleaving.
//! - Stages run to completion or fail; a stage consumes only completed
//!   predecessor outputs.

pub mod aggregate;
pub mod backtest;
pub mod denoise;
pub mod driver;
pub mod features;
pub mod glitch;
pub mod histogram;
pub mod quantile;
pub mod quote;
pub mod store;
pub mod strategy;
pub mod time;


// Re-exports for convenience
pub use aggregate::{AggregateConfig, ClockFill, GridMode, NbboAggregator, Tick};
pub use backtest::{
    write_daily_csv, write_trades_csv, Backtester, BacktestSummary, DailyPnlRow, PnlAggregator,
    SkipCounters, TradeRecord,
};
pub use denoise::{DenoiseConfig, DenoiseReport, SpikeDenoiser, SpikeExample};
pub use driver::{
    run_aggregate_stage, run_backtest_stage, run_denoise_stage, run_event_stage, run_model_stage,
    run_winsor_stage, synthesize_clock_grid, AggregateStageConfig, AggregateStageSummary,
    BacktestStageSummary, DenoiseStageSummary, EventStageSummary, RunContext, WinsorStageSummary,
};
pub use features::{EventBuilder, EventBuilderConfig, EventCounters, LabeledEvent};
pub use glitch::{GlitchCategory, GlitchCounts};
pub use histogram::{
    BinSpec, CellStats, HistogramAccumulator, HistogramModel, N_AGE, N_CELLS, N_IMB, N_LAST,
    N_SPR,
};
pub use quantile::{
    compute_cutoffs, winsorize_partition, TailCutoffs, TailSketch, TailSketchConfig, WinsorMode,
    WinsorSummary,
};
pub use quote::{parse_quote_line, QuoteFilter, RawQuote, VenueSet};
pub use store::{
    list_partitions, partition_path, EventStore, TickStore, YearTickWriters, DEFAULT_BATCH_ROWS,
};
pub use strategy::{EdgeMode, StrategyConfig};
pub use time::{
    add_millis, day_from_ts, hour_from_ts, make_ts, ms_since_midnight, same_day, year_from_ts,
    SessionWindow, Ts,
};
