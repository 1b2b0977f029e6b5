//! NBBO Research Pipeline
//!
//! Turns raw exchange Level-1 quote files for a single symbol into a cleaned
//! per-millisecond NBBO time series, a labeled dataset of mid-change events,
//! a discretized predictive model over microstructure features, and a
//! backtest of a state-conditioned single-step strategy.
//!
//! The heavy lifting lives in [`pipeline`]; the binaries under `src/bin/` are
//! thin CLI adapters over the library stages.

pub mod pipeline;

// Re-export the types most callers want at the crate root.
pub use pipeline::{
    AggregateConfig, BacktestSummary, Backtester, BinSpec, CellStats, ClockFill, DenoiseConfig,
    EventBuilder, GlitchCategory, GlitchCounts, GridMode, HistogramAccumulator, HistogramModel,
    LabeledEvent, NbboAggregator, QuoteFilter, RawQuote, RunContext, SpikeDenoiser,
    StrategyConfig, TailCutoffs, TailSketch, TailSketchConfig, Tick, Ts, WinsorMode,
};
