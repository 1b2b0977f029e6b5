//! Spike Denoiser
//!
//! Per-day streaming removal of implausible mids from an event-grid tick
//! stream. The filter keeps a single `(ts, mid)` baseline per day (the last
//! kept tick) and applies two asymmetric rules: an absolute level cap and an
//! absolute delta cap against the baseline. The first tick of a day sees only
//! the level rule; crossing into a new day resets the baseline, so inter-day
//! jumps are always permitted.

use crate::pipeline::aggregate::Tick;
use crate::pipeline::time::{day_from_ts, same_day, Ts};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Denoiser settings.
#[derive(Debug, Clone, Copy)]
pub struct DenoiseConfig {
    /// Mids strictly above this level are dropped (`mid == mid_max` passes).
    pub mid_max: f64,
    /// Deltas at or above this threshold are dropped.
    pub delta_threshold: f64,
    /// Sample spike pairs retained for inspection.
    pub max_examples: usize,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            mid_max: 1000.0,
            delta_threshold: 100.0,
            max_examples: 10,
        }
    }
}

/// One retained spike pair for the report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeExample {
    pub day: u32,
    pub ts_prev: Ts,
    pub ts_curr: Ts,
    pub mid_prev: f64,
    pub mid_curr: f64,
    pub delta: f64,
}

/// Per-day kept/removed accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayCounts {
    pub kept: u64,
    pub removed_by_delta: u64,
    pub removed_by_level: u64,
}

/// Denoiser output report.
#[derive(Debug, Default)]
pub struct DenoiseReport {
    pub per_day: BTreeMap<u32, DayCounts>,
    pub examples: Vec<SpikeExample>,
    /// Rows with a non-finite mid, dropped outright.
    pub dropped_null: u64,
}

impl DenoiseReport {
    pub fn kept_total(&self) -> u64 {
        self.per_day.values().map(|c| c.kept).sum()
    }

    pub fn removed_total(&self) -> u64 {
        self.per_day
            .values()
            .map(|c| c.removed_by_delta + c.removed_by_level)
            .sum::<u64>()
            + self.dropped_null
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        writeln!(out, "=== Denoise Report ===").unwrap();
        writeln!(
            out,
            "kept: {}  removed: {}  (null-mid: {})",
            self.kept_total(),
            self.removed_total(),
            self.dropped_null
        )
        .unwrap();
        for (day, counts) in &self.per_day {
            writeln!(
                out,
                "  {}: kept={} by_delta={} by_level={}",
                day, counts.kept, counts.removed_by_delta, counts.removed_by_level
            )
            .unwrap();
        }
        if !self.examples.is_empty() {
            writeln!(out, "sample spikes:").unwrap();
            for e in &self.examples {
                writeln!(
                    out,
                    "  day={} ts {}->{} mid {}->{} delta={}",
                    e.day, e.ts_prev, e.ts_curr, e.mid_prev, e.mid_curr, e.delta
                )
                .unwrap();
            }
        }
        out
    }
}

/// Streaming spike filter. Push ticks in order; `Some` means kept.
#[derive(Debug)]
pub struct SpikeDenoiser {
    cfg: DenoiseConfig,
    /// Last kept `(ts, mid)` of the current day.
    baseline: Option<(Ts, f64)>,
    pub report: DenoiseReport,
}

impl SpikeDenoiser {
    pub fn new(cfg: DenoiseConfig) -> Self {
        Self {
            cfg,
            baseline: None,
            report: DenoiseReport::default(),
        }
    }

    pub fn push(&mut self, t: &Tick) -> Option<Tick> {
        if !t.mid.is_finite() {
            self.report.dropped_null += 1;
            return None;
        }
        let day = day_from_ts(t.ts);
        let counts = self.report.per_day.entry(day).or_default();

        // Day change: forget the baseline, first-of-day rules apply.
        let baseline = match self.baseline {
            Some((bts, bmid)) if same_day(bts, t.ts) => Some((bts, bmid)),
            _ => None,
        };

        // Level rule first, for every tick; a failing tick never installs
        // or moves the baseline.
        if t.mid > self.cfg.mid_max {
            counts.removed_by_level += 1;
            return None;
        }

        if let Some((bts, bmid)) = baseline {
            let delta = (t.mid - bmid).abs();
            if delta >= self.cfg.delta_threshold {
                counts.removed_by_delta += 1;
                if self.report.examples.len() < self.cfg.max_examples {
                    self.report.examples.push(SpikeExample {
                        day,
                        ts_prev: bts,
                        ts_curr: t.ts,
                        mid_prev: bmid,
                        mid_curr: t.mid,
                        delta,
                    });
                }
                return None;
            }
        }

        counts.kept += 1;
        self.baseline = Some((t.ts, t.mid));
        Some(*t)
    }

    /// Current baseline, for inspection.
    pub fn baseline(&self) -> Option<(Ts, f64)> {
        self.baseline
    }
}
