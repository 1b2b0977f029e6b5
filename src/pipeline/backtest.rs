//! Backtester
//!
//! Streams labeled events in timestamp order and trades the one-step
//! transition between adjacent same-day events: the "current" event is a
//! potential entry and the next same-day event supplies the exit mid. Each
//! entry runs through a gate pipeline (validity, signal magnitude, expected
//! edge vs. cost, mean wait) before a trade is recorded. Daily PnL rows are
//! rolled up by a streaming aggregator that enforces strictly increasing
//! days.

use crate::pipeline::features::LabeledEvent;
use crate::pipeline::histogram::HistogramModel;
use crate::pipeline::strategy::{EdgeMode, StrategyConfig};
use crate::pipeline::time::Ts;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// One executed single-step trade. Field names double as the CSV header.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub ts_in: Ts,
    pub ts_out: Ts,
    pub day: u32,
    pub mid_in: f64,
    pub mid_out: f64,
    pub spread_in: f64,
    pub direction_score: f64,
    pub expected_edge_ret: f64,
    pub cost_ret: f64,
    pub gross_ret: f64,
    pub net_ret: f64,
    pub side: i8,
}

/// One closed trading day. Field names double as the CSV header.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyPnlRow {
    pub day: u32,
    pub num_trades: u64,
    pub gross_ret_sum: f64,
    pub net_ret_sum: f64,
    pub gross_ret_mean: f64,
    pub net_ret_mean: f64,
    pub cumulative_net_ret: f64,
}

/// Why entries were skipped, for the stage summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipCounters {
    pub invalid: u64,
    pub magnitude_gate: u64,
    pub edge_gate: u64,
    pub wait_gate: u64,
    pub day_boundary: u64,
}

// =============================================================================
// PNL AGGREGATION
// =============================================================================

/// Streaming daily PnL roll-up.
///
/// Invariants: daily rows strictly increase in `day`; `cumulative_net_ret`
/// is the running sum of per-trade net returns since year start; trades with
/// `day == 0` are rejected.
#[derive(Debug, Default)]
pub struct PnlAggregator {
    current_day: u32,
    count: u64,
    gross_sum: f64,
    net_sum: f64,
    cumulative_net: f64,
    rows: Vec<DailyPnlRow>,
}

impl PnlAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_trade(&mut self, trade: &TradeRecord) -> Result<()> {
        if trade.day == 0 {
            bail!("trade with day=0 reached the PnL aggregator");
        }
        if trade.day != self.current_day {
            if self.current_day != 0 && trade.day < self.current_day {
                bail!(
                    "day order regression in PnL aggregator: {} after {}",
                    trade.day,
                    self.current_day
                );
            }
            if self.count > 0 {
                self.flush_day();
            }
            self.current_day = trade.day;
        }
        self.count += 1;
        self.gross_sum += trade.gross_ret;
        self.net_sum += trade.net_ret;
        self.cumulative_net += trade.net_ret;
        Ok(())
    }

    fn flush_day(&mut self) {
        debug_assert!(self.count > 0);
        if let Some(last) = self.rows.last() {
            assert!(
                self.current_day > last.day,
                "daily rows must strictly increase in day"
            );
        }
        self.rows.push(DailyPnlRow {
            day: self.current_day,
            num_trades: self.count,
            gross_ret_sum: self.gross_sum,
            net_ret_sum: self.net_sum,
            gross_ret_mean: self.gross_sum / self.count as f64,
            net_ret_mean: self.net_sum / self.count as f64,
            cumulative_net_ret: self.cumulative_net,
        });
        self.count = 0;
        self.gross_sum = 0.0;
        self.net_sum = 0.0;
    }

    /// Flush the open day and hand back the rows.
    pub fn finalize(mut self) -> Vec<DailyPnlRow> {
        if self.count > 0 {
            self.flush_day();
        }
        self.rows
    }

    pub fn cumulative_net(&self) -> f64 {
        self.cumulative_net
    }
}

// =============================================================================
// BACKTESTER
// =============================================================================

/// Year-level backtest outcome.
#[derive(Debug)]
pub struct BacktestSummary {
    pub events_seen: u64,
    pub trades: Vec<TradeRecord>,
    pub daily: Vec<DailyPnlRow>,
    pub skips: SkipCounters,
}

impl BacktestSummary {
    pub fn net_total(&self) -> f64 {
        self.daily.last().map(|r| r.cumulative_net_ret).unwrap_or(0.0)
    }
}

/// State-conditioned single-step backtester.
pub struct Backtester<'a> {
    cfg: StrategyConfig,
    model: &'a HistogramModel,
}

impl<'a> Backtester<'a> {
    pub fn new(cfg: StrategyConfig, model: &'a HistogramModel) -> Self {
        Self { cfg, model }
    }

    /// Run over events already sorted by timestamp.
    pub fn run(&self, events: &[LabeledEvent]) -> Result<BacktestSummary> {
        let mut trades = Vec::new();
        let mut skips = SkipCounters::default();
        let mut pnl = PnlAggregator::new();

        for pair in events.windows(2) {
            let (ev, next) = (&pair[0], &pair[1]);
            if ev.day != next.day {
                skips.day_boundary += 1;
                continue;
            }
            if let Some(trade) = self.decide(ev, next, &mut skips) {
                pnl.on_trade(&trade)?;
                trades.push(trade);
            }
        }

        Ok(BacktestSummary {
            events_seen: events.len() as u64,
            trades,
            daily: pnl.finalize(),
            skips,
        })
    }

    /// The per-entry decision pipeline; `None` means skipped.
    pub fn decide(
        &self,
        ev: &LabeledEvent,
        next: &LabeledEvent,
        skips: &mut SkipCounters,
    ) -> Option<TradeRecord> {
        // Validity guards.
        if ev.mid <= 0.0 || ev.spread <= 0.0 {
            skips.invalid += 1;
            return None;
        }

        // Signal.
        let state = self.model.bin_event(ev);
        let d = self.model.direction_score(state);

        // Magnitude gate; 0 disables.
        if self.cfg.min_abs_direction_score > 0.0 && d.abs() < self.cfg.min_abs_direction_score {
            skips.magnitude_gate += 1;
            return None;
        }

        // Expected edge: approximate the one-tick move as half the spread.
        let delta_mid = 0.5 * ev.spread;
        let expected_edge = d * delta_mid / ev.mid;

        // Cost model and edge-mode switch.
        let cost_ret = match self.cfg.edge_mode {
            EdgeMode::Legacy => {
                if expected_edge <= 0.0 {
                    skips.edge_gate += 1;
                    return None;
                }
                0.0
            }
            EdgeMode::CostTradeAll | EdgeMode::CostWithGate => {
                let cost = (ev.spread + 2.0 * self.cfg.fee_price + self.cfg.slip_price) / ev.mid;
                if self.cfg.edge_mode == EdgeMode::CostWithGate
                    && self.cfg.min_expected_edge_bps > 0.0
                {
                    let hurdle = (2.0 * self.cfg.fee_price + self.cfg.slip_price) / ev.mid
                        + self.cfg.min_expected_edge_bps * 1e-4;
                    if expected_edge.abs() <= hurdle {
                        skips.edge_gate += 1;
                        return None;
                    }
                }
                cost
            }
        };

        // Wait gate; 0 disables.
        if self.cfg.max_mean_wait_ms > 0.0
            && self.model.mean_tau_ms_or_sentinel(state) > self.cfg.max_mean_wait_ms
        {
            skips.wait_gate += 1;
            return None;
        }

        // Direction and realization.
        let side: i8 = if d > 0.0 { 1 } else { -1 };
        let gross_ret = side as f64 * (next.mid - ev.mid) / ev.mid;
        let net_ret = gross_ret - cost_ret;

        Some(TradeRecord {
            ts_in: ev.ts,
            ts_out: next.ts,
            day: ev.day,
            mid_in: ev.mid,
            mid_out: next.mid,
            spread_in: ev.spread,
            direction_score: d,
            expected_edge_ret: expected_edge,
            cost_ret,
            gross_ret,
            net_ret,
            side,
        })
    }
}

// =============================================================================
// OUTPUT TABLES
// =============================================================================

/// Write the per-year trades table.
pub fn write_trades_csv(path: &Path, trades: &[TradeRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create trades table {:?}", path))?;
    for trade in trades {
        writer.serialize(trade)?;
    }
    writer.flush()?;
    info!(path = ?path, rows = trades.len(), "trades table written");
    Ok(())
}

/// Write the per-year daily PnL table.
pub fn write_daily_csv(path: &Path, rows: &[DailyPnlRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create daily table {:?}", path))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!(path = ?path, rows = rows.len(), "daily table written");
    Ok(())
}
