//! Strategy Configuration
//!
//! Loaded from a flat JSON object with optional keys. `edge_mode` selects the
//! cost/edge policy; the legacy `legacy_mode` key is an alias that wins when
//! present and non-zero.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Cost/edge policy of the backtester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeMode {
    /// No costs; trade iff the expected edge is strictly positive.
    Legacy,
    /// Full costs, no expected-edge gate.
    CostTradeAll,
    /// Full costs plus the configurable expected-edge gate.
    CostWithGate,
}

impl EdgeMode {
    fn from_tag(tag: i64) -> Result<Self> {
        match tag {
            0 => Ok(EdgeMode::Legacy),
            1 => Ok(EdgeMode::CostTradeAll),
            2 => Ok(EdgeMode::CostWithGate),
            other => bail!("unknown edge_mode {}", other),
        }
    }
}

/// Resolved strategy settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyConfig {
    /// Per-fill fee, price units.
    pub fee_price: f64,
    /// Round-trip slippage allowance, price units.
    pub slip_price: f64,
    /// Magnitude gate on |direction score|; 0 disables.
    pub min_abs_direction_score: f64,
    /// Expected-edge gate in basis points; 0 disables.
    pub min_expected_edge_bps: f64,
    /// Mean-wait gate in ms; 0 disables.
    pub max_mean_wait_ms: f64,
    pub edge_mode: EdgeMode,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            fee_price: 0.03,
            slip_price: 0.02,
            min_abs_direction_score: 0.0,
            min_expected_edge_bps: 0.0,
            max_mean_wait_ms: 0.0,
            edge_mode: EdgeMode::CostWithGate,
        }
    }
}

/// Raw on-disk layout; every key optional.
#[derive(Debug, Default, Deserialize)]
struct StrategyConfigFile {
    fee_price: Option<f64>,
    slip_price: Option<f64>,
    min_abs_direction_score: Option<f64>,
    min_expected_edge_bps: Option<f64>,
    max_mean_wait_ms: Option<f64>,
    edge_mode: Option<i64>,
    legacy_mode: Option<i64>,
}

impl StrategyConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read strategy config {:?}", path))?;
        let file: StrategyConfigFile = serde_json::from_slice(&data)
            .with_context(|| format!("malformed strategy config {:?}", path))?;
        Self::resolve(file)
    }

    fn resolve(file: StrategyConfigFile) -> Result<Self> {
        let defaults = Self::default();
        // Alias precedence: a non-zero legacy_mode forces Legacy.
        let edge_mode = if file.legacy_mode.unwrap_or(0) != 0 {
            EdgeMode::Legacy
        } else {
            match file.edge_mode {
                Some(tag) => EdgeMode::from_tag(tag)?,
                None => defaults.edge_mode,
            }
        };
        Ok(Self {
            fee_price: file.fee_price.unwrap_or(defaults.fee_price),
            slip_price: file.slip_price.unwrap_or(defaults.slip_price),
            min_abs_direction_score: file
                .min_abs_direction_score
                .unwrap_or(defaults.min_abs_direction_score),
            min_expected_edge_bps: file
                .min_expected_edge_bps
                .unwrap_or(defaults.min_expected_edge_bps),
            max_mean_wait_ms: file.max_mean_wait_ms.unwrap_or(defaults.max_mean_wait_ms),
            edge_mode,
        })
    }
}
