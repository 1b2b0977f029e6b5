//! Histogram Model
//!
//! A 4-dimensional categorical model over (imbalance, spread ticks, quote-age
//! difference, last move). Cells accumulate counts and waiting times across
//! all years; queries expose Laplace-smoothed direction probabilities and
//! mean waiting times. The persisted form carries its own bin spec so
//! consumers can validate before trusting cell indexes.

use crate::pipeline::features::LabeledEvent;
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const N_IMB: usize = 6;
pub const N_SPR: usize = 3;
pub const N_AGE: usize = 5;
pub const N_LAST: usize = 3;
pub const N_CELLS: usize = N_IMB * N_SPR * N_AGE * N_LAST;

/// Price increment backing the spread tick count.
pub const SPREAD_TICK: f64 = 0.01;

/// Bin boundaries for the four feature dimensions.
///
/// The bracket pattern is structural and fixed; only the edge values are
/// configurable. Imbalance: three left-closed bins, a closed middle bin,
/// two right-closed bins. Age: open outer tails, closed middle.
#[derive(Debug, Clone, PartialEq)]
pub struct BinSpec {
    /// Seven edges bounding the six imbalance bins.
    pub imbalance_edges: [f64; 7],
    /// Inclusive tick-count caps of the first two spread bins.
    pub spread_tick_caps: [i64; 2],
    /// Four edges bounding the five age-difference bins, ms.
    pub age_edges: [f64; 4],
}

impl Default for BinSpec {
    fn default() -> Self {
        Self {
            imbalance_edges: [-1.0, -0.7, -0.3, -0.1, 0.1, 0.3, 1.0],
            spread_tick_caps: [1, 2],
            age_edges: [-200.0, -50.0, 50.0, 200.0],
        }
    }
}

impl BinSpec {
    /// Imbalance bin: `[-1,-0.7) [-0.7,-0.3) [-0.3,-0.1) [-0.1,0.1] (0.1,0.3] (0.3,1]`.
    #[inline]
    pub fn bin_imbalance(&self, i: f64) -> usize {
        let e = &self.imbalance_edges;
        if i < e[1] {
            0
        } else if i < e[2] {
            1
        } else if i < e[3] {
            2
        } else if i <= e[4] {
            3
        } else if i <= e[5] {
            4
        } else {
            5
        }
    }

    /// Spread bin keyed by tick count `k = round(spread / 0.01)`.
    /// Non-positive or non-finite spreads map to bin 0.
    #[inline]
    pub fn bin_spread(&self, spread: f64) -> usize {
        if !spread.is_finite() || spread <= 0.0 {
            return 0;
        }
        let k = (spread / SPREAD_TICK).round() as i64;
        if k <= self.spread_tick_caps[0] {
            0
        } else if k <= self.spread_tick_caps[1] {
            1
        } else {
            2
        }
    }

    /// Age-difference bin: `(-inf,-200) [-200,-50) [-50,50] (50,200] (200,inf)`.
    #[inline]
    pub fn bin_age(&self, age_diff_ms: f64) -> usize {
        let e = &self.age_edges;
        if age_diff_ms < e[0] {
            0
        } else if age_diff_ms < e[1] {
            1
        } else if age_diff_ms <= e[2] {
            2
        } else if age_diff_ms <= e[3] {
            3
        } else {
            4
        }
    }

    /// Last-move bin: `< -0.5 -> 0`, `|L| <= 0.5 -> 1`, `> 0.5 -> 2`.
    #[inline]
    pub fn bin_last_move(&self, last_move: f64) -> usize {
        if last_move < -0.5 {
            0
        } else if last_move > 0.5 {
            2
        } else {
            1
        }
    }

    /// Linear cell index.
    #[inline]
    pub fn cell_index(&self, b_imb: usize, b_spr: usize, b_age: usize, b_last: usize) -> usize {
        let k = ((b_imb * N_SPR + b_spr) * N_AGE + b_age) * N_LAST + b_last;
        assert!(k < N_CELLS, "cell index {} out of range", k);
        k
    }

    /// Cell index of one labeled event.
    pub fn bin_event(&self, e: &LabeledEvent) -> usize {
        self.cell_index(
            self.bin_imbalance(e.imbalance),
            self.bin_spread(e.spread),
            self.bin_age(e.age_diff_ms as f64),
            self.bin_last_move(e.last_move as f64),
        )
    }

    /// Decompose a linear index back into its four coordinates.
    pub fn coords(&self, k: usize) -> (usize, usize, usize, usize) {
        let b_last = k % N_LAST;
        let rest = k / N_LAST;
        let b_age = rest % N_AGE;
        let rest = rest / N_AGE;
        let b_spr = rest % N_SPR;
        let b_imb = rest / N_SPR;
        (b_imb, b_spr, b_age, b_last)
    }
}

/// Per-cell accumulated statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellStats {
    pub n: u64,
    pub n_up: u64,
    pub n_down: u64,
    pub sum_tau_ms: u64,
}

/// Streaming accumulator over labeled events.
#[derive(Debug)]
pub struct HistogramAccumulator {
    spec: BinSpec,
    cells: Vec<CellStats>,
    /// Rows skipped for non-finite required fields.
    pub skipped: u64,
}

impl HistogramAccumulator {
    pub fn new(spec: BinSpec) -> Self {
        Self {
            spec,
            cells: vec![CellStats::default(); N_CELLS],
            skipped: 0,
        }
    }

    pub fn observe(&mut self, e: &LabeledEvent) {
        if !e.mid.is_finite()
            || !e.mid_next.is_finite()
            || !e.spread.is_finite()
            || !e.imbalance.is_finite()
        {
            self.skipped += 1;
            return;
        }
        let k = self.spec.bin_event(e);
        let cell = &mut self.cells[k];
        cell.n += 1;
        if e.y > 0 {
            cell.n_up += 1;
        } else if e.y < 0 {
            cell.n_down += 1;
        }
        cell.sum_tau_ms += e.tau_ms.max(0) as u64;
    }

    /// Fold another accumulator (same spec) into this one.
    pub fn merge(&mut self, other: &HistogramAccumulator) {
        for (dst, src) in self.cells.iter_mut().zip(other.cells.iter()) {
            dst.n += src.n;
            dst.n_up += src.n_up;
            dst.n_down += src.n_down;
            dst.sum_tau_ms += src.sum_tau_ms;
        }
        self.skipped += other.skipped;
    }

    pub fn total_events(&self) -> u64 {
        self.cells.iter().map(|c| c.n).sum()
    }

    /// Finish into a queryable model.
    pub fn into_model(self, symbol: &str, year_lo: u16, year_hi: u16, alpha: f64) -> HistogramModel {
        HistogramModel {
            symbol: symbol.to_string(),
            year_lo,
            year_hi,
            alpha,
            spec: self.spec,
            cells: self.cells,
        }
    }
}

/// The trained model: immutable after construction or load.
#[derive(Debug, Clone)]
pub struct HistogramModel {
    pub symbol: String,
    pub year_lo: u16,
    pub year_hi: u16,
    pub alpha: f64,
    pub spec: BinSpec,
    pub cells: Vec<CellStats>,
}

impl HistogramModel {
    /// Smoothed up-probability; 0.5 when the cell holds no directional moves.
    pub fn p_up(&self, k: usize) -> f64 {
        let c = &self.cells[k];
        let directional = c.n_up + c.n_down;
        if directional == 0 {
            0.5
        } else {
            (c.n_up as f64 + self.alpha) / (directional as f64 + 2.0 * self.alpha)
        }
    }

    pub fn p_down(&self, k: usize) -> f64 {
        1.0 - self.p_up(k)
    }

    /// Signed predictive edge `2 * p_up - 1`.
    pub fn direction_score(&self, k: usize) -> f64 {
        2.0 * self.p_up(k) - 1.0
    }

    /// Mean waiting time of a cell; `None` when the cell is empty.
    pub fn mean_tau_ms(&self, k: usize) -> Option<f64> {
        let c = &self.cells[k];
        if c.n > 0 {
            Some(c.sum_tau_ms as f64 / c.n as f64)
        } else {
            None
        }
    }

    /// Mean waiting time across all cells.
    pub fn global_mean_tau_ms(&self) -> f64 {
        let n: u64 = self.cells.iter().map(|c| c.n).sum();
        let tau: u64 = self.cells.iter().map(|c| c.sum_tau_ms).sum();
        if n > 0 {
            tau as f64 / n as f64
        } else {
            0.0
        }
    }

    /// Mean waiting time with the conservative sentinel for empty cells,
    /// matching the persisted form.
    pub fn mean_tau_ms_or_sentinel(&self, k: usize) -> f64 {
        self.mean_tau_ms(k)
            .unwrap_or_else(|| 2.0 * self.global_mean_tau_ms())
    }

    /// Cell index of one labeled event under this model's bin spec.
    pub fn bin_event(&self, e: &LabeledEvent) -> usize {
        self.spec.bin_event(e)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = ModelFile::from_model(self);
        let out = std::fs::File::create(path)
            .with_context(|| format!("failed to create model file {:?}", path))?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(out), &file)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read model file {:?}", path))?;
        let file: ModelFile = serde_json::from_slice(&data)
            .with_context(|| format!("malformed model file {:?}", path))?;
        file.into_model()
    }
}

// =============================================================================
// PERSISTED FORM
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct ImbalanceBinDto {
    idx: usize,
    lo: f64,
    hi: f64,
    interval: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SpreadBinDto {
    idx: usize,
    ticks_min: i64,
    ticks_max: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AgeBinDto {
    idx: usize,
    lo: Option<f64>,
    hi: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LastMoveBinDto {
    idx: usize,
    value: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CellDto {
    idx: usize,
    b_imb: usize,
    b_spr: usize,
    b_age: usize,
    b_last: usize,
    n: u64,
    n_up: u64,
    n_down: u64,
    sum_tau_ms: u64,
    p_up: f64,
    p_down: f64,
    #[serde(rename = "D")]
    d: f64,
    mean_tau_ms: f64,
}

/// On-disk model layout. The bin sections may be absent, in which case the
/// default spec is assumed at load.
#[derive(Debug, Serialize, Deserialize)]
struct ModelFile {
    symbol: String,
    year_lo: u16,
    year_hi: u16,
    alpha: f64,
    #[serde(default)]
    imbalance_bins: Vec<ImbalanceBinDto>,
    #[serde(default)]
    spread_bins: Vec<SpreadBinDto>,
    #[serde(default)]
    age_diff_ms_bins: Vec<AgeBinDto>,
    #[serde(default)]
    last_move_bins: Vec<LastMoveBinDto>,
    cells: Vec<CellDto>,
}

/// Interval bracket labels for the six imbalance bins.
const IMB_INTERVALS: [&str; N_IMB] = [
    "[lo,hi)", "[lo,hi)", "[lo,hi)", "[lo,hi]", "(lo,hi]", "(lo,hi]",
];

impl ModelFile {
    fn from_model(m: &HistogramModel) -> Self {
        let e = &m.spec.imbalance_edges;
        let imbalance_bins = (0..N_IMB)
            .map(|i| ImbalanceBinDto {
                idx: i,
                lo: e[i],
                hi: e[i + 1],
                interval: IMB_INTERVALS[i].to_string(),
            })
            .collect();

        let caps = m.spec.spread_tick_caps;
        let spread_bins = vec![
            SpreadBinDto { idx: 0, ticks_min: 0, ticks_max: Some(caps[0]) },
            SpreadBinDto { idx: 1, ticks_min: caps[0] + 1, ticks_max: Some(caps[1]) },
            SpreadBinDto { idx: 2, ticks_min: caps[1] + 1, ticks_max: None },
        ];

        let a = &m.spec.age_edges;
        let age_diff_ms_bins = vec![
            AgeBinDto { idx: 0, lo: None, hi: Some(a[0]) },
            AgeBinDto { idx: 1, lo: Some(a[0]), hi: Some(a[1]) },
            AgeBinDto { idx: 2, lo: Some(a[1]), hi: Some(a[2]) },
            AgeBinDto { idx: 3, lo: Some(a[2]), hi: Some(a[3]) },
            AgeBinDto { idx: 4, lo: Some(a[3]), hi: None },
        ];

        let last_move_bins = vec![
            LastMoveBinDto { idx: 0, value: -1.0 },
            LastMoveBinDto { idx: 1, value: 0.0 },
            LastMoveBinDto { idx: 2, value: 1.0 },
        ];

        let cells = (0..N_CELLS)
            .map(|k| {
                let (b_imb, b_spr, b_age, b_last) = m.spec.coords(k);
                let c = &m.cells[k];
                CellDto {
                    idx: k,
                    b_imb,
                    b_spr,
                    b_age,
                    b_last,
                    n: c.n,
                    n_up: c.n_up,
                    n_down: c.n_down,
                    sum_tau_ms: c.sum_tau_ms,
                    p_up: m.p_up(k),
                    p_down: m.p_down(k),
                    d: m.direction_score(k),
                    mean_tau_ms: m.mean_tau_ms_or_sentinel(k),
                }
            })
            .collect();

        Self {
            symbol: m.symbol.clone(),
            year_lo: m.year_lo,
            year_hi: m.year_hi,
            alpha: m.alpha,
            imbalance_bins,
            spread_bins,
            age_diff_ms_bins,
            last_move_bins,
            cells,
        }
    }

    fn into_model(self) -> Result<HistogramModel> {
        let spec = if self.imbalance_bins.is_empty()
            && self.spread_bins.is_empty()
            && self.age_diff_ms_bins.is_empty()
            && self.last_move_bins.is_empty()
        {
            BinSpec::default()
        } else {
            self.validated_spec()?
        };

        ensure!(
            self.cells.len() == N_CELLS,
            "model file has {} cells, expected {}",
            self.cells.len(),
            N_CELLS
        );
        let mut cells = vec![CellStats::default(); N_CELLS];
        for c in &self.cells {
            ensure!(c.idx < N_CELLS, "cell index {} out of range", c.idx);
            cells[c.idx] = CellStats {
                n: c.n,
                n_up: c.n_up,
                n_down: c.n_down,
                sum_tau_ms: c.sum_tau_ms,
            };
        }

        Ok(HistogramModel {
            symbol: self.symbol,
            year_lo: self.year_lo,
            year_hi: self.year_hi,
            alpha: self.alpha,
            spec,
            cells,
        })
    }

    fn validated_spec(&self) -> Result<BinSpec> {
        ensure!(
            self.imbalance_bins.len() == N_IMB,
            "model file has {} imbalance bins, expected {}",
            self.imbalance_bins.len(),
            N_IMB
        );
        ensure!(
            self.spread_bins.len() == N_SPR,
            "model file has {} spread bins, expected {}",
            self.spread_bins.len(),
            N_SPR
        );
        ensure!(
            self.age_diff_ms_bins.len() == N_AGE,
            "model file has {} age bins, expected {}",
            self.age_diff_ms_bins.len(),
            N_AGE
        );
        ensure!(
            self.last_move_bins.len() == N_LAST,
            "model file has {} last-move bins, expected {}",
            self.last_move_bins.len(),
            N_LAST
        );

        let mut imbalance_edges = [0.0; 7];
        for (i, bin) in self.imbalance_bins.iter().enumerate() {
            imbalance_edges[i] = bin.lo;
            imbalance_edges[i + 1] = bin.hi;
        }
        let spread_tick_caps = [
            self.spread_bins[0].ticks_max.context("spread bin 0 missing ticks_max")?,
            self.spread_bins[1].ticks_max.context("spread bin 1 missing ticks_max")?,
        ];
        let mut age_edges = [0.0; 4];
        for i in 0..4 {
            age_edges[i] = self.age_diff_ms_bins[i]
                .hi
                .with_context(|| format!("age bin {} missing hi edge", i))?;
        }
        Ok(BinSpec {
            imbalance_edges,
            spread_tick_caps,
            age_edges,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::time::make_ts;
    use tempfile::TempDir;

    fn event(imbalance: f64, spread: f64, age_diff_ms: i64, last_move: i8, y: i8, tau_ms: i64) -> LabeledEvent {
        LabeledEvent {
            ts: make_ts(20200102, 10, 0, 0, 0),
            day: 20200102,
            mid: 100.0,
            mid_next: 100.0 + 0.01 * y as f64,
            spread,
            imbalance,
            age_diff_ms,
            last_move,
            y,
            tau_ms,
        }
    }

    #[test]
    fn test_imbalance_bin_edges() {
        let spec = BinSpec::default();
        assert_eq!(spec.bin_imbalance(-1.0), 0);
        assert_eq!(spec.bin_imbalance(-0.7), 1); // left-closed second bin
        assert_eq!(spec.bin_imbalance(-0.3), 2);
        assert_eq!(spec.bin_imbalance(-0.1), 3); // closed middle bin
        assert_eq!(spec.bin_imbalance(0.1), 3); // still the middle bin
        assert_eq!(spec.bin_imbalance(0.11), 4);
        assert_eq!(spec.bin_imbalance(0.3), 4);
        assert_eq!(spec.bin_imbalance(0.31), 5);
        assert_eq!(spec.bin_imbalance(1.0), 5);
    }

    #[test]
    fn test_spread_bin_rounding() {
        let spec = BinSpec::default();
        assert_eq!(spec.bin_spread(0.014), 0); // round(1.4) = 1
        assert_eq!(spec.bin_spread(0.015), 1); // round(1.5) = 2
        assert_eq!(spec.bin_spread(0.025), 2); // round(2.5) = 3
        assert_eq!(spec.bin_spread(0.01), 0);
        assert_eq!(spec.bin_spread(0.05), 2);
        // Degenerate spreads all map to bin 0.
        assert_eq!(spec.bin_spread(0.0), 0);
        assert_eq!(spec.bin_spread(-0.01), 0);
        assert_eq!(spec.bin_spread(f64::NAN), 0);
    }

    #[test]
    fn test_age_bin_edges() {
        let spec = BinSpec::default();
        assert_eq!(spec.bin_age(-201.0), 0);
        assert_eq!(spec.bin_age(-200.0), 1); // [-200,-50)
        assert_eq!(spec.bin_age(-50.0), 2); // [-50,50] closed
        assert_eq!(spec.bin_age(50.0), 2);
        assert_eq!(spec.bin_age(51.0), 3);
        assert_eq!(spec.bin_age(200.0), 3);
        assert_eq!(spec.bin_age(201.0), 4);
    }

    #[test]
    fn test_last_move_bins() {
        let spec = BinSpec::default();
        assert_eq!(spec.bin_last_move(-1.0), 0);
        assert_eq!(spec.bin_last_move(0.0), 1);
        assert_eq!(spec.bin_last_move(1.0), 2);
    }

    #[test]
    fn test_cell_index_layout() {
        let spec = BinSpec::default();
        assert_eq!(spec.cell_index(0, 0, 0, 0), 0);
        assert_eq!(spec.cell_index(5, 2, 4, 2), N_CELLS - 1);
        for k in 0..N_CELLS {
            let (a, b, c, d) = spec.coords(k);
            assert_eq!(spec.cell_index(a, b, c, d), k);
        }
    }

    #[test]
    fn test_cell_arithmetic() {
        // One cell with n_up=3, n_down=1, sum_tau=40, alpha=1.
        let mut acc = HistogramAccumulator::new(BinSpec::default());
        for _ in 0..3 {
            acc.observe(&event(0.0, 0.01, 0, 0, 1, 10));
        }
        acc.observe(&event(0.0, 0.01, 0, 0, -1, 10));
        let model = acc.into_model("TEST", 2020, 2020, 1.0);
        let k = model.spec.cell_index(3, 0, 2, 1);
        assert_eq!(model.cells[k].n, 4);
        assert!((model.p_up(k) - 4.0 / 6.0).abs() < 1e-12);
        assert!((model.direction_score(k) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(model.mean_tau_ms(k), Some(10.0));
    }

    #[test]
    fn test_flat_moves_count_n_only() {
        let mut acc = HistogramAccumulator::new(BinSpec::default());
        acc.observe(&event(0.0, 0.01, 0, 0, 0, 8));
        let model = acc.into_model("TEST", 2020, 2020, 1.0);
        let k = model.spec.cell_index(3, 0, 2, 1);
        let c = model.cells[k];
        assert_eq!((c.n, c.n_up, c.n_down, c.sum_tau_ms), (1, 0, 0, 8));
        // No directional moves: fall back to one half.
        assert_eq!(model.p_up(k), 0.5);
    }

    #[test]
    fn test_empty_cell_sentinel() {
        let mut acc = HistogramAccumulator::new(BinSpec::default());
        acc.observe(&event(0.0, 0.01, 0, 0, 1, 10));
        let model = acc.into_model("TEST", 2020, 2020, 1.0);
        let empty = model.spec.cell_index(0, 0, 0, 0);
        assert_eq!(model.mean_tau_ms(empty), None);
        assert_eq!(model.mean_tau_ms_or_sentinel(empty), 20.0);
    }

    #[test]
    fn test_p_up_p_down_sum_to_one() {
        let mut acc = HistogramAccumulator::new(BinSpec::default());
        acc.observe(&event(0.5, 0.03, 300, 1, 1, 5));
        acc.observe(&event(0.5, 0.03, 300, 1, -1, 5));
        let model = acc.into_model("TEST", 2020, 2020, 1.0);
        for k in 0..N_CELLS {
            assert!((model.p_up(k) + model.p_down(k) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_model_persist_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");

        let mut acc = HistogramAccumulator::new(BinSpec::default());
        acc.observe(&event(-0.5, 0.02, -100, -1, 1, 12));
        acc.observe(&event(0.2, 0.01, 75, 1, -1, 30));
        acc.observe(&event(0.0, 0.04, 0, 0, 0, 9));
        let model = acc.into_model("SPY", 2020, 2023, 1.0);
        model.save(&path).unwrap();

        let loaded = HistogramModel::load(&path).unwrap();
        assert_eq!(loaded.symbol, "SPY");
        assert_eq!(loaded.year_lo, 2020);
        assert_eq!(loaded.year_hi, 2023);
        assert_eq!(loaded.alpha, 1.0);
        assert_eq!(loaded.spec, model.spec);
        assert_eq!(loaded.cells, model.cells);

        // Persist -> load -> persist is identity.
        let path2 = dir.path().join("model2.json");
        loaded.save(&path2).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            std::fs::read_to_string(&path2).unwrap()
        );
    }

    #[test]
    fn test_model_load_without_bins_assumes_default_spec() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        let model =
            HistogramAccumulator::new(BinSpec::default()).into_model("X", 2020, 2020, 1.0);
        model.save(&path).unwrap();

        let mut doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let obj = doc.as_object_mut().unwrap();
        obj.remove("imbalance_bins");
        obj.remove("spread_bins");
        obj.remove("age_diff_ms_bins");
        obj.remove("last_move_bins");
        std::fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();

        let loaded = HistogramModel::load(&path).unwrap();
        assert_eq!(loaded.spec, BinSpec::default());
    }

    #[test]
    fn test_model_load_rejects_wrong_cell_count() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        let model =
            HistogramAccumulator::new(BinSpec::default()).into_model("X", 2020, 2020, 1.0);
        model.save(&path).unwrap();

        let mut doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        doc["cells"].as_array_mut().unwrap().pop();
        std::fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();

        let err = HistogramModel::load(&path).unwrap_err();
        assert!(err.to_string().contains("cells"));
    }

    #[test]
    fn test_accumulator_merge() {
        let mut a = HistogramAccumulator::new(BinSpec::default());
        let mut b = HistogramAccumulator::new(BinSpec::default());
        a.observe(&event(0.0, 0.01, 0, 0, 1, 10));
        b.observe(&event(0.0, 0.01, 0, 0, -1, 6));
        a.merge(&b);
        let model = a.into_model("X", 2020, 2021, 1.0);
        let k = model.spec.cell_index(3, 0, 2, 1);
        assert_eq!(model.cells[k].n, 2);
        assert_eq!(model.cells[k].sum_tau_ms, 16);
    }

    #[test]
    fn test_skips_non_finite_rows() {
        let mut acc = HistogramAccumulator::new(BinSpec::default());
        let mut e = event(0.0, 0.01, 0, 0, 1, 10);
        e.mid = f64::NAN;
        acc.observe(&e);
        assert_eq!(acc.skipped, 1);
        assert_eq!(acc.total_events(), 0);
    }
}
