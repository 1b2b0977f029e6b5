//! Parallel Extreme-Tail Quantile Estimation
//!
//! Exact selection of extreme quantiles over a log-return stream with
//! bounded memory. Each worker keeps two bounded heaps: a max-heap of the
//! smallest `L` samples seen and a min-heap of the largest `L`. Worker
//! sketches merge into a global sketch under a single lock; rank selection
//! then reads the answer straight out of the sorted heap contents.
//!
//! The result is exact whenever the requested rank lands inside a captured
//! tail (`L >= ceil(max(q_lo, 1-q_hi) * N)` plus margin). When it does not,
//! the estimator returns the heap boundary and flags the side as saturated
//! so the caller can treat the cutoff as a bound.

use crate::pipeline::aggregate::Tick;
use crate::pipeline::store::TickStore;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// Total-ordered f64 wrapper so samples can live in a `BinaryHeap`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrdF64(f64);

impl Eq for OrdF64 {}

impl PartialOrd for OrdF64 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdF64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Sketch settings.
#[derive(Debug, Clone, Copy)]
pub struct TailSketchConfig {
    pub q_lo: f64,
    pub q_hi: f64,
    /// Bound on each heap's size.
    pub heap_len: usize,
}

impl Default for TailSketchConfig {
    fn default() -> Self {
        Self {
            q_lo: 1e-5,
            q_hi: 1.0 - 1e-5,
            heap_len: 200_000,
        }
    }
}

/// Two-sided bounded-heap sketch over finite samples.
#[derive(Debug)]
pub struct TailSketch {
    cap: usize,
    /// Max-heap holding the smallest samples seen.
    lows: BinaryHeap<OrdF64>,
    /// Min-heap holding the largest samples seen.
    highs: BinaryHeap<Reverse<OrdF64>>,
    /// Finite samples observed.
    n: u64,
}

impl TailSketch {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            lows: BinaryHeap::with_capacity(cap + 1),
            highs: BinaryHeap::with_capacity(cap + 1),
            n: 0,
        }
    }

    /// Observe one sample; non-finite values are ignored.
    #[inline]
    pub fn observe(&mut self, v: f64) {
        if !v.is_finite() {
            return;
        }
        self.n += 1;

        if self.lows.len() < self.cap {
            self.lows.push(OrdF64(v));
        } else if let Some(top) = self.lows.peek() {
            if v < top.0 {
                self.lows.pop();
                self.lows.push(OrdF64(v));
            }
        }

        if self.highs.len() < self.cap {
            self.highs.push(Reverse(OrdF64(v)));
        } else if let Some(Reverse(top)) = self.highs.peek() {
            if v > top.0 {
                self.highs.pop();
                self.highs.push(Reverse(OrdF64(v)));
            }
        }
    }

    /// Number of finite samples observed.
    pub fn count(&self) -> u64 {
        self.n
    }

    /// Fold a worker sketch into this one.
    pub fn merge(&mut self, other: TailSketch) {
        self.n += other.n;
        for OrdF64(v) in other.lows.into_vec() {
            if self.lows.len() < self.cap {
                self.lows.push(OrdF64(v));
            } else if let Some(top) = self.lows.peek() {
                if v < top.0 {
                    self.lows.pop();
                    self.lows.push(OrdF64(v));
                }
            }
        }
        for Reverse(OrdF64(v)) in other.highs.into_vec() {
            if self.highs.len() < self.cap {
                self.highs.push(Reverse(OrdF64(v)));
            } else if let Some(Reverse(top)) = self.highs.peek() {
                if v > top.0 {
                    self.highs.pop();
                    self.highs.push(Reverse(OrdF64(v)));
                }
            }
        }
    }

    /// Rank-select the two cutoffs.
    pub fn cutoffs(&self, cfg: &TailSketchConfig) -> TailCutoffs {
        let n = self.n;
        let mut lows: Vec<f64> = self.lows.iter().map(|v| v.0).collect();
        lows.sort_by(f64::total_cmp);
        let mut highs: Vec<f64> = self.highs.iter().map(|Reverse(v)| v.0).collect();
        highs.sort_by(f64::total_cmp);

        if lows.is_empty() || highs.is_empty() {
            return TailCutoffs {
                q_lo: f64::NAN,
                q_hi: f64::NAN,
                n,
                lo_saturated: true,
                hi_saturated: true,
            };
        }

        // Lower cutoff: rank r_lo of the full dataset lies in the captured
        // low tail iff r_lo < |lows|.
        let r_lo = (cfg.q_lo * n as f64).floor() as u64;
        let (q_lo, lo_saturated) = if (r_lo as usize) < lows.len() {
            (lows[r_lo as usize], false)
        } else {
            (*lows.last().expect("non-empty"), true)
        };

        // Upper cutoff: rank r_hi maps into the high heap at
        // r_hi - (N - |highs|), clamped to the valid range.
        let r_hi = (cfg.q_hi * n as f64).floor() as u64;
        let offset = n - highs.len() as u64;
        let (idx, hi_saturated) = if r_hi < offset {
            (0usize, true)
        } else {
            let i = (r_hi - offset) as usize;
            (i.min(highs.len() - 1), false)
        };
        let q_hi = highs[idx];

        TailCutoffs {
            q_lo,
            q_hi,
            n,
            lo_saturated,
            hi_saturated,
        }
    }
}

/// Selected cutoffs plus saturation flags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TailCutoffs {
    pub q_lo: f64,
    pub q_hi: f64,
    /// Finite samples behind the selection.
    pub n: u64,
    /// True when the requested rank fell outside the captured tail and the
    /// reported value is only a bound.
    pub lo_saturated: bool,
    pub hi_saturated: bool,
}

impl TailCutoffs {
    pub fn summary(&self) -> String {
        format!(
            "q_lo={:.3e}{} q_hi={:.3e}{} n={}",
            self.q_lo,
            if self.lo_saturated { " (saturated)" } else { "" },
            self.q_hi,
            if self.hi_saturated { " (saturated)" } else { "" },
            self.n,
        )
    }
}

/// Compute cutoffs over the log returns of a set of tick partitions.
///
/// Workers are plain OS threads pulling shard indexes off a shared atomic
/// counter; each keeps a private sketch and merges it into the global one
/// under a single mutex at end of shard list.
pub fn compute_cutoffs(
    shards: &[PathBuf],
    cfg: &TailSketchConfig,
    threads: usize,
) -> Result<TailCutoffs> {
    let threads = threads.max(1).min(shards.len().max(1));
    let global = Mutex::new(TailSketch::new(cfg.heap_len));
    let next_shard = AtomicUsize::new(0);

    std::thread::scope(|scope| -> Result<()> {
        let mut handles = Vec::with_capacity(threads);
        for _ in 0..threads {
            handles.push(scope.spawn(|| -> Result<()> {
                let mut local = TailSketch::new(cfg.heap_len);
                loop {
                    let idx = next_shard.fetch_add(1, Ordering::Relaxed);
                    let Some(path) = shards.get(idx) else { break };
                    let store = TickStore::open_readonly(path)?;
                    store.for_each_tick(|t| {
                        if let Some(lr) = t.log_return {
                            local.observe(lr);
                        }
                        Ok(())
                    })?;
                }
                global.lock().merge(local);
                Ok(())
            }));
        }
        for handle in handles {
            handle
                .join()
                .expect("tail-quantile worker panicked")
                .context("tail-quantile worker failed")?;
        }
        Ok(())
    })?;

    let sketch = global.lock();
    let cutoffs = sketch.cutoffs(cfg);
    if cutoffs.lo_saturated || cutoffs.hi_saturated {
        warn!(
            heap_len = cfg.heap_len,
            n = cutoffs.n,
            "tail heap saturated; cutoffs are bounds, not exact quantiles"
        );
    }
    info!(cutoffs = %cutoffs.summary(), "tail cutoffs selected");
    Ok(cutoffs)
}

// =============================================================================
// WINSORIZATION
// =============================================================================

/// What to do with log returns outside the cutoffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinsorMode {
    /// Replace out-of-range log returns with the nearer cutoff.
    Clip,
    /// Exclude the whole row.
    Drop,
}

/// Winsorization accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WinsorSummary {
    pub rows_in: u64,
    pub rows_out: u64,
    pub clipped_lo: u64,
    pub clipped_hi: u64,
    pub dropped: u64,
}

/// Stream one tick partition through the winsor policy into a new partition.
pub fn winsorize_partition(
    input: &TickStore,
    output: &mut TickStore,
    cutoffs: &TailCutoffs,
    mode: WinsorMode,
    batch_rows: usize,
) -> Result<WinsorSummary> {
    let mut summary = WinsorSummary::default();
    let mut batch: Vec<Tick> = Vec::with_capacity(batch_rows);

    input.for_each_tick(|mut t| {
        summary.rows_in += 1;
        let mut keep = true;
        if let Some(lr) = t.log_return {
            if lr < cutoffs.q_lo {
                match mode {
                    WinsorMode::Clip => {
                        t.log_return = Some(cutoffs.q_lo);
                        summary.clipped_lo += 1;
                    }
                    WinsorMode::Drop => keep = false,
                }
            } else if lr > cutoffs.q_hi {
                match mode {
                    WinsorMode::Clip => {
                        t.log_return = Some(cutoffs.q_hi);
                        summary.clipped_hi += 1;
                    }
                    WinsorMode::Drop => keep = false,
                }
            }
        }
        if keep {
            summary.rows_out += 1;
            batch.push(t);
            if batch.len() >= batch_rows {
                output.append_batch(&batch)?;
                batch.clear();
            }
        } else {
            summary.dropped += 1;
        }
        Ok(())
    })?;
    output.append_batch(&batch)?;
    Ok(summary)
}
