//! Labeled-Event Builder
//!
//! Walks a cleaned event-grid Tick stream and turns mid changes into labeled
//! events. A tick with a finite non-zero log return becomes a candidate
//! event; it is held until the *next* same-day mid change arrives, which
//! supplies the label (`mid_next`, its sign, and the waiting time). Per-side
//! quote ages track how long the current best bid/ask price has been
//! standing.

use crate::pipeline::aggregate::Tick;
use crate::pipeline::time::{day_from_ts, ms_since_midnight, Ts};
use serde::{Deserialize, Serialize};

/// One labeled mid-change event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledEvent {
    pub ts: Ts,
    /// Calendar day (YYYYMMDD).
    pub day: u32,
    pub mid: f64,
    pub mid_next: f64,
    pub spread: f64,
    /// `(bid_size - ask_size) / (bid_size + ask_size)`, 0 when empty.
    pub imbalance: f64,
    /// Bid quote age minus ask quote age, ms.
    pub age_diff_ms: i64,
    /// Sign of the previous mid change, in {-1, 0, +1}.
    pub last_move: i8,
    /// Sign of the next mid change, in {-1, 0, +1}.
    pub y: i8,
    /// Waiting time to the next mid change, ms, strictly positive.
    pub tau_ms: i64,
}

/// Builder settings.
#[derive(Debug, Clone, Copy)]
pub struct EventBuilderConfig {
    /// Largest |mid_next - mid| accepted when labeling, in price units.
    pub threshold_next: f64,
}

impl Default for EventBuilderConfig {
    fn default() -> Self {
        Self { threshold_next: 1.0 }
    }
}

/// Drop accounting for the builder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounters {
    pub events_emitted: u64,
    /// Pending events discarded at a day boundary or end of stream.
    pub events_dropped_boundary: u64,
    /// Pending events discarded because the next move exceeded the threshold.
    pub events_dropped_bigmove: u64,
}

/// Snapshot taken at an event tick, awaiting its label.
#[derive(Debug, Clone, Copy)]
struct PendingEvent {
    ts: Ts,
    day: u32,
    mid: f64,
    spread: f64,
    imbalance: f64,
    age_diff_ms: i64,
    last_move: i8,
}

#[derive(Debug, Clone, Copy)]
struct DayState {
    day: u32,
    last_bid: f64,
    last_ask: f64,
    bid_origin_ms: i64,
    ask_origin_ms: i64,
    last_move_sign: i8,
}

/// Streaming event builder; push ticks in order, collect labeled events.
#[derive(Debug)]
pub struct EventBuilder {
    cfg: EventBuilderConfig,
    state: Option<DayState>,
    pending: Option<PendingEvent>,
    pub counters: EventCounters,
}

impl EventBuilder {
    pub fn new(cfg: EventBuilderConfig) -> Self {
        Self {
            cfg,
            state: None,
            pending: None,
            counters: EventCounters::default(),
        }
    }

    /// Process one tick; returns the previous event once it can be labeled.
    pub fn push(&mut self, t: &Tick) -> Option<LabeledEvent> {
        let day = day_from_ts(t.ts);
        let now_ms = ms_since_midnight(t.ts);

        // Day boundary: reset per-day state, discard any pending event.
        let same_day = matches!(self.state, Some(ref s) if s.day == day);
        if !same_day {
            if self.pending.take().is_some() {
                self.counters.events_dropped_boundary += 1;
            }
            self.state = Some(DayState {
                day,
                last_bid: t.bid,
                last_ask: t.ask,
                bid_origin_ms: now_ms,
                ask_origin_ms: now_ms,
                last_move_sign: 0,
            });
        }
        let state = self.state.as_mut().expect("state installed above");

        // Quote ages: an origin moves whenever the best price changes.
        if t.bid != state.last_bid {
            state.last_bid = t.bid;
            state.bid_origin_ms = now_ms;
        }
        if t.ask != state.last_ask {
            state.last_ask = t.ask;
            state.ask_origin_ms = now_ms;
        }
        let age_bid_ms = now_ms - state.bid_origin_ms;
        let age_ask_ms = now_ms - state.ask_origin_ms;

        let denom = t.bid_size + t.ask_size;
        let imbalance = if denom != 0.0 {
            (t.bid_size - t.ask_size) / denom
        } else {
            0.0
        };

        // Event gate: only ticks with a finite, non-zero log return.
        let lr = match t.log_return {
            Some(v) if v.is_finite() && v != 0.0 => v,
            _ => return None,
        };

        let current = PendingEvent {
            ts: t.ts,
            day,
            mid: t.mid,
            spread: t.spread,
            imbalance,
            age_diff_ms: age_bid_ms - age_ask_ms,
            last_move: state.last_move_sign,
        };

        let labeled = match self.pending {
            Some(prev) if prev.day == day => {
                let delta = current.mid - prev.mid;
                if delta.abs() > self.cfg.threshold_next {
                    self.counters.events_dropped_bigmove += 1;
                    None
                } else {
                    self.counters.events_emitted += 1;
                    Some(LabeledEvent {
                        ts: prev.ts,
                        day: prev.day,
                        mid: prev.mid,
                        mid_next: current.mid,
                        spread: prev.spread,
                        imbalance: prev.imbalance,
                        age_diff_ms: prev.age_diff_ms,
                        last_move: prev.last_move,
                        y: sign(delta),
                        tau_ms: ms_since_midnight(current.ts) - ms_since_midnight(prev.ts),
                    })
                }
            }
            _ => None,
        };

        state.last_move_sign = sign(lr);
        self.pending = Some(current);
        labeled
    }

    /// End of stream: any pending event can no longer be labeled.
    pub fn finish(&mut self) {
        if self.pending.take().is_some() {
            self.counters.events_dropped_boundary += 1;
        }
    }
}

#[inline]
fn sign(v: f64) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::time::make_ts;

    fn tick(ts: Ts, mid: f64, lr: Option<f64>, bid_size: f64, ask_size: f64) -> Tick {
        Tick {
            ts,
            mid,
            log_return: lr,
            bid_size,
            ask_size,
            spread: 0.02,
            bid: mid - 0.01,
            ask: mid + 0.01,
        }
    }

    #[test]
    fn test_event_labeling() {
        // Two same-day mid changes 7ms apart: the second labels the first.
        let mut b = EventBuilder::new(EventBuilderConfig::default());
        let ts_a = make_ts(20200102, 10, 0, 0, 0);
        let ts_b = make_ts(20200102, 10, 0, 0, 7);

        assert!(b.push(&tick(ts_a, 100.00, Some(1e-4), 5.0, 7.0)).is_none());
        let ev = b.push(&tick(ts_b, 100.05, Some(5e-4), 5.0, 7.0)).unwrap();

        assert_eq!(ev.ts, ts_a);
        assert_eq!(ev.day, 20200102);
        assert_eq!(ev.mid, 100.00);
        assert_eq!(ev.mid_next, 100.05);
        assert_eq!(ev.y, 1);
        assert_eq!(ev.tau_ms, 7);
        assert_eq!(b.counters.events_emitted, 1);
    }

    #[test]
    fn test_non_events_do_not_emit_or_label() {
        let mut b = EventBuilder::new(EventBuilderConfig::default());
        let t0 = make_ts(20200102, 10, 0, 0, 0);
        b.push(&tick(t0, 100.0, Some(1e-4), 5.0, 7.0));
        // Zero and null log returns pass through without labeling the pending event.
        assert!(b
            .push(&tick(make_ts(20200102, 10, 0, 0, 1), 100.0, Some(0.0), 5.0, 7.0))
            .is_none());
        assert!(b
            .push(&tick(make_ts(20200102, 10, 0, 0, 2), 100.0, None, 5.0, 7.0))
            .is_none());
        // The next real event labels the one from t0 with the full elapsed time.
        let ev = b
            .push(&tick(make_ts(20200102, 10, 0, 0, 9), 100.02, Some(2e-4), 5.0, 7.0))
            .unwrap();
        assert_eq!(ev.ts, t0);
        assert_eq!(ev.tau_ms, 9);
    }

    #[test]
    fn test_big_move_dropped() {
        let mut b = EventBuilder::new(EventBuilderConfig { threshold_next: 1.0 });
        b.push(&tick(make_ts(20200102, 10, 0, 0, 0), 100.0, Some(1e-4), 5.0, 7.0));
        // A $1.50 jump exceeds the threshold; the pending event dies.
        assert!(b
            .push(&tick(make_ts(20200102, 10, 0, 0, 5), 101.5, Some(1e-2), 5.0, 7.0))
            .is_none());
        assert_eq!(b.counters.events_dropped_bigmove, 1);
        // The jump tick itself became pending and labels normally afterwards.
        let ev = b
            .push(&tick(make_ts(20200102, 10, 0, 0, 9), 101.45, Some(-4e-4), 5.0, 7.0))
            .unwrap();
        assert_eq!(ev.mid, 101.5);
        assert_eq!(ev.y, -1);
    }

    #[test]
    fn test_day_boundary_discards_pending() {
        let mut b = EventBuilder::new(EventBuilderConfig::default());
        b.push(&tick(make_ts(20200102, 15, 59, 59, 0), 100.0, Some(1e-4), 5.0, 7.0));
        // New day: pending is dropped, not labeled by the new day's tick.
        assert!(b
            .push(&tick(make_ts(20200103, 9, 30, 0, 0), 100.5, Some(1e-4), 5.0, 7.0))
            .is_none());
        assert_eq!(b.counters.events_dropped_boundary, 1);
    }

    #[test]
    fn test_finish_drops_pending() {
        let mut b = EventBuilder::new(EventBuilderConfig::default());
        b.push(&tick(make_ts(20200102, 10, 0, 0, 0), 100.0, Some(1e-4), 5.0, 7.0));
        b.finish();
        assert_eq!(b.counters.events_dropped_boundary, 1);
    }

    #[test]
    fn test_last_move_sign_tracking() {
        let mut b = EventBuilder::new(EventBuilderConfig::default());
        b.push(&tick(make_ts(20200102, 10, 0, 0, 0), 100.0, Some(1e-4), 5.0, 7.0));
        let ev = b
            .push(&tick(make_ts(20200102, 10, 0, 0, 5), 99.98, Some(-2e-4), 5.0, 7.0))
            .unwrap();
        // First event of the day: last_move starts at 0.
        assert_eq!(ev.last_move, 0);
        let ev = b
            .push(&tick(make_ts(20200102, 10, 0, 0, 9), 99.99, Some(1e-4), 5.0, 7.0))
            .unwrap();
        // The second event saw the +1e-4 move that created the first event.
        assert_eq!(ev.last_move, 1);
    }

    #[test]
    fn test_quote_age_difference() {
        let mut b = EventBuilder::new(EventBuilderConfig::default());
        let mk = |msec: u32, bid: f64, ask: f64, lr: Option<f64>| Tick {
            ts: make_ts(20200102, 10, 0, 0, msec),
            mid: (bid + ask) / 2.0,
            log_return: lr,
            bid_size: 5.0,
            ask_size: 7.0,
            spread: ask - bid,
            bid,
            ask,
        };
        // t=0: both sides born. t=10: ask changes (ask age resets).
        b.push(&mk(0, 100.00, 100.02, None));
        b.push(&mk(10, 100.00, 100.04, Some(1e-4)));
        // The t=10 snapshot has bid age 10, ask age 0 -> age_diff = +10;
        // the t=25 event labels it.
        let ev = b.push(&mk(25, 100.00, 100.06, Some(1e-4))).unwrap();
        assert_eq!(ev.ts, make_ts(20200102, 10, 0, 0, 10));
        assert_eq!(ev.age_diff_ms, 10);
    }

    #[test]
    fn test_imbalance_zero_denominator() {
        let mut b = EventBuilder::new(EventBuilderConfig::default());
        b.push(&tick(make_ts(20200102, 10, 0, 0, 0), 100.0, Some(1e-4), 0.0, 0.0));
        let ev = b
            .push(&tick(make_ts(20200102, 10, 0, 0, 5), 100.02, Some(2e-4), 5.0, 7.0))
            .unwrap();
        assert_eq!(ev.imbalance, 0.0);
    }
}
