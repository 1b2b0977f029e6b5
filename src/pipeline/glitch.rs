//! Glitch Accounting
//!
//! Recoverable data errors are counted here and never become `Err`: a raw
//! quote that fails to parse, carries non-positive fields, or arrives
//! locked/crossed is dropped and tallied by `(category, hour-of-day)`.
//! Workers keep a private `GlitchCounts` and merge it into the shared one
//! exactly once at end of shard; there is no per-quote locking.

use std::fmt::Write as _;

/// Categories of recoverable data errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlitchCategory {
    /// Line failed to tokenize or a field failed to parse.
    ParseFail,
    /// A size field was non-finite or not strictly positive.
    NonposField,
    /// A price field was non-finite or not strictly positive.
    NonposPrice,
    /// `ask <= bid` after parsing.
    LockedCrossed,
}

impl GlitchCategory {
    pub const ALL: [GlitchCategory; 4] = [
        GlitchCategory::ParseFail,
        GlitchCategory::NonposField,
        GlitchCategory::NonposPrice,
        GlitchCategory::LockedCrossed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            GlitchCategory::ParseFail => "parse_fail",
            GlitchCategory::NonposField => "nonpos_field",
            GlitchCategory::NonposPrice => "nonpos_price",
            GlitchCategory::LockedCrossed => "locked_crossed",
        }
    }

    #[inline]
    fn index(&self) -> usize {
        match self {
            GlitchCategory::ParseFail => 0,
            GlitchCategory::NonposField => 1,
            GlitchCategory::NonposPrice => 2,
            GlitchCategory::LockedCrossed => 3,
        }
    }
}

/// Per-(category, hour) counters. Hours outside 0..24 are clamped into the
/// last bucket so a corrupt time field can never index out of range.
#[derive(Debug, Clone, Default)]
pub struct GlitchCounts {
    counts: [[u64; 24]; 4],
}

impl GlitchCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one glitch at the given hour-of-day.
    #[inline]
    pub fn record(&mut self, category: GlitchCategory, hour: u8) {
        let h = (hour as usize).min(23);
        self.counts[category.index()][h] += 1;
    }

    /// Fold another counter set into this one (worker-end merge).
    pub fn merge(&mut self, other: &GlitchCounts) {
        for (dst, src) in self.counts.iter_mut().zip(other.counts.iter()) {
            for (d, s) in dst.iter_mut().zip(src.iter()) {
                *d += *s;
            }
        }
    }

    /// Total count for one category across all hours.
    pub fn total(&self, category: GlitchCategory) -> u64 {
        self.counts[category.index()].iter().sum()
    }

    /// Total across all categories.
    pub fn grand_total(&self) -> u64 {
        GlitchCategory::ALL.iter().map(|c| self.total(*c)).sum()
    }

    /// Count for one category in one hour bucket.
    pub fn at(&self, category: GlitchCategory, hour: u8) -> u64 {
        self.counts[category.index()][(hour as usize).min(23)]
    }

    /// Human-readable report: totals first, then per-hour counts for the
    /// regular session hours (09..=15).
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        writeln!(out, "=== Glitch Report ===").unwrap();
        writeln!(out, "total: {}", self.grand_total()).unwrap();
        for cat in GlitchCategory::ALL {
            writeln!(out, "  {:<15} {}", cat.name(), self.total(cat)).unwrap();
        }
        writeln!(out).unwrap();
        writeln!(out, "per-hour (09-15):").unwrap();
        for cat in GlitchCategory::ALL {
            write!(out, "  {:<15}", cat.name()).unwrap();
            for hour in 9u8..=15 {
                write!(out, " {:>2}h={}", hour, self.at(cat, hour)).unwrap();
            }
            writeln!(out).unwrap();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_totals() {
        let mut g = GlitchCounts::new();
        g.record(GlitchCategory::ParseFail, 9);
        g.record(GlitchCategory::ParseFail, 9);
        g.record(GlitchCategory::LockedCrossed, 15);
        assert_eq!(g.total(GlitchCategory::ParseFail), 2);
        assert_eq!(g.total(GlitchCategory::LockedCrossed), 1);
        assert_eq!(g.grand_total(), 3);
        assert_eq!(g.at(GlitchCategory::ParseFail, 9), 2);
        assert_eq!(g.at(GlitchCategory::ParseFail, 10), 0);
    }

    #[test]
    fn test_merge() {
        let mut a = GlitchCounts::new();
        let mut b = GlitchCounts::new();
        a.record(GlitchCategory::NonposField, 10);
        b.record(GlitchCategory::NonposField, 10);
        b.record(GlitchCategory::NonposPrice, 11);
        a.merge(&b);
        assert_eq!(a.at(GlitchCategory::NonposField, 10), 2);
        assert_eq!(a.total(GlitchCategory::NonposPrice), 1);
    }

    #[test]
    fn test_out_of_range_hour_clamped() {
        let mut g = GlitchCounts::new();
        g.record(GlitchCategory::ParseFail, 99);
        assert_eq!(g.at(GlitchCategory::ParseFail, 23), 1);
    }

    #[test]
    fn test_report_shape() {
        let mut g = GlitchCounts::new();
        g.record(GlitchCategory::LockedCrossed, 12);
        let report = g.render_report();
        assert!(report.contains("total: 1"));
        assert!(report.contains("locked_crossed"));
        assert!(report.contains("12h=1"));
    }
}
