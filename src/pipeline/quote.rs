//! Raw Quote Parsing and Filtering
//!
//! Input files are gzip-compressed CSV with at least 9 fields per line:
//! `date,time,venue,bid,bid_size,ask,ask_size,quote_condition,...` (trailing
//! fields ignored, header row discarded). Parsing is hot-path code: lines are
//! tokenized by splitting on `,` and numeric fields go through `fast_float`.
//!
//! Filtering happens before aggregation. Session/venue/condition rejects are
//! expected and dropped silently; malformed or non-positive data feeds the
//! glitch counters.

use crate::pipeline::glitch::GlitchCategory;
use crate::pipeline::time::{make_ts, SessionWindow, Ts};

/// One raw Level-1 quote, already timestamp-encoded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawQuote {
    pub ts: Ts,
    /// Single-byte venue tag.
    pub venue: u8,
    pub bid: f64,
    pub bid_size: f64,
    pub ask: f64,
    pub ask_size: f64,
    /// Single-byte quote condition.
    pub condition: u8,
}

/// Why a line or quote was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reject {
    /// Counted in the glitch report.
    Glitch(GlitchCategory),
    /// Expected filtering, dropped silently.
    OutOfSession,
    BadVenue,
    BadCondition,
}

/// Recoverable parse failure for a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseFail {
    /// Hour-of-day if the time field was readable, for glitch bucketing.
    pub hour: u8,
}

/// Parse one CSV line into a `RawQuote`.
///
/// At least 9 comma-separated fields are required; trailing fields beyond the
/// quote condition are ignored. Numeric fields must parse; positivity and
/// crossing are checked by [`QuoteFilter::check`], not here, so they can be
/// bucketed separately.
pub fn parse_quote_line(line: &str) -> Result<RawQuote, ParseFail> {
    let mut fields = line.split(',');

    let date_f = fields.next().unwrap_or("");
    let time_f = fields.next().unwrap_or("");
    let venue_f = fields.next().unwrap_or("");
    let bid_f = fields.next().unwrap_or("");
    let bid_size_f = fields.next().unwrap_or("");
    let ask_f = fields.next().unwrap_or("");
    let ask_size_f = fields.next().unwrap_or("");
    let cond_f = fields.next().unwrap_or("");

    // Require the trailing-field minimum even though we ignore the content.
    if fields.next().is_none() {
        return Err(ParseFail {
            hour: parse_hour(time_f).unwrap_or(0),
        });
    }

    let hour = parse_hour(time_f).unwrap_or(0);
    let fail = ParseFail { hour };

    let date: u32 = date_f.parse().map_err(|_| fail)?;
    let (hh, mm, ss, millis) = parse_time_of_day(time_f).ok_or(fail)?;
    let venue = single_byte(venue_f).ok_or(fail)?;
    let condition = single_byte(cond_f).ok_or(fail)?;

    let bid: f64 = fast_float::parse(bid_f).map_err(|_| fail)?;
    let bid_size: f64 = fast_float::parse(bid_size_f).map_err(|_| fail)?;
    let ask: f64 = fast_float::parse(ask_f).map_err(|_| fail)?;
    let ask_size: f64 = fast_float::parse(ask_size_f).map_err(|_| fail)?;

    Ok(RawQuote {
        ts: make_ts(date, hh, mm, ss, millis),
        venue,
        bid,
        bid_size,
        ask,
        ask_size,
        condition,
    })
}

fn single_byte(s: &str) -> Option<u8> {
    let b = s.as_bytes();
    if b.len() == 1 {
        Some(b[0])
    } else {
        None
    }
}

/// `HH:MM:SS.mmm`
fn parse_time_of_day(s: &str) -> Option<(u32, u32, u32, u32)> {
    let b = s.as_bytes();
    if b.len() != 12 || b[2] != b':' || b[5] != b':' || b[8] != b'.' {
        return None;
    }
    let hh = two_digits(b[0], b[1])?;
    let mm = two_digits(b[3], b[4])?;
    let ss = two_digits(b[6], b[7])?;
    let millis = three_digits(b[9], b[10], b[11])?;
    if hh >= 24 || mm >= 60 || ss >= 60 {
        return None;
    }
    Some((hh, mm, ss, millis))
}

fn parse_hour(s: &str) -> Option<u8> {
    let b = s.as_bytes();
    if b.len() >= 2 {
        two_digits(b[0], b[1]).map(|h| h.min(23) as u8)
    } else {
        None
    }
}

#[inline]
fn digit(b: u8) -> Option<u32> {
    if b.is_ascii_digit() {
        Some((b - b'0') as u32)
    } else {
        None
    }
}

#[inline]
fn two_digits(a: u8, b: u8) -> Option<u32> {
    Some(digit(a)? * 10 + digit(b)?)
}

#[inline]
fn three_digits(a: u8, b: u8, c: u8) -> Option<u32> {
    Some(digit(a)? * 100 + digit(b)? * 10 + digit(c)?)
}

/// Allow-set of single-byte venue tags.
#[derive(Clone)]
pub struct VenueSet {
    allowed: [bool; 256],
}

impl VenueSet {
    /// Default venue allow-set.
    pub const DEFAULT_VENUES: &'static [u8] = b"PTQZYJK";

    pub fn from_bytes(venues: &[u8]) -> Self {
        let mut allowed = [false; 256];
        for &v in venues {
            allowed[v as usize] = true;
        }
        Self { allowed }
    }

    #[inline]
    pub fn contains(&self, venue: u8) -> bool {
        self.allowed[venue as usize]
    }
}

impl Default for VenueSet {
    fn default() -> Self {
        Self::from_bytes(Self::DEFAULT_VENUES)
    }
}

impl std::fmt::Debug for VenueSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let venues: String = (0u8..=255)
            .filter(|v| self.allowed[*v as usize])
            .map(|v| v as char)
            .collect();
        write!(f, "VenueSet({})", venues)
    }
}

/// Pre-aggregation quote filter.
#[derive(Debug, Clone)]
pub struct QuoteFilter {
    pub session: SessionWindow,
    pub venues: VenueSet,
    /// Required quote-condition byte.
    pub condition: u8,
}

impl Default for QuoteFilter {
    fn default() -> Self {
        Self {
            session: SessionWindow::REGULAR,
            venues: VenueSet::default(),
            condition: b'R',
        }
    }
}

impl QuoteFilter {
    /// Apply the full filter chain to a parsed quote.
    pub fn check(&self, q: &RawQuote) -> Result<(), Reject> {
        if !self.session.contains(q.ts) {
            return Err(Reject::OutOfSession);
        }
        if q.condition != self.condition {
            return Err(Reject::BadCondition);
        }
        if !self.venues.contains(q.venue) {
            return Err(Reject::BadVenue);
        }
        if !positive_finite(q.bid) || !positive_finite(q.ask) {
            return Err(Reject::Glitch(GlitchCategory::NonposPrice));
        }
        if !positive_finite(q.bid_size) || !positive_finite(q.ask_size) {
            return Err(Reject::Glitch(GlitchCategory::NonposField));
        }
        if q.ask <= q.bid {
            return Err(Reject::Glitch(GlitchCategory::LockedCrossed));
        }
        Ok(())
    }
}

#[inline]
fn positive_finite(v: f64) -> bool {
    v.is_finite() && v > 0.0
}
