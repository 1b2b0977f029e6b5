//! Tick and Event Stores
//!
//! SQLite-backed columnar stores, one file per year:
//! `<prefix>_<year>.sqlite`. Appends are batched inside a single
//! transaction; reads stream in `ts` order. Column names follow the
//! interchange schemas so consumers can look fields up by name.
//!
//! Per-year writers are created lazily on first write and closed exactly
//! once in a deterministic end-of-stream pass. A write routed to a year
//! whose writer is already closed is a logic error, not a data error.

use crate::pipeline::aggregate::Tick;
use crate::pipeline::features::LabeledEvent;
use crate::pipeline::time::Ts;
use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default rows per insert transaction.
pub const DEFAULT_BATCH_ROWS: usize = 1_000_000;

const TICKS_SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS ticks (
    ts INTEGER NOT NULL,
    mid REAL NOT NULL,
    log_return REAL,
    bid_size REAL NOT NULL,
    ask_size REAL NOT NULL,
    spread REAL NOT NULL,
    bid REAL NOT NULL,
    ask REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ticks_ts ON ticks(ts);
"#;

const EVENTS_SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS events (
    ts INTEGER NOT NULL,
    date INTEGER NOT NULL,
    mid REAL NOT NULL,
    mid_next REAL NOT NULL,
    spread REAL NOT NULL,
    imbalance REAL NOT NULL,
    age_diff_ms REAL NOT NULL,
    last_move REAL NOT NULL,
    y REAL NOT NULL,
    tau_ms REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_ts ON events(ts);
"#;

/// Build the canonical partition path for a year.
pub fn partition_path(dir: &Path, prefix: &str, year: u16) -> PathBuf {
    dir.join(format!("{}_{}.sqlite", prefix, year))
}

/// List existing partitions under `dir` with the given prefix, sorted by year.
pub fn list_partitions(dir: &Path, prefix: &str) -> Result<Vec<(u16, PathBuf)>> {
    let mut out = Vec::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read partition directory {:?}", dir))?;
    for entry in entries {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(rest) = name
            .strip_prefix(prefix)
            .and_then(|r| r.strip_prefix('_'))
            .and_then(|r| r.strip_suffix(".sqlite"))
        else {
            continue;
        };
        if let Ok(year) = rest.parse::<u16>() {
            out.push((year, path));
        }
    }
    out.sort_by_key(|(year, _)| *year);
    Ok(out)
}

// =============================================================================
// TICK STORE
// =============================================================================

/// One per-year tick partition.
pub struct TickStore {
    conn: Connection,
    path: PathBuf,
}

impl TickStore {
    /// Create a fresh partition, replacing any existing file.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("failed to replace tick partition {:?}", path))?;
        }
        if let Some(parent) = path.parent() {
            if !parent.exists() && !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to create tick partition {:?}", path))?;
        conn.execute_batch(TICKS_SCHEMA)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open an existing partition read-only.
    pub fn open_readonly(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("failed to open tick partition {:?}", path))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// In-memory store for tests.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(TICKS_SCHEMA)?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a batch of ticks inside one transaction.
    pub fn append_batch(&mut self, ticks: &[Tick]) -> Result<()> {
        if ticks.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO ticks (ts, mid, log_return, bid_size, ask_size, spread, bid, ask)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for t in ticks {
                stmt.execute(params![
                    t.ts,
                    t.mid,
                    t.log_return,
                    t.bid_size,
                    t.ask_size,
                    t.spread,
                    t.bid,
                    t.ask,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Stream all ticks in `ts` order.
    pub fn for_each_tick(&self, mut f: impl FnMut(Tick) -> Result<()>) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "SELECT ts, mid, log_return, bid_size, ask_size, spread, bid, ask
             FROM ticks ORDER BY ts ASC, rowid ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Tick {
                ts: row.get(0)?,
                mid: row.get(1)?,
                log_return: row.get(2)?,
                bid_size: row.get(3)?,
                ask_size: row.get(4)?,
                spread: row.get(5)?,
                bid: row.get(6)?,
                ask: row.get(7)?,
            })
        })?;
        for row in rows {
            f(row?)?;
        }
        Ok(())
    }

    /// Load everything (tests and small partitions only).
    pub fn load_all(&self) -> Result<Vec<Tick>> {
        let mut out = Vec::new();
        self.for_each_tick(|t| {
            out.push(t);
            Ok(())
        })?;
        Ok(out)
    }

    pub fn row_count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM ticks", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn null_return_count(&self) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM ticks WHERE log_return IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn ts_range(&self) -> Result<Option<(Ts, Ts)>> {
        let (min, max): (Option<i64>, Option<i64>) = self.conn.query_row(
            "SELECT MIN(ts), MAX(ts) FROM ticks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(match (min, max) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        })
    }

    /// Content digest over `ts`-ordered rows; identical logical content
    /// yields an identical digest regardless of insertion order.
    pub fn fingerprint(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        self.for_each_tick(|t| {
            hasher.update(t.ts.to_le_bytes());
            hasher.update(t.mid.to_le_bytes());
            match t.log_return {
                Some(v) => {
                    hasher.update([1u8]);
                    hasher.update(v.to_le_bytes());
                }
                None => hasher.update([0u8; 9]),
            }
            hasher.update(t.bid_size.to_le_bytes());
            hasher.update(t.ask_size.to_le_bytes());
            hasher.update(t.spread.to_le_bytes());
            hasher.update(t.bid.to_le_bytes());
            hasher.update(t.ask.to_le_bytes());
            Ok(())
        })?;
        Ok(hex_digest(hasher))
    }
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        write!(out, "{:02x}", byte).expect("write to String");
    }
    out
}

// =============================================================================
// EVENT STORE
// =============================================================================

/// One per-year labeled-event partition.
pub struct EventStore {
    conn: Connection,
    path: PathBuf,
}

impl EventStore {
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("failed to replace event partition {:?}", path))?;
        }
        if let Some(parent) = path.parent() {
            if !parent.exists() && !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to create event partition {:?}", path))?;
        conn.execute_batch(EVENTS_SCHEMA)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open_readonly(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("failed to open event partition {:?}", path))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(EVENTS_SCHEMA)?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_batch(&mut self, events: &[LabeledEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO events (ts, date, mid, mid_next, spread, imbalance,
                                     age_diff_ms, last_move, y, tau_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for e in events {
                stmt.execute(params![
                    e.ts,
                    e.day,
                    e.mid,
                    e.mid_next,
                    e.spread,
                    e.imbalance,
                    e.age_diff_ms as f64,
                    e.last_move as f64,
                    e.y as f64,
                    e.tau_ms as f64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Stream all events in `ts` order.
    pub fn for_each_event(&self, mut f: impl FnMut(LabeledEvent) -> Result<()>) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "SELECT ts, date, mid, mid_next, spread, imbalance, age_diff_ms, last_move, y, tau_ms
             FROM events ORDER BY ts ASC, rowid ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(LabeledEvent {
                ts: row.get(0)?,
                day: row.get::<_, i64>(1)? as u32,
                mid: row.get(2)?,
                mid_next: row.get(3)?,
                spread: row.get(4)?,
                imbalance: row.get(5)?,
                age_diff_ms: row.get::<_, f64>(6)? as i64,
                last_move: row.get::<_, f64>(7)? as i8,
                y: row.get::<_, f64>(8)? as i8,
                tau_ms: row.get::<_, f64>(9)? as i64,
            })
        })?;
        for row in rows {
            f(row?)?;
        }
        Ok(())
    }

    pub fn load_all(&self) -> Result<Vec<LabeledEvent>> {
        let mut out = Vec::new();
        self.for_each_event(|e| {
            out.push(e);
            Ok(())
        })?;
        Ok(out)
    }

    pub fn row_count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

// =============================================================================
// PER-YEAR WRITER MAP
// =============================================================================

/// Lazily opened per-year tick writers, shared across shard workers.
///
/// A single input shard can span a year boundary, and several shards can
/// target the same year, so appends are serialized through one lock.
/// Contention is low: workers flush in large batches.
pub struct YearTickWriters {
    dir: PathBuf,
    prefix: String,
    inner: Mutex<WriterMap>,
}

#[derive(Default)]
struct WriterMap {
    open: HashMap<u16, TickStore>,
    closed: HashSet<u16>,
}

impl YearTickWriters {
    pub fn new(dir: &Path, prefix: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            inner: Mutex::new(WriterMap::default()),
        }
    }

    /// Append a batch into a year partition, opening the writer on first use.
    pub fn append(&self, year: u16, ticks: &[Tick]) -> Result<()> {
        if ticks.is_empty() {
            return Ok(());
        }
        let mut map = self.inner.lock();
        if map.closed.contains(&year) {
            bail!(
                "tick writer for year {} already closed; write after end-of-stream",
                year
            );
        }
        if !map.open.contains_key(&year) {
            let path = partition_path(&self.dir, &self.prefix, year);
            debug!(year = year, path = ?path, "opening tick partition");
            map.open.insert(year, TickStore::create(&path)?);
        }
        map.open
            .get_mut(&year)
            .expect("writer just inserted")
            .append_batch(ticks)
    }

    /// Close every writer exactly once; returns per-year row counts.
    pub fn close_all(&self) -> Result<Vec<(u16, u64)>> {
        let mut map = self.inner.lock();
        let mut summary = Vec::new();
        let mut years: Vec<u16> = map.open.keys().copied().collect();
        years.sort_unstable();
        for year in years {
            let store = map.open.remove(&year).expect("key from keys()");
            let rows = store.row_count()?;
            info!(year = year, rows = rows, "closed tick partition");
            map.closed.insert(year);
            summary.push((year, rows));
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::time::make_ts;
    use tempfile::TempDir;

    fn make_tick(ts: Ts, mid: f64, lr: Option<f64>) -> Tick {
        Tick {
            ts,
            mid,
            log_return: lr,
            bid_size: 5.0,
            ask_size: 7.0,
            spread: 0.02,
            bid: mid - 0.01,
            ask: mid + 0.01,
        }
    }

    fn make_event(ts: Ts, day: u32) -> LabeledEvent {
        LabeledEvent {
            ts,
            day,
            mid: 100.0,
            mid_next: 100.05,
            spread: 0.02,
            imbalance: -0.2,
            age_diff_ms: 40,
            last_move: 1,
            y: 1,
            tau_ms: 7,
        }
    }

    #[test]
    fn test_tick_store_roundtrip() {
        let mut store = TickStore::open_memory().unwrap();
        let t0 = make_tick(make_ts(20200102, 9, 30, 0, 0), 100.0, None);
        let t1 = make_tick(make_ts(20200102, 9, 30, 0, 5), 100.05, Some(5e-4));
        store.append_batch(&[t0, t1]).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded, vec![t0, t1]);
        assert_eq!(store.row_count().unwrap(), 2);
        assert_eq!(store.null_return_count().unwrap(), 1);
        assert_eq!(store.ts_range().unwrap(), Some((t0.ts, t1.ts)));
    }

    #[test]
    fn test_event_store_roundtrip() {
        let mut store = EventStore::open_memory().unwrap();
        let e = make_event(make_ts(20200102, 10, 0, 0, 0), 20200102);
        store.append_batch(&[e]).unwrap();
        let loaded = store.load_all().unwrap();
        assert_eq!(loaded, vec![e]);
    }

    #[test]
    fn test_fingerprint_ignores_insertion_order() {
        let t0 = make_tick(make_ts(20200102, 9, 30, 0, 0), 100.0, None);
        let t1 = make_tick(make_ts(20200102, 9, 30, 0, 5), 100.05, Some(5e-4));

        let mut a = TickStore::open_memory().unwrap();
        a.append_batch(&[t0, t1]).unwrap();
        let mut b = TickStore::open_memory().unwrap();
        b.append_batch(&[t1]).unwrap();
        b.append_batch(&[t0]).unwrap();

        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn test_fingerprint_distinguishes_content() {
        let t0 = make_tick(make_ts(20200102, 9, 30, 0, 0), 100.0, None);
        let mut a = TickStore::open_memory().unwrap();
        a.append_batch(&[t0]).unwrap();
        let mut b = TickStore::open_memory().unwrap();
        b.append_batch(&[make_tick(t0.ts, 100.01, None)]).unwrap();
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn test_year_writers_partitioning() {
        let dir = TempDir::new().unwrap();
        let writers = YearTickWriters::new(dir.path(), "ticks_raw");
        writers
            .append(2020, &[make_tick(make_ts(20201231, 10, 0, 0, 0), 100.0, None)])
            .unwrap();
        writers
            .append(2021, &[make_tick(make_ts(20210104, 10, 0, 0, 0), 101.0, None)])
            .unwrap();
        let summary = writers.close_all().unwrap();
        assert_eq!(summary, vec![(2020, 1), (2021, 1)]);

        let parts = list_partitions(dir.path(), "ticks_raw").unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].0, 2020);
        assert_eq!(parts[1].0, 2021);
    }

    #[test]
    fn test_write_after_close_is_fatal() {
        let dir = TempDir::new().unwrap();
        let writers = YearTickWriters::new(dir.path(), "ticks_raw");
        writers
            .append(2020, &[make_tick(make_ts(20200102, 10, 0, 0, 0), 100.0, None)])
            .unwrap();
        writers.close_all().unwrap();
        let err = writers
            .append(2020, &[make_tick(make_ts(20200102, 10, 0, 0, 1), 100.0, None)])
            .unwrap_err();
        assert!(err.to_string().contains("already closed"));
    }

    #[test]
    fn test_list_partitions_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("ticks_raw_abcd.sqlite"), "x").unwrap();
        let writers = YearTickWriters::new(dir.path(), "ticks_raw");
        writers
            .append(2020, &[make_tick(make_ts(20200102, 10, 0, 0, 0), 100.0, None)])
            .unwrap();
        writers.close_all().unwrap();
        let parts = list_partitions(dir.path(), "ticks_raw").unwrap();
        assert_eq!(parts.len(), 1);
    }
}
