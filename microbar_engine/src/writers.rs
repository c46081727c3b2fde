/// writers.rs — Run-directory persistence: ordered CSV streams + JSON docs.
///
/// Every output stream is an append-only, header-first CSV with a fixed
/// column order, flushed after each row so a crash loses at most the row
/// being written. A failed append is logged and dropped; rows already on
/// disk are never touched.
///
/// `BackgroundBarWriter` is the non-blocking variant for the bar stream:
/// rows go through a bounded queue to a dedicated thread that batches by
/// size-or-time and fsyncs after every flush. When the queue is full the
/// oldest pending row is dropped with a warning, never silently.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, warn};

use crate::error::PersistenceError;
use crate::types::{Bar, Side};

// ── Line-buffered CSV appender ────────────────────────────────────────────

pub struct CsvAppender {
    path: PathBuf,
    file: File,
}

impl CsvAppender {
    /// Open (or create) the file and make sure the header is the first line.
    pub fn open(path: PathBuf, header: &str) -> Result<Self, PersistenceError> {
        let is_new = !path.exists() || std::fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        let mut file = OpenOptions::new().append(true).create(true).open(&path)?;
        if is_new {
            file.write_all(header.as_bytes())?;
            file.write_all(b"\n")?;
            file.flush()?;
        }
        Ok(Self { path, file })
    }

    /// Append one row (no trailing newline in `row`) and flush.
    pub fn append(&mut self, row: &str) -> Result<(), PersistenceError> {
        self.file.write_all(row.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ── Typed row streams of a run directory ─────────────────────────────────

pub const DATA_HEADER: &str =
    "timestamp,open,high,low,close,volume,trade_count,dollar_value,start_time,end_time,duration_ms";
pub const EQUITY_HEADER: &str = "timestamp,symbol,close,pos_qty,cash_usdt,equity_usdt";
pub const TRADES_HEADER: &str = "timestamp,side,price,qty,cash,equity,reason";
pub const DECISIONS_HEADER: &str = "timestamp,action,reason,qty,price";
pub const RETURNS_HEADER: &str = "timestamp,equity,return_pct,cumulative_return_pct";

pub struct RunWriters {
    run_dir: PathBuf,
    data: CsvAppender,
    equity: CsvAppender,
    trades: CsvAppender,
    decisions: CsvAppender,
}

impl RunWriters {
    pub fn create(run_dir: &Path) -> Result<Self, PersistenceError> {
        std::fs::create_dir_all(run_dir)?;
        Ok(Self {
            run_dir: run_dir.to_owned(),
            data: CsvAppender::open(run_dir.join("data.csv"), DATA_HEADER)?,
            equity: CsvAppender::open(run_dir.join("equity.csv"), EQUITY_HEADER)?,
            trades: CsvAppender::open(run_dir.join("trades.csv"), TRADES_HEADER)?,
            decisions: CsvAppender::open(run_dir.join("decisions.csv"), DECISIONS_HEADER)?,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn append_bar(&mut self, bar: &Bar) {
        let row = format!(
            "{},{},{},{},{},{},{},{},{},{},{}",
            bar.end_time,
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume,
            bar.trade_count,
            bar.dollar_value,
            bar.start_time,
            bar.end_time,
            bar.duration_ms()
        );
        Self::log_on_error("data.csv", self.data.append(&row));
    }

    pub fn append_equity(
        &mut self,
        ts: i64,
        symbol: &str,
        close: f64,
        pos_qty: f64,
        cash: f64,
        equity: f64,
    ) {
        let row = format!("{ts},{symbol},{close},{pos_qty},{cash},{equity}");
        Self::log_on_error("equity.csv", self.equity.append(&row));
    }

    #[allow(clippy::too_many_arguments)]
    pub fn append_trade(
        &mut self,
        ts: i64,
        side: Side,
        price: f64,
        qty: f64,
        cash: f64,
        equity: f64,
        reason: &str,
    ) {
        let row = format!("{ts},{},{price},{qty},{cash},{equity},{reason}", side.as_str());
        Self::log_on_error("trades.csv", self.trades.append(&row));
    }

    pub fn append_decision(&mut self, ts: i64, action: &str, reason: &str, qty: f64, price: f64) {
        let row = format!("{ts},{action},{reason},{qty},{price}");
        Self::log_on_error("decisions.csv", self.decisions.append(&row));
    }

    /// Derive returns.csv from the recorded equity series.
    pub fn write_returns(&self, rows: &[(i64, f64)]) -> Result<(), PersistenceError> {
        let mut appender =
            CsvAppender::open(self.run_dir.join("returns.csv"), RETURNS_HEADER)?;
        let mut cumulative = 0.0f64;
        for (i, (ts, equity)) in rows.iter().enumerate() {
            let return_pct = if i == 0 {
                0.0
            } else {
                let prev = rows[i - 1].1;
                if prev > 0.0 { (equity - prev) / prev * 100.0 } else { 0.0 }
            };
            if i > 0 {
                cumulative += return_pct;
            }
            appender.append(&format!("{ts},{equity:.2},{return_pct:.4},{cumulative:.4}"))?;
        }
        Ok(())
    }

    fn log_on_error(stream: &str, res: Result<(), PersistenceError>) {
        if let Err(e) = res {
            warn!("{stream}: row dropped: {e}");
        }
    }
}

// ── Background bar writer ────────────────────────────────────────────────

pub const BARS_SESSION_HEADER: &str = "t_open,t_close,open,high,low,close,volume,dollar_value,\
trade_count,duration_ms,gap_ms,target,overshoot,overshoot_pct";

#[derive(Debug, Clone)]
pub struct BarWriterConfig {
    pub queue_capacity: usize,
    pub flush_every_n: usize,
    pub flush_every_secs: f64,
}

impl Default for BarWriterConfig {
    fn default() -> Self {
        Self { queue_capacity: 100_000, flush_every_n: 500, flush_every_secs: 2.0 }
    }
}

struct BarQueue {
    rows: VecDeque<String>,
    stopped: bool,
    dropped: u64,
}

/// Non-blocking writer for the extended bar stream (`bars.csv`): threshold
/// diagnostics per closing rule plus inter-bar gap, durable via fsync.
pub struct BackgroundBarWriter {
    state: Arc<(Mutex<BarQueue>, Condvar)>,
    thread: Option<JoinHandle<()>>,
    capacity: usize,
    rule: String,
    limit: f64,
    prev_end_ms: Option<i64>,
}

impl BackgroundBarWriter {
    pub fn start(
        path: PathBuf,
        rule: &str,
        limit: f64,
        cfg: BarWriterConfig,
    ) -> Result<Self, PersistenceError> {
        let mut file = OpenOptions::new().append(true).create(true).open(&path)?;
        if std::fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true) {
            file.write_all(BARS_SESSION_HEADER.as_bytes())?;
            file.write_all(b"\n")?;
        }

        let state = Arc::new((
            Mutex::new(BarQueue { rows: VecDeque::new(), stopped: false, dropped: 0 }),
            Condvar::new(),
        ));
        let thread_state = Arc::clone(&state);
        let flush_period = Duration::from_secs_f64(cfg.flush_every_secs.max(0.01));
        let flush_every_n = cfg.flush_every_n.max(1);

        let thread = std::thread::Builder::new()
            .name("bar-writer".into())
            .spawn(move || {
                let (lock, cvar) = &*thread_state;
                let wait_slice = flush_period.min(Duration::from_millis(200));
                let mut batch: Vec<String> = Vec::new();
                let mut last_flush = Instant::now();
                loop {
                    // Rows stay queued until a flush is due (size-or-time)
                    // or the writer is closing; only then are they drained.
                    let stopping = {
                        let mut q = lock.lock().expect("bar queue poisoned");
                        loop {
                            if q.stopped {
                                break;
                            }
                            let due = !q.rows.is_empty()
                                && (q.rows.len() >= flush_every_n
                                    || last_flush.elapsed() >= flush_period);
                            if due {
                                break;
                            }
                            let (guard, _timeout) = cvar
                                .wait_timeout(q, wait_slice)
                                .expect("bar queue poisoned");
                            q = guard;
                        }
                        batch.extend(q.rows.drain(..));
                        q.stopped
                    };

                    if !batch.is_empty() {
                        for row in batch.drain(..) {
                            if let Err(e) = file
                                .write_all(row.as_bytes())
                                .and_then(|_| file.write_all(b"\n"))
                            {
                                error!("bars.csv: write failed: {e}");
                            }
                        }
                        if let Err(e) = file.flush().and_then(|_| file.sync_data()) {
                            error!("bars.csv: fsync failed: {e}");
                        }
                        last_flush = Instant::now();
                    }
                    if stopping {
                        break;
                    }
                }
            })
            .map_err(std::io::Error::from)?;

        Ok(Self {
            state,
            thread: Some(thread),
            capacity: cfg.queue_capacity.max(1),
            rule: rule.to_owned(),
            limit,
            prev_end_ms: None,
        })
    }

    /// Enqueue a closed bar; returns immediately.
    pub fn write(&mut self, bar: &Bar) {
        let gap_ms = self.prev_end_ms.map(|prev| bar.start_time - prev);
        self.prev_end_ms = Some(bar.end_time);

        let (target, achieved) = match self.rule.as_str() {
            "volume_qty" => (Some(self.limit), Some(bar.volume)),
            "dollar" => (Some(self.limit), Some(bar.dollar_value)),
            "tick_count" => (Some(self.limit), Some(bar.trade_count as f64)),
            _ => (None, None),
        };
        let overshoot = match (target, achieved) {
            (Some(t), Some(a)) => Some(a - t),
            _ => None,
        };
        let overshoot_pct = match (overshoot, target) {
            (Some(o), Some(t)) if t != 0.0 => Some(o / t),
            _ => None,
        };

        let fmt_opt = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
        let fmt_opt_i = |v: Option<i64>| v.map(|x| x.to_string()).unwrap_or_default();
        let row = format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            bar.start_time,
            bar.end_time,
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume,
            bar.dollar_value,
            bar.trade_count,
            bar.duration_ms(),
            fmt_opt_i(gap_ms),
            fmt_opt(target),
            fmt_opt(overshoot),
            fmt_opt(overshoot_pct),
        );

        let (lock, cvar) = &*self.state;
        let mut q = lock.lock().expect("bar queue poisoned");
        if q.rows.len() >= self.capacity {
            q.rows.pop_front();
            q.dropped += 1;
            warn!(dropped = q.dropped, "bar writer queue full, oldest row dropped");
        }
        q.rows.push_back(row);
        cvar.notify_one();
    }

    /// Stop the thread, draining and flushing everything pending.
    pub fn close(&mut self) {
        {
            let (lock, cvar) = &*self.state;
            if let Ok(mut q) = lock.lock() {
                q.stopped = true;
            }
            cvar.notify_one();
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BackgroundBarWriter {
    fn drop(&mut self) {
        self.close();
    }
}

// ── JSON documents ────────────────────────────────────────────────────────

/// Configuration snapshot written at session start.
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub run_id: String,
    pub started_ts: f64,
    pub symbol: String,
    pub testnet: bool,
    pub duration_s: Option<u64>,
    pub cash: f64,
    pub fees_bps: f64,
    /// None means dynamic slippage from the spread tracker.
    pub slip_bps: Option<f64>,
    pub rule: String,
    pub limit: f64,
    pub strategy: Option<String>,
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub bars_processed: u64,
    pub duration_sec: f64,
    pub bars_per_sec: f64,
}

/// Final session summary (summary.json).
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub trades_processed: u64,
    pub bars_emitted: u64,
    pub orders_executed: u64,
    pub orders_buy: u64,
    pub orders_sell: u64,
    pub starting_cash: f64,
    pub final_equity: f64,
    pub pnl: f64,
    pub return_pct: f64,
    pub duration_s: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown_pct: f64,
    pub profit_factor: f64,
    pub win_rate_pct: f64,
    pub num_winning_trades: usize,
    pub num_losing_trades: usize,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub avg_trade: f64,
}

pub fn write_json<T: Serialize>(
    run_dir: &Path,
    name: &str,
    value: &T,
) -> Result<(), PersistenceError> {
    let file = File::create(run_dir.join(name))?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

/// Round half away from zero at `digits` decimals, for report fields.
pub fn round_to(x: f64, digits: u32) -> f64 {
    if !x.is_finite() {
        return x;
    }
    let factor = 10f64.powi(digits as i32);
    (x * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, close: f64, volume: f64, start: i64, end: i64) -> Bar {
        Bar {
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume,
            dollar_value: close * volume,
            trade_count: 3,
            start_time: start,
            end_time: end,
        }
    }

    #[test]
    fn appender_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        {
            let mut a = CsvAppender::open(path.clone(), "a,b").unwrap();
            a.append("1,2").unwrap();
        }
        {
            let mut a = CsvAppender::open(path.clone(), "a,b").unwrap();
            a.append("3,4").unwrap();
        }
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "a,b\n1,2\n3,4\n");
    }

    #[test]
    fn run_writers_fixed_schemas() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = RunWriters::create(dir.path()).unwrap();
        w.append_bar(&bar(100.0, 101.0, 2.0, 1_000, 2_000));
        w.append_equity(2_000, "BTCUSDT", 101.0, 0.5, 500.0, 550.5);
        w.append_trade(2_000, Side::Buy, 101.0, 0.5, 500.0, 550.5, "entry");
        w.append_decision(2_000, "BUY", "entry", 0.5, 101.0);

        let data = std::fs::read_to_string(dir.path().join("data.csv")).unwrap();
        assert!(data.starts_with(DATA_HEADER));
        assert!(data.contains("2000,100,101,100,101,2,3,202,1000,2000,1000"));

        let trades = std::fs::read_to_string(dir.path().join("trades.csv")).unwrap();
        assert!(trades.contains("2000,BUY,101,0.5,500,550.5,entry"));
    }

    #[test]
    fn returns_csv_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let w = RunWriters::create(dir.path()).unwrap();
        w.write_returns(&[(1, 100.0), (2, 110.0), (3, 99.0)]).unwrap();
        let text = std::fs::read_to_string(dir.path().join("returns.csv")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], RETURNS_HEADER);
        assert_eq!(lines[1], "1,100.00,0.0000,0.0000");
        assert_eq!(lines[2], "2,110.00,10.0000,10.0000");
        assert!(lines[3].starts_with("3,99.00,-10.0000,"));
    }

    #[test]
    fn background_writer_flushes_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bars.csv");
        let mut w = BackgroundBarWriter::start(
            path.clone(),
            "volume_qty",
            5.0,
            BarWriterConfig { queue_capacity: 10, flush_every_n: 100, flush_every_secs: 60.0 },
        )
        .unwrap();
        w.write(&bar(100.0, 101.0, 5.5, 1_000, 2_000));
        w.write(&bar(101.0, 102.0, 6.0, 2_500, 3_000));
        w.close();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], BARS_SESSION_HEADER);
        // overshoot = 5.5 − 5.0; second bar has a 500 ms gap
        assert!(lines[1].contains(",0.5,"));
        assert!(lines[2].contains(",500,"));
    }

    #[test]
    fn background_writer_drops_oldest_on_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bars.csv");
        let mut w = BackgroundBarWriter::start(
            path.clone(),
            "tick_count",
            1.0,
            // Huge flush period so rows pile up in the queue.
            BarWriterConfig { queue_capacity: 2, flush_every_n: 1_000, flush_every_secs: 120.0 },
        )
        .unwrap();
        for i in 0..5 {
            w.write(&bar(100.0 + i as f64, 100.0 + i as f64, 1.0, i, i + 1));
        }
        w.close();
        let text = std::fs::read_to_string(&path).unwrap();
        // capacity 2: at most the 2 newest rows survive (plus header)
        assert!(text.lines().count() <= 3);
    }

    #[test]
    fn rounding_helper() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(1.2355, 3), 1.236);
        assert!(round_to(f64::INFINITY, 2).is_infinite());
    }
}
