/// bars/time_agg.rs — Wall-clock bar aggregation for the dashboard charts.
///
/// Independent of the micro-bar builders: bins trades into fixed intervals
/// {1s, 5s, 10s, 30s, 1m, 5m, 1h} and appends each completed interval to
/// `chart_<tf>.csv` in the run directory. A bar is created or extended only
/// when a trade occurs; empty intervals are skipped unless `gap_fill` is
/// enabled, in which case a flat zero-volume bar at the last known close is
/// written for each gap interval.
///
/// Chart files are best-effort output: a failed write is logged once per
/// flush and never interrupts the trading loop.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

const TIMEFRAMES: &[(&str, i64)] = &[
    ("1s", 1),
    ("5s", 5),
    ("10s", 10),
    ("30s", 30),
    ("1m", 60),
    ("5m", 300),
    ("1h", 3600),
];

const HEADER: &str = "timestamp,open,high,low,close,volume,dollar_value\n";

#[derive(Debug, Clone, Copy)]
struct TimeBar {
    ts_start: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    dollar_value: f64,
}

#[derive(Debug)]
pub struct TimeBarAggregator {
    run_dir: PathBuf,
    gap_fill: bool,
    current: Vec<Option<TimeBar>>,
    last_price: f64,
}

impl TimeBarAggregator {
    pub fn new(run_dir: &Path, gap_fill: bool) -> Self {
        let agg = Self {
            run_dir: run_dir.to_owned(),
            gap_fill,
            current: vec![None; TIMEFRAMES.len()],
            last_price: 0.0,
        };
        for (tf, _) in TIMEFRAMES {
            agg.ensure_header(tf);
        }
        agg
    }

    /// Feed one trade (timestamp in epoch ms).
    pub fn update(&mut self, timestamp_ms: i64, price: f64, qty: f64) {
        self.last_price = price;
        let ts_sec = timestamp_ms / 1000;

        for (idx, (tf, interval)) in TIMEFRAMES.iter().enumerate() {
            let bar_start = (ts_sec / interval) * interval;
            match self.current[idx] {
                None => {
                    self.current[idx] = Some(TimeBar {
                        ts_start: bar_start,
                        open: price,
                        high: price,
                        low: price,
                        close: price,
                        volume: qty,
                        dollar_value: price * qty,
                    });
                }
                Some(ref mut bar) if bar.ts_start == bar_start => {
                    bar.high = bar.high.max(price);
                    bar.low = bar.low.min(price);
                    bar.close = price;
                    bar.volume += qty;
                    bar.dollar_value += price * qty;
                }
                Some(prev) => {
                    self.flush_bar(tf, &prev);
                    if self.gap_fill {
                        let mut gap_start = prev.ts_start + interval;
                        while gap_start < bar_start {
                            self.write_flat_bar(tf, gap_start);
                            gap_start += interval;
                        }
                    }
                    self.current[idx] = Some(TimeBar {
                        ts_start: bar_start,
                        open: price,
                        high: price,
                        low: price,
                        close: price,
                        volume: qty,
                        dollar_value: price * qty,
                    });
                }
            }
        }
    }

    /// Flush all open interval bars at session end.
    pub fn finalize(&mut self) {
        for (idx, (tf, _)) in TIMEFRAMES.iter().enumerate() {
            if let Some(bar) = self.current[idx].take() {
                self.flush_bar(tf, &bar);
            }
        }
    }

    fn chart_path(&self, tf: &str) -> PathBuf {
        self.run_dir.join(format!("chart_{tf}.csv"))
    }

    fn ensure_header(&self, tf: &str) {
        let path = self.chart_path(tf);
        if path.exists() {
            return;
        }
        if let Err(e) = std::fs::write(&path, HEADER) {
            warn!("chart_{tf}.csv: header write failed: {e}");
        }
    }

    fn flush_bar(&self, tf: &str, bar: &TimeBar) {
        let row = format!(
            "{},{},{},{},{},{},{}\n",
            bar.ts_start, bar.open, bar.high, bar.low, bar.close, bar.volume, bar.dollar_value
        );
        self.append(tf, &row);
    }

    fn write_flat_bar(&self, tf: &str, ts_start: i64) {
        let p = self.last_price;
        let row = format!("{ts_start},{p},{p},{p},{p},0,0\n");
        self.append(tf, &row);
    }

    fn append(&self, tf: &str, row: &str) {
        let path = self.chart_path(tf);
        let res = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .and_then(|mut f| f.write_all(row.as_bytes()));
        if let Err(e) = res {
            warn!("chart_{tf}.csv: append failed: {e}");
        }
    }
}
