/// source.rs — Trade sources feeding the live engine.
///
/// The exchange WebSocket client lives outside this crate; the engine only
/// requires the `TradeSource` contract: an ordered, possibly-infinite lazy
/// sequence of trades where `Ok(None)` means a clean end-of-stream and
/// `SourceError::Exhausted` means the upstream ran out of reconnect
/// retries (the engine treats both as end-of-stream).
///
/// Shipped implementations:
///   ReplaySource  — trades from a CSV or JSONL file, optionally paced by
///                   the recorded inter-trade gaps (paper-trading replays)
///   ChannelSource — bounded tokio mpsc receiver, for tests and for wiring
///                   an external feed process

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::SourceError;
use crate::types::Trade;

pub trait TradeSource: Send {
    /// Next trade in stream order; `Ok(None)` ends the session.
    fn next_trade(
        &mut self,
    ) -> impl std::future::Future<Output = Result<Option<Trade>, SourceError>> + Send;
}

// ── Reconnect contract ────────────────────────────────────────────────────

/// Exponential backoff parameters an external feed client must honor.
/// Delay for attempt `n` is `base · factor^n`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub factor: f64,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            factor: 2.0,
            max_retries: 10,
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let scaled = self.base.as_secs_f64() * self.factor.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max.as_secs_f64()))
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_retries
    }
}

// ── File replay ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplayFormat {
    Csv,
    Jsonl,
}

/// Raw record shape shared with the feed contract:
/// `{t, price, qty, is_buyer_maker}` with `t` in epoch ms.
#[derive(Debug, Deserialize)]
struct RawTrade {
    t: i64,
    price: f64,
    qty: f64,
    is_buyer_maker: bool,
}

pub struct ReplaySource {
    lines: std::io::Lines<BufReader<std::fs::File>>,
    format: ReplayFormat,
    line_no: usize,
    last_ts: Option<i64>,
    /// Replay speed: 1.0 = recorded pace, None = as fast as possible.
    pace: Option<f64>,
}

impl ReplaySource {
    /// Open a trade file; the format comes from the extension
    /// (`.jsonl`/`.ndjson` → JSONL, anything else → CSV).
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let format = match path.extension().and_then(|e| e.to_str()) {
            Some("jsonl") | Some("ndjson") => ReplayFormat::Jsonl,
            _ => ReplayFormat::Csv,
        };
        let file = std::fs::File::open(path)?;
        info!("replaying trades from {}", path.display());
        Ok(Self {
            lines: BufReader::new(file).lines(),
            format,
            line_no: 0,
            last_ts: None,
            pace: None,
        })
    }

    /// Sleep between trades according to their recorded spacing divided by
    /// `speed` (2.0 = twice as fast).
    pub fn with_pacing(mut self, speed: f64) -> Self {
        if speed > 0.0 {
            self.pace = Some(speed);
        }
        self
    }

    fn parse_line(&self, line: &str) -> Result<Option<Trade>, SourceError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        match self.format {
            ReplayFormat::Jsonl => {
                let raw: RawTrade = serde_json::from_str(trimmed).map_err(|e| {
                    SourceError::Malformed { line: self.line_no, message: e.to_string() }
                })?;
                Ok(Some(Trade {
                    price: raw.price,
                    qty: raw.qty,
                    timestamp: raw.t,
                    is_buyer_maker: raw.is_buyer_maker,
                }))
            }
            ReplayFormat::Csv => {
                // Header row: skip anything whose first field is not numeric.
                let fields: Vec<&str> = trimmed.split(',').collect();
                if fields.len() != 4 {
                    return Err(SourceError::Malformed {
                        line: self.line_no,
                        message: format!("expected 4 fields, got {}", fields.len()),
                    });
                }
                let t: i64 = match fields[0].trim().parse() {
                    Ok(v) => v,
                    Err(_) if self.line_no == 1 => return Ok(None), // header
                    Err(e) => {
                        return Err(SourceError::Malformed {
                            line: self.line_no,
                            message: format!("bad timestamp: {e}"),
                        })
                    }
                };
                let parse_f = |idx: usize, name: &str| -> Result<f64, SourceError> {
                    fields[idx].trim().parse().map_err(|e| SourceError::Malformed {
                        line: self.line_no,
                        message: format!("bad {name}: {e}"),
                    })
                };
                let is_buyer_maker = matches!(
                    fields[3].trim().to_ascii_lowercase().as_str(),
                    "true" | "1"
                );
                Ok(Some(Trade {
                    price: parse_f(1, "price")?,
                    qty: parse_f(2, "qty")?,
                    timestamp: t,
                    is_buyer_maker,
                }))
            }
        }
    }

    fn check(&mut self, trade: Trade) -> Result<Trade, SourceError> {
        if !(trade.price > 0.0) || !(trade.qty > 0.0) {
            return Err(SourceError::Malformed {
                line: self.line_no,
                message: format!("non-positive price/qty: {} / {}", trade.price, trade.qty),
            });
        }
        if let Some(prev) = self.last_ts {
            if trade.timestamp < prev {
                return Err(SourceError::OutOfOrder { previous: prev, current: trade.timestamp });
            }
        }
        self.last_ts = Some(trade.timestamp);
        Ok(trade)
    }
}

impl TradeSource for ReplaySource {
    async fn next_trade(&mut self) -> Result<Option<Trade>, SourceError> {
        loop {
            let line = match self.lines.next() {
                None => return Ok(None),
                Some(res) => res?,
            };
            self.line_no += 1;
            match self.parse_line(&line)? {
                None => continue, // header or blank line
                Some(trade) => {
                    let prev_ts = self.last_ts;
                    let trade = self.check(trade)?;
                    if let (Some(speed), Some(prev)) = (self.pace, prev_ts) {
                        let gap_ms = (trade.timestamp - prev).max(0) as f64 / speed;
                        if gap_ms > 0.0 {
                            tokio::time::sleep(Duration::from_millis(gap_ms as u64)).await;
                        }
                    }
                    return Ok(Some(trade));
                }
            }
        }
    }
}

// ── Channel source ────────────────────────────────────────────────────────

/// Bounded-queue source; the producer half belongs to the external feed.
/// The stream ends when every sender is dropped.
pub struct ChannelSource {
    rx: mpsc::Receiver<Trade>,
    last_ts: Option<i64>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<Trade>) -> Self {
        Self { rx, last_ts: None }
    }

    /// Convenience pair constructor for tests and in-process feeds.
    pub fn pair(capacity: usize) -> (mpsc::Sender<Trade>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

impl TradeSource for ChannelSource {
    async fn next_trade(&mut self) -> Result<Option<Trade>, SourceError> {
        match self.rx.recv().await {
            None => Ok(None),
            Some(trade) => {
                if let Some(prev) = self.last_ts {
                    if trade.timestamp < prev {
                        return Err(SourceError::OutOfOrder {
                            previous: prev,
                            current: trade.timestamp,
                        });
                    }
                }
                self.last_ts = Some(trade.timestamp);
                Ok(Some(trade))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn replays_csv_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "trades.csv",
            "t,price,qty,is_buyer_maker\n1000,100.5,0.25,false\n2000,101.0,0.5,true\n",
        );
        let mut src = ReplaySource::open(&path).unwrap();

        let t1 = src.next_trade().await.unwrap().unwrap();
        assert_eq!(t1.timestamp, 1000);
        assert_eq!(t1.price, 100.5);
        assert!(!t1.is_buyer_maker);

        let t2 = src.next_trade().await.unwrap().unwrap();
        assert!(t2.is_buyer_maker);
        assert!(src.next_trade().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn replays_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "trades.jsonl",
            "{\"t\":1000,\"price\":100.0,\"qty\":1.0,\"is_buyer_maker\":false}\n\
             {\"t\":1001,\"price\":100.1,\"qty\":2.0,\"is_buyer_maker\":true}\n",
        );
        let mut src = ReplaySource::open(&path).unwrap();
        assert_eq!(src.next_trade().await.unwrap().unwrap().qty, 1.0);
        assert_eq!(src.next_trade().await.unwrap().unwrap().qty, 2.0);
        assert!(src.next_trade().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_out_of_order_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "trades.csv",
            "2000,100.0,1.0,false\n1000,100.0,1.0,false\n",
        );
        let mut src = ReplaySource::open(&path).unwrap();
        assert!(src.next_trade().await.is_ok());
        assert!(matches!(
            src.next_trade().await,
            Err(SourceError::OutOfOrder { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_non_positive_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "trades.csv", "1000,0.0,1.0,false\n");
        let mut src = ReplaySource::open(&path).unwrap();
        assert!(matches!(src.next_trade().await, Err(SourceError::Malformed { .. })));
    }

    #[tokio::test]
    async fn channel_source_ends_when_senders_drop() {
        let (tx, mut src) = ChannelSource::pair(4);
        tx.send(Trade { price: 100.0, qty: 1.0, timestamp: 1, is_buyer_maker: false })
            .await
            .unwrap();
        drop(tx);
        assert!(src.next_trade().await.unwrap().is_some());
        assert!(src.next_trade().await.unwrap().is_none());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let p = BackoffPolicy::default();
        assert_eq!(p.delay(0), Duration::from_secs(1));
        assert_eq!(p.delay(1), Duration::from_secs(2));
        assert_eq!(p.delay(10), Duration::from_secs(30));
        assert!(p.exhausted(10));
        assert!(!p.exhausted(3));
    }
}
