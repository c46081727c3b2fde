/// spread.rs — Rolling top-of-book spread for dynamic slippage.
///
/// A dedicated background task consumes `SpreadSample`s from a bounded
/// channel (the book-ticker client that produces them lives outside this
/// crate), keeps a rolling window of relative spreads in bps, and publishes
/// the rolling mean into a single shared cell. Exactly one writer exists
/// and readers accept the latest value, so the cell is an `AtomicU64`
/// holding f64 bits and no lock is needed anywhere.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

pub const DEFAULT_SPREAD_WINDOW: usize = 100;

/// One top-of-book observation.
#[derive(Debug, Clone, Copy)]
pub struct SpreadSample {
    pub bid: f64,
    pub ask: f64,
    /// Event-time ms.
    pub ts: i64,
}

/// Cheap cloneable reader of the latest rolling-mean spread.
#[derive(Debug, Clone)]
pub struct SpreadHandle {
    cell: Arc<AtomicU64>,
}

impl SpreadHandle {
    fn empty() -> Self {
        Self { cell: Arc::new(AtomicU64::new(f64::NAN.to_bits())) }
    }

    /// Latest rolling mean spread in bps; None before the first sample.
    pub fn latest_bps(&self) -> Option<f64> {
        let v = f64::from_bits(self.cell.load(Ordering::Acquire));
        if v.is_nan() {
            None
        } else {
            Some(v)
        }
    }
}

/// Owns the background aggregation task.
#[derive(Debug)]
pub struct SpreadTracker {
    handle: SpreadHandle,
    task: JoinHandle<()>,
}

impl SpreadTracker {
    /// Spawn the consumer task over a sample channel. The task ends when
    /// every sender is dropped or `stop` is called.
    pub fn spawn(mut rx: mpsc::Receiver<SpreadSample>, window: usize) -> Self {
        let handle = SpreadHandle::empty();
        let cell = Arc::clone(&handle.cell);
        let window = window.max(1);

        let task = tokio::spawn(async move {
            let mut win: VecDeque<f64> = VecDeque::with_capacity(window);
            let mut sum = 0.0f64;
            while let Some(s) = rx.recv().await {
                let mid = 0.5 * (s.bid + s.ask);
                if !(mid > 0.0) || s.ask < s.bid {
                    continue;
                }
                let bps = (s.ask - s.bid) / mid * 10_000.0;
                win.push_back(bps);
                sum += bps;
                if win.len() > window {
                    sum -= win.pop_front().unwrap_or(0.0);
                }
                let mean = sum / win.len() as f64;
                cell.store(mean.to_bits(), Ordering::Release);
            }
            debug!("spread tracker channel closed");
        });

        Self { handle, task }
    }

    pub fn handle(&self) -> SpreadHandle {
        self.handle.clone()
    }

    /// Terminate the background task. Dropping the sample sender has the
    /// same effect; this exists for explicit session teardown.
    pub fn stop(&self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publishes_rolling_mean() {
        let (tx, rx) = mpsc::channel(16);
        let tracker = SpreadTracker::spawn(rx, 2);
        let handle = tracker.handle();

        assert!(handle.latest_bps().is_none());

        // 100.0/100.01 → 1 bps; 100.0/100.03 → ~3 bps
        tx.send(SpreadSample { bid: 100.0, ask: 100.01, ts: 1 }).await.unwrap();
        tx.send(SpreadSample { bid: 100.0, ask: 100.03, ts: 2 }).await.unwrap();
        drop(tx);
        // wait for the task to drain the channel
        while !tracker.task.is_finished() {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }

        let bps = handle.latest_bps().unwrap();
        assert!((bps - 2.0).abs() < 0.05, "mean spread = {bps}");
    }

    #[tokio::test]
    async fn crossed_book_samples_are_ignored() {
        let (tx, rx) = mpsc::channel(4);
        let tracker = SpreadTracker::spawn(rx, 4);
        tx.send(SpreadSample { bid: 100.0, ask: 99.0, ts: 1 }).await.unwrap();
        drop(tx);
        while !tracker.task.is_finished() {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        assert!(tracker.handle().latest_bps().is_none());
    }
}
