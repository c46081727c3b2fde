/// bars/tick_count.rs — Micro-bars by trade count.
///
/// Closes a bar when the number of accumulated trades reaches `tick_limit`.
/// Every trade advances the counter by one regardless of its size, which
/// normalizes the horizontal axis by activity instead of wall-clock time:
/// bursts of trading produce more bars, quiet stretches fewer.

use crate::error::ConfigError;
use crate::types::{Bar, Trade};

use super::build_bar;

#[derive(Debug)]
pub struct TickCountBarBuilder {
    tick_limit: usize,
    buffer: Vec<Trade>,
    count: usize,
}

impl TickCountBarBuilder {
    /// `tick_limit` must be ≥ 1.
    pub fn new(tick_limit: usize) -> Result<Self, ConfigError> {
        if tick_limit < 1 {
            return Err(ConfigError::invalid("tick_limit", "must be >= 1"));
        }
        Ok(Self { tick_limit, buffer: Vec::new(), count: 0 })
    }

    pub fn tick_limit(&self) -> usize {
        self.tick_limit
    }

    /// Add a trade; returns the closed bar once the count hits the limit.
    pub fn update(&mut self, trade: &Trade) -> Option<Bar> {
        self.buffer.push(*trade);
        self.accumulate(trade);
        if self.threshold_reached() {
            let bar = build_bar(&self.buffer);
            self.reset();
            return Some(bar);
        }
        None
    }

    /// Advance the rule state only (used by the composite builder, which
    /// keeps its own buffer).
    pub(crate) fn accumulate(&mut self, _trade: &Trade) {
        self.count += 1;
    }

    pub(crate) fn threshold_reached(&self) -> bool {
        self.count >= self.tick_limit
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.count = 0;
    }

    pub fn open_trade_count(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(price: f64, qty: f64, ts: i64, buyer_maker: bool) -> Trade {
        Trade { price, qty, timestamp: ts, is_buyer_maker: buyer_maker }
    }

    #[test]
    fn rejects_zero_limit() {
        assert!(TickCountBarBuilder::new(0).is_err());
    }

    #[test]
    fn closes_at_tick_limit() {
        // Scenario: tick_limit=3, trades (100,1,t=1), (101,2,t=2), (99,1,t=3)
        let mut b = TickCountBarBuilder::new(3).unwrap();
        assert!(b.update(&trade(100.0, 1.0, 1, false)).is_none());
        assert!(b.update(&trade(101.0, 2.0, 2, true)).is_none());
        let bar = b.update(&trade(99.0, 1.0, 3, false)).expect("bar closes on 3rd trade");

        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 101.0);
        assert_eq!(bar.low, 99.0);
        assert_eq!(bar.close, 99.0);
        assert_eq!(bar.volume, 4.0);
        assert_eq!(bar.trade_count, 3);
        assert_eq!(bar.start_time, 1);
        assert_eq!(bar.end_time, 3);

        // Buffer is empty; the next trade starts a new bar.
        assert_eq!(b.open_trade_count(), 0);
        assert!(b.update(&trade(98.0, 1.0, 4, false)).is_none());
        assert_eq!(b.open_trade_count(), 1);
    }

    #[test]
    fn limit_one_closes_every_trade() {
        let mut b = TickCountBarBuilder::new(1).unwrap();
        for i in 0..5 {
            let bar = b.update(&trade(100.0 + i as f64, 1.0, i, false)).unwrap();
            assert_eq!(bar.trade_count, 1);
            assert_eq!(bar.open, bar.close);
        }
    }
}
