/// bars/volume_qty.rs — Micro-bars by traded base quantity.
///
/// Closes a bar once Σ qty ≥ qty_limit. Trades are never split: the
/// triggering trade is fully included, so the emitted bar's volume
/// overshoots the limit by at most that trade's quantity.

use crate::error::ConfigError;
use crate::types::{Bar, Trade};

use super::build_bar;

#[derive(Debug)]
pub struct VolumeQtyBarBuilder {
    qty_limit: f64,
    buffer: Vec<Trade>,
    qty_sum: f64,
}

impl VolumeQtyBarBuilder {
    /// `qty_limit` must be finite and > 0.
    pub fn new(qty_limit: f64) -> Result<Self, ConfigError> {
        if !qty_limit.is_finite() || qty_limit <= 0.0 {
            return Err(ConfigError::invalid("qty_limit", "must be > 0"));
        }
        Ok(Self { qty_limit, buffer: Vec::new(), qty_sum: 0.0 })
    }

    pub fn qty_limit(&self) -> f64 {
        self.qty_limit
    }

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

    pub(crate) fn accumulate(&mut self, trade: &Trade) {
        self.qty_sum += trade.qty;
    }

    pub(crate) fn threshold_reached(&self) -> bool {
        self.qty_sum >= self.qty_limit
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.qty_sum = 0.0;
    }

    pub fn open_trade_count(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(price: f64, qty: f64, ts: i64) -> Trade {
        Trade { price, qty, timestamp: ts, is_buyer_maker: false }
    }

    #[test]
    fn rejects_non_positive_limit() {
        assert!(VolumeQtyBarBuilder::new(0.0).is_err());
        assert!(VolumeQtyBarBuilder::new(-1.0).is_err());
        assert!(VolumeQtyBarBuilder::new(f64::NAN).is_err());
    }

    #[test]
    fn closes_with_overshoot() {
        // Scenario: qty_limit=5, trades (100,2), (101,2), (102,1.5)
        let mut b = VolumeQtyBarBuilder::new(5.0).unwrap();
        assert!(b.update(&trade(100.0, 2.0, 1)).is_none());
        assert!(b.update(&trade(101.0, 2.0, 2)).is_none());
        let bar = b.update(&trade(102.0, 1.5, 3)).expect("limit crossed");

        assert_eq!(bar.volume, 5.5);
        assert_eq!(bar.close, 102.0);
        assert_eq!(bar.trade_count, 3);
        // Overshoot is bounded by the last trade's qty.
        assert!(bar.volume - 5.0 <= 1.5);
        assert_eq!(b.open_trade_count(), 0);
    }

    #[test]
    fn single_huge_trade_closes_alone() {
        let mut b = VolumeQtyBarBuilder::new(1.0).unwrap();
        let bar = b.update(&trade(100.0, 10.0, 1)).unwrap();
        assert_eq!(bar.trade_count, 1);
        assert_eq!(bar.volume, 10.0);
    }

    #[test]
    fn every_bar_meets_the_limit() {
        let mut b = VolumeQtyBarBuilder::new(3.0).unwrap();
        for i in 0..100 {
            let qty = 0.7 + (i % 5) as f64 * 0.3;
            if let Some(bar) = b.update(&trade(100.0, qty, i)) {
                assert!(bar.volume >= 3.0, "bar volume {} below limit", bar.volume);
            }
        }
    }
}
