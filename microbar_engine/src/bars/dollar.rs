/// bars/dollar.rs — Micro-bars by traded notional (Σ price · qty).
///
/// Closes a bar once the accumulated quote-currency value reaches
/// `value_limit`. Prices are assumed to be quoted in the pair's quote
/// currency already; no FX conversion happens here.

use crate::error::ConfigError;
use crate::types::{Bar, Trade};

use super::build_bar;

#[derive(Debug)]
pub struct DollarBarBuilder {
    value_limit: f64,
    buffer: Vec<Trade>,
    value_sum: f64,
}

impl DollarBarBuilder {
    /// `value_limit` must be finite and > 0.
    pub fn new(value_limit: f64) -> Result<Self, ConfigError> {
        if !value_limit.is_finite() || value_limit <= 0.0 {
            return Err(ConfigError::invalid("value_limit", "must be > 0"));
        }
        Ok(Self { value_limit, buffer: Vec::new(), value_sum: 0.0 })
    }

    pub fn value_limit(&self) -> f64 {
        self.value_limit
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
        self.value_sum += trade.price * trade.qty;
    }

    pub(crate) fn threshold_reached(&self) -> bool {
        self.value_sum >= self.value_limit
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.value_sum = 0.0;
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
        assert!(DollarBarBuilder::new(0.0).is_err());
        assert!(DollarBarBuilder::new(-100.0).is_err());
    }

    #[test]
    fn closes_on_accumulated_value() {
        let mut b = DollarBarBuilder::new(500.0).unwrap();
        assert!(b.update(&trade(100.0, 2.0, 1)).is_none()); // 200
        assert!(b.update(&trade(100.0, 2.0, 2)).is_none()); // 400
        let bar = b.update(&trade(100.0, 1.5, 3)).expect("550 >= 500");
        assert!((bar.dollar_value - 550.0).abs() < 1e-9);
        assert_eq!(bar.trade_count, 3);
        assert_eq!(b.open_trade_count(), 0);
    }
}
