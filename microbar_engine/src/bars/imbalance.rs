/// bars/imbalance.rs — Micro-bars by signed order-flow imbalance.
///
/// Maintains a running signed imbalance: buyer-initiated trades contribute
/// positively, seller-initiated negatively. Two accumulation modes:
///
///   Qty  — contribution is ±trade.qty
///   Tick — contribution is ±1 per trade
///
/// Closes when |imbalance| ≥ imbal_limit, so a bar represents a burst of
/// one-sided aggression regardless of how long it took to form.

use crate::error::ConfigError;
use crate::types::{Bar, Trade};

use super::build_bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImbalanceMode {
    Qty,
    Tick,
}

impl ImbalanceMode {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qty" => Ok(ImbalanceMode::Qty),
            "tick" => Ok(ImbalanceMode::Tick),
            other => Err(ConfigError::invalid(
                "imbal_mode",
                format!("must be 'qty' or 'tick', got '{other}'"),
            )),
        }
    }
}

#[derive(Debug)]
pub struct ImbalanceBarBuilder {
    imbal_limit: f64,
    mode: ImbalanceMode,
    buffer: Vec<Trade>,
    imbalance: f64,
}

impl ImbalanceBarBuilder {
    /// `imbal_limit` must be finite and > 0.
    pub fn new(imbal_limit: f64, mode: ImbalanceMode) -> Result<Self, ConfigError> {
        if !imbal_limit.is_finite() || imbal_limit <= 0.0 {
            return Err(ConfigError::invalid("imbal_limit", "must be > 0"));
        }
        Ok(Self { imbal_limit, mode, buffer: Vec::new(), imbalance: 0.0 })
    }

    pub fn imbal_limit(&self) -> f64 {
        self.imbal_limit
    }

    pub fn mode(&self) -> ImbalanceMode {
        self.mode
    }

    /// Current signed imbalance of the open bar.
    pub fn imbalance(&self) -> f64 {
        self.imbalance
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
        let magnitude = match self.mode {
            ImbalanceMode::Qty => trade.qty,
            ImbalanceMode::Tick => 1.0,
        };
        if trade.is_buy_aggressor() {
            self.imbalance += magnitude;
        } else {
            self.imbalance -= magnitude;
        }
    }

    pub(crate) fn threshold_reached(&self) -> bool {
        self.imbalance.abs() >= self.imbal_limit
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.imbalance = 0.0;
    }

    pub fn open_trade_count(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buy(qty: f64, ts: i64) -> Trade {
        // is_buyer_maker=false → buyer initiated
        Trade { price: 100.0, qty, timestamp: ts, is_buyer_maker: false }
    }

    fn sell(qty: f64, ts: i64) -> Trade {
        Trade { price: 100.0, qty, timestamp: ts, is_buyer_maker: true }
    }

    #[test]
    fn rejects_non_positive_limit() {
        assert!(ImbalanceBarBuilder::new(0.0, ImbalanceMode::Qty).is_err());
    }

    #[test]
    fn qty_mode_closes_on_one_sided_flow() {
        let mut b = ImbalanceBarBuilder::new(3.0, ImbalanceMode::Qty).unwrap();
        assert!(b.update(&buy(1.0, 1)).is_none()); // +1
        assert!(b.update(&sell(0.5, 2)).is_none()); // +0.5
        assert!(b.update(&buy(1.0, 3)).is_none()); // +1.5
        let bar = b.update(&buy(1.5, 4)).expect("+3.0 hits limit");
        assert_eq!(bar.trade_count, 4);
        assert_eq!(b.imbalance(), 0.0);
    }

    #[test]
    fn sell_pressure_triggers_via_absolute_value() {
        let mut b = ImbalanceBarBuilder::new(2.0, ImbalanceMode::Qty).unwrap();
        assert!(b.update(&sell(1.5, 1)).is_none()); // −1.5
        let bar = b.update(&sell(0.5, 2)).expect("|−2.0| hits limit");
        assert_eq!(bar.trade_count, 2);
    }

    #[test]
    fn tick_mode_counts_trades_not_size() {
        let mut b = ImbalanceBarBuilder::new(3.0, ImbalanceMode::Tick).unwrap();
        assert!(b.update(&buy(100.0, 1)).is_none()); // +1 despite huge qty
        assert!(b.update(&buy(0.001, 2)).is_none()); // +2
        assert!(b.update(&buy(0.001, 3)).is_some()); // +3
    }

    #[test]
    fn balanced_flow_never_closes() {
        let mut b = ImbalanceBarBuilder::new(2.0, ImbalanceMode::Qty).unwrap();
        for i in 0..50 {
            let t = if i % 2 == 0 { buy(1.0, i) } else { sell(1.0, i) };
            assert!(b.update(&t).is_none(), "balanced flow closed a bar at {i}");
        }
        assert_eq!(b.open_trade_count(), 50);
    }
}
