/// bars.rs — Micro-bar construction from raw trades.
///
/// Each builder is a state machine with a single operation
/// `update(trade) → Option<Bar>`: the trade is buffered and, when the
/// variant's closing rule triggers, the buffered trades collapse into a
/// `Bar` and the buffer resets. The triggering trade is always fully
/// included (no splitting).
///
/// Variants:
///   tick_count  — close after `tick_limit` trades
///   volume_qty  — close once Σ qty ≥ qty_limit
///   dollar      — close once Σ price·qty ≥ value_limit
///   imbalance   — close once |signed order-flow imbalance| ≥ imbal_limit
///   composite   — several sub-rules under an ANY / ALL policy
///
/// Construction goes through `registry::make`, which accepts the rule
/// aliases used across the tooling and fails fast on unknown names or
/// non-positive thresholds.

pub mod composite;
pub mod dollar;
pub mod imbalance;
pub mod registry;
pub mod tick_count;
pub mod time_agg;
pub mod volume_qty;

pub use composite::{ClosePolicy, CompositeBarBuilder, CompositeThresholds, SubBuilder};
pub use dollar::DollarBarBuilder;
pub use imbalance::{ImbalanceBarBuilder, ImbalanceMode};
pub use registry::{available_rules, make, make_composite, normalize_rule};
pub use tick_count::TickCountBarBuilder;
pub use time_agg::TimeBarAggregator;
pub use volume_qty::VolumeQtyBarBuilder;

use crate::types::{Bar, Trade};

/// Collapse a non-empty trade buffer into a Bar.
///
/// open/close = first/last price, high/low = max/min, volume = Σ qty,
/// dollar_value = Σ price·qty, start/end = first/last timestamp.
pub(crate) fn build_bar(trades: &[Trade]) -> Bar {
    debug_assert!(!trades.is_empty(), "bar built from empty buffer");
    let first = &trades[0];
    let last = &trades[trades.len() - 1];

    let mut high = f64::MIN;
    let mut low = f64::MAX;
    let mut volume = 0.0;
    let mut dollar_value = 0.0;
    for t in trades {
        if t.price > high {
            high = t.price;
        }
        if t.price < low {
            low = t.price;
        }
        volume += t.qty;
        dollar_value += t.price * t.qty;
    }

    Bar {
        open: first.price,
        high,
        low,
        close: last.price,
        volume,
        dollar_value,
        trade_count: trades.len(),
        start_time: first.timestamp,
        end_time: last.timestamp,
    }
}

/// Tagged union of bar builders with a common `update` operation.
///
/// The engine owns exactly one of these per session; dispatch stays static
/// so the per-trade hot path has no allocation or vtable.
#[derive(Debug)]
pub enum BarBuilder {
    TickCount(TickCountBarBuilder),
    VolumeQty(VolumeQtyBarBuilder),
    Dollar(DollarBarBuilder),
    Imbalance(ImbalanceBarBuilder),
    Composite(CompositeBarBuilder),
}

impl BarBuilder {
    /// Feed one trade. Returns the closed bar when the rule triggers.
    pub fn update(&mut self, trade: &Trade) -> Option<Bar> {
        match self {
            BarBuilder::TickCount(b) => b.update(trade),
            BarBuilder::VolumeQty(b) => b.update(trade),
            BarBuilder::Dollar(b) => b.update(trade),
            BarBuilder::Imbalance(b) => b.update(trade),
            BarBuilder::Composite(b) => b.update(trade),
        }
    }

    /// Drop any open bar and start clean.
    pub fn reset(&mut self) {
        match self {
            BarBuilder::TickCount(b) => b.reset(),
            BarBuilder::VolumeQty(b) => b.reset(),
            BarBuilder::Dollar(b) => b.reset(),
            BarBuilder::Imbalance(b) => b.reset(),
            BarBuilder::Composite(b) => b.reset(),
        }
    }

    /// Trades currently buffered in the open bar.
    pub fn open_trade_count(&self) -> usize {
        match self {
            BarBuilder::TickCount(b) => b.open_trade_count(),
            BarBuilder::VolumeQty(b) => b.open_trade_count(),
            BarBuilder::Dollar(b) => b.open_trade_count(),
            BarBuilder::Imbalance(b) => b.open_trade_count(),
            BarBuilder::Composite(b) => b.open_trade_count(),
        }
    }

    pub fn rule_name(&self) -> &'static str {
        match self {
            BarBuilder::TickCount(_) => "tick_count",
            BarBuilder::VolumeQty(_) => "volume_qty",
            BarBuilder::Dollar(_) => "dollar",
            BarBuilder::Imbalance(_) => "imbalance",
            BarBuilder::Composite(_) => "composite",
        }
    }

    /// Primary threshold of the rule, for manifests and bar diagnostics.
    pub fn limit(&self) -> f64 {
        match self {
            BarBuilder::TickCount(b) => b.tick_limit() as f64,
            BarBuilder::VolumeQty(b) => b.qty_limit(),
            BarBuilder::Dollar(b) => b.value_limit(),
            BarBuilder::Imbalance(b) => b.imbal_limit(),
            BarBuilder::Composite(_) => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(price: f64, qty: f64, ts: i64, buyer_maker: bool) -> Trade {
        Trade { price, qty, timestamp: ts, is_buyer_maker: buyer_maker }
    }

    #[test]
    fn bar_assembly_ohlcv() {
        let trades = vec![
            trade(100.0, 1.0, 1, false),
            trade(101.0, 2.0, 2, true),
            trade(99.0, 1.0, 3, false),
        ];
        let bar = build_bar(&trades);
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 101.0);
        assert_eq!(bar.low, 99.0);
        assert_eq!(bar.close, 99.0);
        assert_eq!(bar.volume, 4.0);
        assert_eq!(bar.trade_count, 3);
        assert_eq!(bar.start_time, 1);
        assert_eq!(bar.end_time, 3);
        assert!((bar.dollar_value - (100.0 + 202.0 + 99.0)).abs() < 1e-9);
    }

    #[test]
    fn no_trade_lost_across_session() {
        // Σ bar.trade_count + open buffer == trades fed
        let mut b = BarBuilder::TickCount(TickCountBarBuilder::new(3).unwrap());
        let mut closed = 0usize;
        let n = 10;
        for i in 0..n {
            if let Some(bar) = b.update(&trade(100.0, 1.0, i as i64, false)) {
                closed += bar.trade_count;
            }
        }
        assert_eq!(closed + b.open_trade_count(), n);
    }
}
