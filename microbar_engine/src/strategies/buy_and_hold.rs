/// strategies/buy_and_hold.rs — Baseline: buy once, hold to session end.
///
/// Enters on the first closed bar with the configured notional and never
/// trades again; the engine's end-of-session liquidation realizes the
/// result. Useful as the benchmark every other strategy must beat.

use serde_json::Value;
use tracing::debug;

use crate::broker::PaperBroker;
use crate::error::ConfigError;
use crate::executor::MarketExecutor;
use crate::strategy::{param_f64, qty_from_notional, Strategy};
use crate::types::Bar;

#[derive(Debug)]
pub struct BuyAndHoldStrategy {
    qty_frac: f64,
    order_notional: f64,
    did_buy: bool,
}

impl BuyAndHoldStrategy {
    pub fn from_params(params: &Value) -> Result<Self, ConfigError> {
        let qty_frac = param_f64(params, "qty_frac", 1.0)?;
        let order_notional = param_f64(params, "order_notional", f64::INFINITY)?;
        if qty_frac <= 0.0 || qty_frac > 1.0 {
            return Err(ConfigError::invalid("qty_frac", "must be in (0, 1]"));
        }
        if order_notional <= 0.0 {
            return Err(ConfigError::invalid("order_notional", "must be positive"));
        }
        Ok(Self { qty_frac, order_notional, did_buy: false })
    }
}

impl Strategy for BuyAndHoldStrategy {
    fn name(&self) -> &'static str {
        "buy_and_hold"
    }

    fn on_bar(
        &mut self,
        broker: &mut PaperBroker,
        executor: &mut MarketExecutor,
        symbol: &str,
        bar: &Bar,
    ) {
        if self.did_buy {
            return;
        }
        let notional = self.order_notional.min(broker.cash() * self.qty_frac);
        let qty = qty_from_notional(notional, bar.close);
        if qty > 0.0 {
            debug!(price = bar.close, qty, "buy and hold entry");
            executor.market_buy(broker, symbol, qty, "buy_and_hold_entry");
        }
        self.did_buy = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::costs::CostModel;

    fn bar(close: f64, ts: i64) -> Bar {
        Bar {
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            dollar_value: close,
            trade_count: 1,
            start_time: ts,
            end_time: ts,
        }
    }

    #[test]
    fn buys_exactly_once() {
        let mut s = BuyAndHoldStrategy::from_params(&serde_json::json!({})).unwrap();
        let mut broker = PaperBroker::new(1_000.0, CostModel::fixed(0.0, 0.0));
        let mut ex = MarketExecutor::new();

        broker.mark("BTCUSDT", 100.0, 1);
        s.on_bar(&mut broker, &mut ex, "BTCUSDT", &bar(100.0, 1));
        let qty_after_first = broker.position_qty("BTCUSDT");
        assert!(qty_after_first > 0.0);

        broker.mark("BTCUSDT", 101.0, 2);
        s.on_bar(&mut broker, &mut ex, "BTCUSDT", &bar(101.0, 2));
        assert_eq!(broker.position_qty("BTCUSDT"), qty_after_first);
        assert_eq!(ex.drain_executed().len(), 1);
    }
}
