/// strategies/vol_breakout.rs — Channel breakout with an ATR buffer.
///
/// Keeps rolling high/low queues forming a `lookback`-bar channel. A close
/// above the previous channel high plus `atr_mult·ATR` opens a long
/// (symmetrically below the channel low for shorts, when enabled). The
/// position is protected by a `stop_mult·ATR` stop from the entry price,
/// and a close back inside the channel exits — gated by the round-trip
/// cost check so reversion exits never lock in net-negative trades.

use std::collections::VecDeque;

use serde_json::Value;
use tracing::debug;

use crate::broker::PaperBroker;
use crate::error::ConfigError;
use crate::executor::MarketExecutor;
use crate::strategy::{
    atr_like, exit_clears_costs, param_bool, param_f64, param_usize, qty_from_notional, Strategy,
};
use crate::types::Bar;

#[derive(Debug, Clone)]
pub struct VolBreakoutConfig {
    /// Channel window in bars.
    pub lookback: usize,
    pub atr_period: usize,
    /// Breakout buffer in ATR multiples.
    pub atr_mult: f64,
    /// Stop distance in ATR multiples.
    pub stop_mult: f64,
    pub qty_frac: f64,
    pub order_notional: f64,
    pub allow_short: bool,
    pub cost_exit_gate: bool,
}

impl Default for VolBreakoutConfig {
    fn default() -> Self {
        Self {
            lookback: 20,
            atr_period: 14,
            atr_mult: 0.5,
            stop_mult: 2.0,
            qty_frac: 1.0,
            order_notional: 5.0,
            allow_short: false,
            cost_exit_gate: true,
        }
    }
}

impl VolBreakoutConfig {
    pub fn from_params(params: &Value) -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            lookback: param_usize(params, "lookback", d.lookback)?,
            atr_period: param_usize(params, "atr_period", d.atr_period)?,
            atr_mult: param_f64(params, "atr_mult", d.atr_mult)?,
            stop_mult: param_f64(params, "stop_mult", d.stop_mult)?,
            qty_frac: param_f64(params, "qty_frac", d.qty_frac)?,
            order_notional: param_f64(params, "order_notional", d.order_notional)?,
            allow_short: param_bool(params, "allow_short", d.allow_short)?,
            cost_exit_gate: param_bool(params, "cost_exit_gate", d.cost_exit_gate)?,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.lookback < 2 {
            return Err(ConfigError::invalid("lookback", "must be >= 2"));
        }
        if self.atr_period < 1 {
            return Err(ConfigError::invalid("atr_period", "must be >= 1"));
        }
        if self.atr_mult < 0.0 {
            return Err(ConfigError::invalid("atr_mult", "must be >= 0"));
        }
        if self.stop_mult <= 0.0 {
            return Err(ConfigError::invalid("stop_mult", "must be positive"));
        }
        if self.qty_frac <= 0.0 || self.qty_frac > 1.0 {
            return Err(ConfigError::invalid("qty_frac", "must be in (0, 1]"));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct VolBreakoutStrategy {
    cfg: VolBreakoutConfig,

    highs: VecDeque<f64>,
    lows: VecDeque<f64>,
    closes: VecDeque<f64>,

    /// Signed position: > 0 long, < 0 short, 0 flat.
    pos_qty: f64,
    entry_price: f64,
}

impl VolBreakoutStrategy {
    pub fn new(cfg: VolBreakoutConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let cap = cfg.lookback;
        Ok(Self {
            cfg,
            highs: VecDeque::with_capacity(cap + 1),
            lows: VecDeque::with_capacity(cap + 1),
            closes: VecDeque::with_capacity(cap + 1),
            pos_qty: 0.0,
            entry_price: 0.0,
        })
    }

    pub fn from_params(params: &Value) -> Result<Self, ConfigError> {
        Self::new(VolBreakoutConfig::from_params(params)?)
    }

    fn push_window(&mut self, high: f64, low: f64, close: f64) {
        if self.highs.len() == self.cfg.lookback {
            self.highs.pop_front();
            self.lows.pop_front();
            self.closes.pop_front();
        }
        self.highs.push_back(high);
        self.lows.push_back(low);
        self.closes.push_back(close);
    }

    fn channel_high(highs: &VecDeque<f64>) -> f64 {
        highs.iter().copied().fold(f64::MIN, f64::max)
    }

    fn channel_low(lows: &VecDeque<f64>) -> f64 {
        lows.iter().copied().fold(f64::MAX, f64::min)
    }

    fn atr(&self) -> f64 {
        if self.highs.len() < self.cfg.atr_period {
            return 0.0;
        }
        let highs: Vec<f64> = self.highs.iter().copied().collect();
        let lows: Vec<f64> = self.lows.iter().copied().collect();
        let closes: Vec<f64> = self.closes.iter().copied().collect();
        atr_like(&highs, &lows, &closes, self.cfg.atr_period).max(0.0)
    }

    fn sized_qty(&self, broker: &PaperBroker, price: f64) -> f64 {
        let available = (broker.cash() * self.cfg.qty_frac).max(0.0);
        qty_from_notional(self.cfg.order_notional.min(available), price)
    }
}

impl Strategy for VolBreakoutStrategy {
    fn name(&self) -> &'static str {
        "vol_breakout"
    }

    fn on_bar(
        &mut self,
        broker: &mut PaperBroker,
        executor: &mut MarketExecutor,
        symbol: &str,
        bar: &Bar,
    ) {
        let (high, low, close) = (bar.high, bar.low, bar.close);

        // Breakouts compare against the channel as it stood BEFORE this bar.
        let ch_high_prev =
            if self.highs.is_empty() { high } else { Self::channel_high(&self.highs) };
        let ch_low_prev = if self.lows.is_empty() { low } else { Self::channel_low(&self.lows) };

        self.push_window(high, low, close);
        let atr = self.atr();
        let ch_high = Self::channel_high(&self.highs);
        let ch_low = Self::channel_low(&self.lows);

        let entry_px = if self.entry_price > 0.0 { self.entry_price } else { close };

        // ── Stop-loss on open positions ───────────────────────────────────
        if self.pos_qty > 0.0 {
            let stop = entry_px - self.cfg.stop_mult * atr;
            if close < stop {
                debug!(close, stop, "breakout long stopped");
                executor.market_sell(broker, symbol, self.pos_qty, "stop_loss");
                self.pos_qty = 0.0;
                self.entry_price = 0.0;
                return;
            }
        } else if self.pos_qty < 0.0 {
            let stop = entry_px + self.cfg.stop_mult * atr;
            if close > stop {
                debug!(close, stop, "breakout short stopped");
                executor.market_buy(broker, symbol, self.pos_qty.abs(), "stop_loss");
                self.pos_qty = 0.0;
                self.entry_price = 0.0;
                return;
            }
        }

        // ── Entries on fresh breakouts ────────────────────────────────────
        if self.pos_qty == 0.0 && self.closes.len() == self.cfg.lookback && atr > 0.0 {
            if close > ch_high_prev + self.cfg.atr_mult * atr {
                let qty = self.sized_qty(broker, close);
                if qty > 0.0 {
                    debug!(close, ch_high, atr, "breakout entry long");
                    executor.market_buy(broker, symbol, qty, "breakout_long");
                    self.pos_qty = qty;
                    self.entry_price = close;
                }
                return;
            }
            if self.cfg.allow_short && close < ch_low_prev - self.cfg.atr_mult * atr {
                let qty = self.sized_qty(broker, close);
                if qty > 0.0 {
                    debug!(close, ch_low, atr, "breakout entry short");
                    executor.market_sell(broker, symbol, qty, "breakout_short");
                    self.pos_qty = -qty;
                    self.entry_price = close;
                }
                return;
            }
        }

        // ── Channel-reentry exits (cost gated) ────────────────────────────
        if self.pos_qty > 0.0 && close < ch_high {
            if exit_clears_costs(
                broker.cost_model(),
                self.cfg.cost_exit_gate,
                self.entry_price,
                close,
                self.pos_qty,
            ) {
                debug!(close, ch_high, "long lost momentum, exiting");
                executor.market_sell(broker, symbol, self.pos_qty, "channel_reentry");
                self.pos_qty = 0.0;
                self.entry_price = 0.0;
            }
            return;
        }
        if self.pos_qty < 0.0 && close > ch_low {
            let qty = self.pos_qty.abs();
            // Mirror of the long gate with the sign flipped.
            let clears = !self.cfg.cost_exit_gate
                || exit_clears_costs(
                    broker.cost_model(),
                    true,
                    close,
                    self.entry_price,
                    qty,
                );
            if clears {
                debug!(close, ch_low, "short lost momentum, exiting");
                executor.market_buy(broker, symbol, qty, "channel_reentry");
                self.pos_qty = 0.0;
                self.entry_price = 0.0;
            }
        }
    }
}
