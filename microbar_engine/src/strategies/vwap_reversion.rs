/// strategies/vwap_reversion.rs — Mean reversion around a rolling VWAP.
///
/// Trades transient deviations of price from a short-window VWAP using
/// z-score bands: enter long when z ≤ −z_entry (price stretched below the
/// band), close when |z| ≤ z_exit (reversion completed), with relative
/// take-profit / stop-loss protections evaluated first.
///
/// The window statistics are O(1) per bar: price/volume sums are updated
/// incrementally with eviction of the oldest sample.

use std::collections::VecDeque;

use serde_json::Value;
use tracing::debug;

use crate::broker::PaperBroker;
use crate::error::ConfigError;
use crate::executor::MarketExecutor;
use crate::strategy::{
    exit_clears_costs, param_bool, param_f64, param_usize, qty_from_notional, Strategy,
};
use crate::types::Bar;

/// Volumes below this are replaced by 1.0 so a zero-volume bar cannot
/// poison the VWAP denominator.
const MIN_EFFECTIVE_VOL: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct VwapReversionConfig {
    /// Window for VWAP and z-score statistics.
    pub vwap_window: usize,
    /// |z| required to enter.
    pub z_entry: f64,
    /// |z| at which the reversion is considered done.
    pub z_exit: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub qty_frac: f64,
    pub order_notional: f64,
    /// Bars before signals activate; defaults to the window size.
    pub warmup: usize,
    pub cost_exit_gate: bool,
}

impl Default for VwapReversionConfig {
    fn default() -> Self {
        Self {
            vwap_window: 50,
            z_entry: 1.5,
            z_exit: 0.5,
            take_profit_pct: 0.006,
            stop_loss_pct: 0.004,
            qty_frac: 1.0,
            order_notional: 5.0,
            warmup: 50,
            cost_exit_gate: true,
        }
    }
}

impl VwapReversionConfig {
    pub fn from_params(params: &Value) -> Result<Self, ConfigError> {
        let d = Self::default();
        let vwap_window = param_usize(params, "vwap_window", d.vwap_window)?;
        Ok(Self {
            vwap_window,
            z_entry: param_f64(params, "z_entry", d.z_entry)?,
            z_exit: param_f64(params, "z_exit", d.z_exit)?,
            take_profit_pct: param_f64(params, "take_profit_pct", d.take_profit_pct)?,
            stop_loss_pct: param_f64(params, "stop_loss_pct", d.stop_loss_pct)?,
            qty_frac: param_f64(params, "qty_frac", d.qty_frac)?,
            order_notional: param_f64(params, "order_notional", d.order_notional)?,
            warmup: param_usize(params, "warmup", vwap_window)?,
            cost_exit_gate: param_bool(params, "cost_exit_gate", d.cost_exit_gate)?,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.vwap_window < 2 {
            return Err(ConfigError::invalid("vwap_window", "must be >= 2"));
        }
        if self.z_entry <= 0.0 {
            return Err(ConfigError::invalid("z_entry", "must be positive"));
        }
        if self.z_exit >= self.z_entry {
            return Err(ConfigError::invalid(
                "z_exit",
                format!("{} must be below z_entry {}", self.z_exit, self.z_entry),
            ));
        }
        if self.take_profit_pct <= 0.0 || self.stop_loss_pct <= 0.0 {
            return Err(ConfigError::invalid("take_profit_pct", "tp/sl must be positive"));
        }
        if self.qty_frac <= 0.0 || self.qty_frac > 1.0 {
            return Err(ConfigError::invalid("qty_frac", "must be in (0, 1]"));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct VwapReversionStrategy {
    cfg: VwapReversionConfig,

    prices: VecDeque<f64>,
    vols: VecDeque<f64>,
    sum_pv: f64,
    sum_v: f64,
    sum_p: f64,
    sum_p2: f64,
    bars_seen: usize,

    in_pos: bool,
    pos_qty: f64,
    entry_price: f64,
}

impl VwapReversionStrategy {
    pub fn new(cfg: VwapReversionConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let cap = cfg.vwap_window;
        Ok(Self {
            cfg,
            prices: VecDeque::with_capacity(cap + 1),
            vols: VecDeque::with_capacity(cap + 1),
            sum_pv: 0.0,
            sum_v: 0.0,
            sum_p: 0.0,
            sum_p2: 0.0,
            bars_seen: 0,
            in_pos: false,
            pos_qty: 0.0,
            entry_price: 0.0,
        })
    }

    pub fn from_params(params: &Value) -> Result<Self, ConfigError> {
        Self::new(VwapReversionConfig::from_params(params)?)
    }

    fn push(&mut self, price: f64, vol: f64) {
        if self.prices.len() == self.cfg.vwap_window {
            let old_p = self.prices.pop_front().unwrap_or(0.0);
            let old_v = self.vols.pop_front().unwrap_or(0.0);
            self.sum_pv -= old_p * old_v;
            self.sum_v -= old_v;
            self.sum_p -= old_p;
            self.sum_p2 -= old_p * old_p;
        }
        self.prices.push_back(price);
        self.vols.push_back(vol);
        self.sum_pv += price * vol;
        self.sum_v += vol;
        self.sum_p += price;
        self.sum_p2 += price * price;
    }

    fn vwap(&self) -> Option<f64> {
        if self.sum_v <= MIN_EFFECTIVE_VOL {
            return None;
        }
        Some(self.sum_pv / self.sum_v)
    }

    fn zscore(&self, price: f64) -> Option<f64> {
        let n = self.prices.len();
        if n < 2 {
            return None;
        }
        let mean = self.sum_p / n as f64;
        let var = (self.sum_p2 / n as f64 - mean * mean).max(0.0);
        let std = var.sqrt();
        if std <= 0.0 {
            return None;
        }
        Some((price - mean) / std)
    }

    fn close_long(
        &mut self,
        broker: &mut PaperBroker,
        executor: &mut MarketExecutor,
        symbol: &str,
        qty: f64,
        reason: &str,
    ) {
        executor.market_sell(broker, symbol, qty, reason);
        self.in_pos = false;
        self.pos_qty = 0.0;
        self.entry_price = 0.0;
    }
}

impl Strategy for VwapReversionStrategy {
    fn name(&self) -> &'static str {
        "vwap_reversion"
    }

    fn on_bar(
        &mut self,
        broker: &mut PaperBroker,
        executor: &mut MarketExecutor,
        symbol: &str,
        bar: &Bar,
    ) {
        let price = bar.close;
        let vol = if bar.volume < MIN_EFFECTIVE_VOL { 1.0 } else { bar.volume };
        self.push(price, vol);
        self.bars_seen += 1;

        if self.bars_seen < self.cfg.warmup {
            return;
        }

        if self.in_pos {
            let qty = {
                let held = broker.position_qty(symbol);
                if held > 0.0 {
                    held
                } else {
                    self.pos_qty
                }
            };
            if self.entry_price > 0.0 && qty > 0.0 {
                let pnl = (price - self.entry_price) / self.entry_price;
                if pnl >= self.cfg.take_profit_pct {
                    debug!(price, pnl, "vwap take profit");
                    self.close_long(broker, executor, symbol, qty, "take_profit");
                    return;
                }
                if pnl <= -self.cfg.stop_loss_pct {
                    debug!(price, pnl, "vwap stop loss");
                    self.close_long(broker, executor, symbol, qty, "stop_loss");
                    return;
                }
            }
        }

        let z = match self.zscore(price) {
            Some(z) if self.vwap().is_some() => z,
            _ => return,
        };

        if !self.in_pos {
            if z <= -self.cfg.z_entry.abs() {
                let notional = self.cfg.order_notional.min(broker.cash() * self.cfg.qty_frac);
                let qty = qty_from_notional(notional, price);
                if qty > 0.0 {
                    debug!(z, price, "vwap entry long");
                    executor.market_buy(broker, symbol, qty, "z_entry_long");
                    self.in_pos = true;
                    self.pos_qty = qty;
                    self.entry_price = price;
                }
            }
            return;
        }

        if z.abs() <= self.cfg.z_exit.abs() {
            let qty = {
                let held = broker.position_qty(symbol);
                if held > 0.0 {
                    held
                } else {
                    self.pos_qty
                }
            };
            if qty > 0.0
                && exit_clears_costs(
                    broker.cost_model(),
                    self.cfg.cost_exit_gate,
                    self.entry_price,
                    price,
                    qty,
                )
            {
                debug!(z, price, "vwap reversion complete");
                self.close_long(broker, executor, symbol, qty, "z_exit_close");
            }
        }
    }
}
