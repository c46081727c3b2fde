/// strategies/momentum.rs — Long-only momentum over micro-bars.
///
/// ─────────────────────────────────────────────────────────────────────────
/// DECISION LOGIC
/// ─────────────────────────────────────────────────────────────────────────
///
/// INDICATORS (per bar, over the close price window)
///   SMA        = mean(last lookback_ticks closes)
///   momentum   = (price − SMA) / SMA
///   volatility = sample stdev of returns over volatility_window
///   trend confirmation = sign agreement of short SMA vs long SMA
///                        (long window = 2 × lookback_ticks)
///   trend strength     = fraction of rising momentum over last 3 samples
///
/// ENTRY (flat → long), all must hold, in order:
///   1. flat-cooldown counter is zero
///   2. bars_since_exit ≥ cooldown_bars (dynamic after profitable exits)
///   3. min_volatility ≤ vol ≤ max_volatility
///   4. momentum > entry_threshold (dynamic under high volatility)
///   5. trend confirmation, when enabled
///   6. trend strength ≥ 0.6, when enabled
///   7. sized quantity > 0 from min(order_notional, cash · qty_frac)
///
/// EXIT (long → flat), evaluated strictly in this order each bar:
///   1. max-hold timeout, only if profit > +30 bps
///   2. stop-loss, only if profit > +30 bps (protection hold otherwise)
///   3. take-profit, only if profit ≥ min_profit_bps
///   4. momentum < −exit_threshold, only if profit ≥ min_profit_bps and
///      the exit clears round-trip costs (cost_exit_gate)
///
/// The +30 bps protection floor approximates Binance round-trip costs
/// (fees ~10 bps + slippage ~5 bps per side); exits below it would lose
/// money net even when gross-positive.
/// ─────────────────────────────────────────────────────────────────────────

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

/// Minimum profit (bps) below which protective exits hold the position.
const PROFIT_PROTECTION_BPS: f64 = 30.0;

#[derive(Debug, Clone)]
pub struct MomentumConfig {
    /// SMA window in bars.
    pub lookback_ticks: usize,
    /// Minimum momentum to enter.
    pub entry_threshold: f64,
    /// Momentum reversal level that triggers the natural exit.
    pub exit_threshold: f64,
    /// Ceiling on the fraction of cash committed per entry.
    pub qty_frac: f64,
    /// Fixed notional per order in quote currency.
    pub order_notional: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub volatility_window: usize,
    pub min_volatility: f64,
    pub max_volatility: f64,
    /// Bars to wait after an exit before re-entering.
    pub cooldown_bars: usize,
    /// Hard cap on bars held; effectively disabled by default.
    pub max_hold_bars: usize,
    /// Extra bars to stay flat after each exit (0 = off).
    pub flat_cooldown: usize,
    pub trend_confirmation: bool,
    /// Minimum profit (bps) required by take-profit and reversal exits.
    pub min_profit_bps: f64,
    // Dynamic modifiers, all off by default.
    pub use_dynamic_sl: bool,
    pub use_dynamic_tp: bool,
    pub use_dynamic_entry: bool,
    pub use_dynamic_cooldown: bool,
    pub use_dynamic_min_profit: bool,
    pub use_trend_strength: bool,
    /// Named switch for the exit profitability check (see
    /// `strategy::exit_clears_costs`).
    pub cost_exit_gate: bool,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            lookback_ticks: 50,
            entry_threshold: 0.0011,
            exit_threshold: 0.0008,
            qty_frac: 1.0,
            order_notional: 5.0,
            stop_loss_pct: 0.008,
            take_profit_pct: 0.015,
            volatility_window: 50,
            min_volatility: 0.0003,
            max_volatility: 0.015,
            cooldown_bars: 3,
            max_hold_bars: 9999,
            flat_cooldown: 0,
            trend_confirmation: true,
            min_profit_bps: 60.0,
            use_dynamic_sl: false,
            use_dynamic_tp: false,
            use_dynamic_entry: false,
            use_dynamic_cooldown: false,
            use_dynamic_min_profit: false,
            use_trend_strength: false,
            cost_exit_gate: true,
        }
    }
}

impl MomentumConfig {
    pub fn from_params(params: &Value) -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            lookback_ticks: param_usize(params, "lookback_ticks", d.lookback_ticks)?,
            entry_threshold: param_f64(params, "entry_threshold", d.entry_threshold)?,
            exit_threshold: param_f64(params, "exit_threshold", d.exit_threshold)?,
            qty_frac: param_f64(params, "qty_frac", d.qty_frac)?,
            order_notional: param_f64(params, "order_notional", d.order_notional)?,
            stop_loss_pct: param_f64(params, "stop_loss_pct", d.stop_loss_pct)?,
            take_profit_pct: param_f64(params, "take_profit_pct", d.take_profit_pct)?,
            volatility_window: param_usize(params, "volatility_window", d.volatility_window)?,
            min_volatility: param_f64(params, "min_volatility", d.min_volatility)?,
            max_volatility: param_f64(params, "max_volatility", d.max_volatility)?,
            cooldown_bars: param_usize(params, "cooldown_bars", d.cooldown_bars)?,
            max_hold_bars: param_usize(params, "max_hold_bars", d.max_hold_bars)?,
            flat_cooldown: param_usize(params, "flat_cooldown", d.flat_cooldown)?,
            trend_confirmation: param_bool(params, "trend_confirmation", d.trend_confirmation)?,
            min_profit_bps: param_f64(params, "min_profit_bps", d.min_profit_bps)?,
            use_dynamic_sl: param_bool(params, "use_dynamic_sl", d.use_dynamic_sl)?,
            use_dynamic_tp: param_bool(params, "use_dynamic_tp", d.use_dynamic_tp)?,
            use_dynamic_entry: param_bool(params, "use_dynamic_entry", d.use_dynamic_entry)?,
            use_dynamic_cooldown: param_bool(
                params,
                "use_dynamic_cooldown",
                d.use_dynamic_cooldown,
            )?,
            use_dynamic_min_profit: param_bool(
                params,
                "use_dynamic_min_profit",
                d.use_dynamic_min_profit,
            )?,
            use_trend_strength: param_bool(params, "use_trend_strength", d.use_trend_strength)?,
            cost_exit_gate: param_bool(params, "cost_exit_gate", d.cost_exit_gate)?,
        })
    }

    /// Incoherent parameter combinations are fatal at construction.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.lookback_ticks < 10 {
            return Err(ConfigError::invalid("lookback_ticks", "too short (< 10)"));
        }
        if self.lookback_ticks > 200 {
            return Err(ConfigError::invalid("lookback_ticks", "too long (> 200)"));
        }
        if self.entry_threshold <= 0.0 {
            return Err(ConfigError::invalid("entry_threshold", "must be positive"));
        }
        if self.entry_threshold > 0.01 {
            return Err(ConfigError::invalid("entry_threshold", "too high (> 1%)"));
        }
        if self.exit_threshold <= 0.0 {
            return Err(ConfigError::invalid("exit_threshold", "must be positive"));
        }
        if self.exit_threshold > self.entry_threshold {
            return Err(ConfigError::invalid(
                "exit_threshold",
                format!("{} exceeds entry_threshold {}", self.exit_threshold, self.entry_threshold),
            ));
        }
        if self.stop_loss_pct <= 0.0 {
            return Err(ConfigError::invalid("stop_loss_pct", "must be positive"));
        }
        if self.stop_loss_pct > 0.1 {
            return Err(ConfigError::invalid("stop_loss_pct", "too high (> 10%)"));
        }
        if self.take_profit_pct <= 0.0 {
            return Err(ConfigError::invalid("take_profit_pct", "must be positive"));
        }
        if self.take_profit_pct < self.stop_loss_pct {
            return Err(ConfigError::invalid(
                "take_profit_pct",
                format!("{} below stop_loss_pct {}", self.take_profit_pct, self.stop_loss_pct),
            ));
        }
        if self.take_profit_pct > 0.2 {
            return Err(ConfigError::invalid("take_profit_pct", "unrealistic (> 20%)"));
        }
        if self.min_volatility >= self.max_volatility {
            return Err(ConfigError::invalid(
                "min_volatility",
                format!("{} >= max_volatility {}", self.min_volatility, self.max_volatility),
            ));
        }
        if self.min_profit_bps < 20.0 {
            return Err(ConfigError::invalid(
                "min_profit_bps",
                "too low (< 20 bps), does not cover costs",
            ));
        }
        if self.min_profit_bps > 200.0 {
            return Err(ConfigError::invalid("min_profit_bps", "unrealistic (> 200 bps)"));
        }
        if self.qty_frac <= 0.0 || self.qty_frac > 1.0 {
            return Err(ConfigError::invalid("qty_frac", "must be in (0, 1]"));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct MomentumStrategy {
    cfg: MomentumConfig,

    price_window: VecDeque<f64>,
    momentum_history: VecDeque<f64>,
    in_pos: bool,
    pos_qty: f64,
    entry_price: f64,
    bars_since_exit: usize,
    bars_in_pos: usize,
    total_bars: u64,
    flat_counter: usize,
    /// Profit of the last closed trade, in bps.
    last_profit_bps: f64,
}

impl MomentumStrategy {
    pub fn new(cfg: MomentumConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let window_cap = cfg.lookback_ticks.max(cfg.volatility_window);
        Ok(Self {
            cfg,
            price_window: VecDeque::with_capacity(window_cap + 1),
            momentum_history: VecDeque::with_capacity(10),
            in_pos: false,
            pos_qty: 0.0,
            entry_price: 0.0,
            bars_since_exit: 0,
            bars_in_pos: 0,
            total_bars: 0,
            flat_counter: 0,
            last_profit_bps: 0.0,
        })
    }

    pub fn from_params(params: &Value) -> Result<Self, ConfigError> {
        Self::new(MomentumConfig::from_params(params)?)
    }

    // ── Indicators ────────────────────────────────────────────────────────

    fn window_cap(&self) -> usize {
        self.cfg.lookback_ticks.max(self.cfg.volatility_window)
    }

    fn sma(&self, n: usize) -> f64 {
        let len = self.price_window.len();
        let take = n.min(len);
        if take == 0 {
            return 0.0;
        }
        self.price_window.iter().skip(len - take).sum::<f64>() / take as f64
    }

    fn volatility(&self) -> f64 {
        let len = self.price_window.len();
        let take = self.cfg.volatility_window.min(len);
        let prices: Vec<f64> = self.price_window.iter().skip(len - take).copied().collect();
        crate::strategy::return_volatility(&prices)
    }

    /// Fraction of rising momentum over the last three samples.
    fn trend_strength(&self) -> f64 {
        if self.momentum_history.len() < 3 {
            return 0.5;
        }
        let recent: Vec<f64> =
            self.momentum_history.iter().rev().take(3).rev().copied().collect();
        let increasing = recent.windows(2).filter(|w| w[1] > w[0]).count();
        increasing as f64 / recent.len() as f64
    }

    /// Short SMA vs long SMA (2×lookback) alignment with the intent side.
    fn trend_confirmed(&self, momentum: f64, short_mean: f64) -> bool {
        let long_n = self.cfg.lookback_ticks * 2;
        if self.price_window.len() < long_n {
            return true; // not enough history to judge, allow
        }
        let long_mean = self.sma(long_n);
        if momentum > 0.0 {
            short_mean > long_mean
        } else {
            short_mean < long_mean
        }
    }

    // ── Dynamic modifiers ─────────────────────────────────────────────────

    /// Low vol tightens the stop, high vol widens it (±20%).
    fn dynamic_sl(&self, volatility: f64) -> f64 {
        if !self.cfg.use_dynamic_sl {
            return self.cfg.stop_loss_pct;
        }
        let vol_ratio = volatility / 0.001;
        let factor = (1.0 + (vol_ratio - 1.0) * 0.2).clamp(0.8, 1.2);
        self.cfg.stop_loss_pct * factor
    }

    /// Low vol stretches the target, high vol shortens it.
    fn dynamic_tp(&self, volatility: f64) -> f64 {
        if !self.cfg.use_dynamic_tp {
            return self.cfg.take_profit_pct;
        }
        let vol_ratio = volatility / 0.001;
        let factor = (2.0 - vol_ratio).clamp(0.67, 1.5);
        self.cfg.take_profit_pct * factor
    }

    /// Entry threshold tightens under high volatility, relaxes in calm.
    fn dynamic_entry_threshold(&self, volatility: f64) -> f64 {
        if !self.cfg.use_dynamic_entry {
            return self.cfg.entry_threshold;
        }
        if volatility > 0.01 {
            self.cfg.entry_threshold * 1.5
        } else if volatility < 0.0005 {
            self.cfg.entry_threshold * 0.7
        } else {
            self.cfg.entry_threshold
        }
    }

    /// Shorter cooldown after strongly profitable exits.
    fn dynamic_cooldown(&self) -> usize {
        if !self.cfg.use_dynamic_cooldown || self.last_profit_bps == 0.0 {
            return self.cfg.cooldown_bars;
        }
        if self.last_profit_bps > 100.0 {
            1
        } else if self.last_profit_bps > 50.0 {
            2
        } else if self.last_profit_bps > 30.0 {
            3
        } else {
            5
        }
    }

    /// Minimum exit profit derived from estimated costs of this order size.
    fn dynamic_min_profit(&self, notional: f64) -> f64 {
        if !self.cfg.use_dynamic_min_profit {
            return self.cfg.min_profit_bps;
        }
        let fees_bps = 10.0;
        let slippage_bps = 5.0 + ((notional / 50_000.0) * 10.0).min(10.0);
        let safety_margin = 5.0;
        fees_bps + slippage_bps + safety_margin
    }

    // ── Position bookkeeping ──────────────────────────────────────────────

    fn close_long(
        &mut self,
        broker: &mut PaperBroker,
        executor: &mut MarketExecutor,
        symbol: &str,
        price: f64,
        qty: f64,
        reason: &str,
    ) {
        executor.market_sell(broker, symbol, qty, reason);
        let profit_pct = (price - self.entry_price) / self.entry_price;
        self.last_profit_bps = profit_pct * 10_000.0;
        self.in_pos = false;
        self.pos_qty = 0.0;
        self.bars_in_pos = 0;
        self.bars_since_exit = 0;
        self.flat_counter = self.cfg.flat_cooldown;
    }

    fn profit_bps(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        (price - self.entry_price) / self.entry_price * 10_000.0
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &'static str {
        "momentum"
    }

    fn on_bar(
        &mut self,
        broker: &mut PaperBroker,
        executor: &mut MarketExecutor,
        symbol: &str,
        bar: &Bar,
    ) {
        let price = bar.close;
        self.price_window.push_back(price);
        if self.price_window.len() > self.window_cap() {
            self.price_window.pop_front();
        }
        self.total_bars += 1;
        if !self.in_pos {
            self.bars_since_exit += 1;
        }

        // Warmup
        if self.price_window.len() < self.cfg.lookback_ticks {
            return;
        }

        let mean = self.sma(self.cfg.lookback_ticks);
        if mean <= 0.0 {
            return;
        }
        let momentum = (price - mean) / mean;
        self.momentum_history.push_back(momentum);
        if self.momentum_history.len() > 10 {
            self.momentum_history.pop_front();
        }
        let volatility = self.volatility();

        let cash = broker.cash();
        let current_qty = broker.position_qty(symbol);

        let dynamic_sl = self.dynamic_sl(volatility);
        let dynamic_tp = self.dynamic_tp(volatility);
        let dynamic_entry = self.dynamic_entry_threshold(volatility);
        let available_cash = (cash * self.cfg.qty_frac).max(0.0);
        let notional = self.cfg.order_notional.min(available_cash);
        let dynamic_min_profit = self.dynamic_min_profit(notional);
        let trend_strength = self.trend_strength();

        // ── Open position management ──────────────────────────────────────
        if self.in_pos {
            self.bars_in_pos += 1;
            let qty = if current_qty > 0.0 { current_qty } else { self.pos_qty };
            let profit_bps = self.profit_bps(price);

            // 1. Max-hold timeout
            if self.bars_in_pos >= self.cfg.max_hold_bars {
                if qty > 0.0 && profit_bps > PROFIT_PROTECTION_BPS {
                    debug!(bars = self.bars_in_pos, "max hold reached, closing");
                    self.close_long(broker, executor, symbol, price, qty, "max_hold");
                }
                return;
            }

            // 2. Stop loss (held below the protection floor)
            if (price - self.entry_price) / self.entry_price < -dynamic_sl {
                if qty > 0.0 && profit_bps > PROFIT_PROTECTION_BPS {
                    debug!(price, entry = self.entry_price, "stop loss");
                    self.close_long(broker, executor, symbol, price, qty, "stop_loss");
                } else {
                    debug!(profit_bps, "stop hit but profit below protection, holding");
                }
                return;
            }

            // 3. Take profit
            if (price - self.entry_price) / self.entry_price > dynamic_tp {
                if qty > 0.0
                    && profit_bps >= dynamic_min_profit
                    && profit_bps > PROFIT_PROTECTION_BPS
                {
                    debug!(price, entry = self.entry_price, "take profit");
                    self.close_long(broker, executor, symbol, price, qty, "take_profit");
                }
                return;
            }

            // 4. Momentum reversal
            if momentum < -self.cfg.exit_threshold {
                if qty > 0.0
                    && profit_bps > PROFIT_PROTECTION_BPS
                    && profit_bps >= dynamic_min_profit
                    && exit_clears_costs(
                        broker.cost_model(),
                        self.cfg.cost_exit_gate,
                        self.entry_price,
                        price,
                        qty,
                    )
                {
                    debug!(momentum, "momentum reversal exit");
                    self.close_long(broker, executor, symbol, price, qty, "momentum_reversal");
                }
                return;
            }
            return;
        }

        // ── Entry evaluation ──────────────────────────────────────────────

        // 1. Flat cooldown
        if self.flat_counter > 0 {
            self.flat_counter -= 1;
            return;
        }

        // 2. Cooldown since last exit
        if self.bars_since_exit < self.dynamic_cooldown() {
            return;
        }

        // 3. Volatility band
        if volatility < self.cfg.min_volatility || volatility > self.cfg.max_volatility {
            return;
        }

        // 4. Momentum threshold
        if momentum <= dynamic_entry {
            return;
        }

        // 5. Trend confirmation
        if self.cfg.trend_confirmation && !self.trend_confirmed(momentum, mean) {
            return;
        }

        // 6. Trend strength
        if self.cfg.use_trend_strength && trend_strength < 0.6 {
            return;
        }

        // 7. Sizing
        let qty = qty_from_notional(notional, price);
        if qty > 0.0 {
            debug!(price, qty, momentum, "entry");
            executor.market_buy(broker, symbol, qty, "entry");
            self.in_pos = true;
            self.pos_qty = qty;
            self.entry_price = price;
            self.bars_since_exit = 0;
        }
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

    fn test_cfg() -> MomentumConfig {
        MomentumConfig {
            lookback_ticks: 10,
            volatility_window: 10,
            entry_threshold: 0.002,
            exit_threshold: 0.001,
            min_volatility: 0.0,
            max_volatility: 0.05,
            cooldown_bars: 0,
            trend_confirmation: false,
            order_notional: 100.0,
            stop_loss_pct: 0.01,
            take_profit_pct: 0.02,
            min_profit_bps: 30.0,
            ..MomentumConfig::default()
        }
    }

    fn rig(cash: f64) -> (PaperBroker, MarketExecutor) {
        (PaperBroker::new(cash, CostModel::fixed(0.0, 0.0)), MarketExecutor::new())
    }

    /// Warm the window with flat prices, then jump: momentum over the SMA
    /// clears the threshold deterministically.
    fn enter_long(strategy: &mut MomentumStrategy, broker: &mut PaperBroker,
                  executor: &mut MarketExecutor) -> f64 {
        for i in 0..10 {
            broker.mark("BTCUSDT", 100.0, i);
            strategy.on_bar(broker, executor, "BTCUSDT", &bar(100.0, i));
        }
        assert!(!strategy.in_pos, "no entry during warmup / flat prices");
        broker.mark("BTCUSDT", 102.0, 10);
        strategy.on_bar(broker, executor, "BTCUSDT", &bar(102.0, 10));
        assert!(strategy.in_pos, "jump bar should trigger entry");
        102.0
    }

    #[test]
    fn validation_rejects_incoherent_params() {
        let bad = MomentumConfig { exit_threshold: 0.01, entry_threshold: 0.001,
                                   ..MomentumConfig::default() };
        assert!(MomentumStrategy::new(bad).is_err());

        let bad = MomentumConfig { take_profit_pct: 0.004, stop_loss_pct: 0.008,
                                   ..MomentumConfig::default() };
        assert!(MomentumStrategy::new(bad).is_err());

        let bad = MomentumConfig { min_volatility: 0.02, max_volatility: 0.01,
                                   ..MomentumConfig::default() };
        assert!(MomentumStrategy::new(bad).is_err());

        let bad = MomentumConfig { min_profit_bps: 10.0, ..MomentumConfig::default() };
        assert!(MomentumStrategy::new(bad).is_err());

        let bad = MomentumConfig { lookback_ticks: 5, ..MomentumConfig::default() };
        assert!(MomentumStrategy::new(bad).is_err());

        let bad = MomentumConfig { qty_frac: 1.5, ..MomentumConfig::default() };
        assert!(MomentumStrategy::new(bad).is_err());
    }

    #[test]
    fn enters_long_on_momentum_jump() {
        let mut s = MomentumStrategy::new(test_cfg()).unwrap();
        let (mut broker, mut executor) = rig(10_000.0);
        enter_long(&mut s, &mut broker, &mut executor);
        assert!(broker.position_qty("BTCUSDT") > 0.0);
        let executed = executor.drain_executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].reason, "entry");
    }

    #[test]
    fn stop_loss_protection_holds_losing_position() {
        // In long at ~102, stop_loss 1%, price falls 1.1%: the stop fires
        // but profit < +30 bps, so the strategy must hold, not sell.
        let mut s = MomentumStrategy::new(test_cfg()).unwrap();
        let (mut broker, mut executor) = rig(10_000.0);
        let entry = enter_long(&mut s, &mut broker, &mut executor);
        executor.drain_executed();
        let pos_before = broker.position_qty("BTCUSDT");

        let crash = entry * 0.989; // −1.1%
        broker.mark("BTCUSDT", crash, 11);
        s.on_bar(&mut broker, &mut executor, "BTCUSDT", &bar(crash, 11));

        assert!(s.in_pos, "protection must hold the position");
        assert_eq!(broker.position_qty("BTCUSDT"), pos_before);
        assert!(executor.drain_executed().is_empty(), "no trade row for a held position");
    }

    #[test]
    fn take_profit_exits_when_above_min_profit() {
        let mut s = MomentumStrategy::new(test_cfg()).unwrap();
        let (mut broker, mut executor) = rig(10_000.0);
        let entry = enter_long(&mut s, &mut broker, &mut executor);
        executor.drain_executed();

        let pump = entry * 1.025; // +2.5% > tp 2%, profit 250 bps > 30 bps
        broker.mark("BTCUSDT", pump, 11);
        s.on_bar(&mut broker, &mut executor, "BTCUSDT", &bar(pump, 11));

        assert!(!s.in_pos);
        assert_eq!(broker.position_qty("BTCUSDT"), 0.0);
        let executed = executor.drain_executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].reason, "take_profit");
        assert!(s.last_profit_bps > 30.0);
    }

    #[test]
    fn reversal_exit_respects_cost_gate() {
        // Gate enabled with brutal fees (100 bps): a +40 bps reversal exit
        // is gross-positive but net-negative and must be skipped.
        let mut cfg = test_cfg();
        cfg.take_profit_pct = 0.19; // keep take-profit out of the way
        let mut s = MomentumStrategy::new(cfg).unwrap();
        let mut broker = PaperBroker::new(10_000.0, CostModel::fixed(100.0, 0.0));
        let mut executor = MarketExecutor::new();
        let entry = enter_long(&mut s, &mut broker, &mut executor);
        executor.drain_executed();

        // Drive the SMA up so a later profitable price reads as reversal.
        for i in 11..25 {
            let up = entry * 1.05;
            broker.mark("BTCUSDT", up, i);
            s.on_bar(&mut broker, &mut executor, "BTCUSDT", &bar(up, i));
            assert!(s.in_pos, "neither stop nor tp should fire on the way up");
        }

        // +40 bps over entry, far below the SMA → momentum < −exit_threshold.
        let px = entry * 1.004;
        broker.mark("BTCUSDT", px, 25);
        s.on_bar(&mut broker, &mut executor, "BTCUSDT", &bar(px, 25));

        assert!(s.in_pos, "cost gate must block the net-negative exit");
        assert!(executor.drain_executed().is_empty());

        // Same setup with the gate disabled exits immediately.
        let mut cfg = test_cfg();
        cfg.take_profit_pct = 0.19;
        cfg.cost_exit_gate = false;
        let mut s2 = MomentumStrategy::new(cfg).unwrap();
        let mut broker2 = PaperBroker::new(10_000.0, CostModel::fixed(100.0, 0.0));
        let mut executor2 = MarketExecutor::new();
        let entry2 = enter_long(&mut s2, &mut broker2, &mut executor2);
        executor2.drain_executed();
        for i in 11..25 {
            let up = entry2 * 1.05;
            broker2.mark("BTCUSDT", up, i);
            s2.on_bar(&mut broker2, &mut executor2, "BTCUSDT", &bar(up, i));
        }
        let px2 = entry2 * 1.004;
        broker2.mark("BTCUSDT", px2, 25);
        s2.on_bar(&mut broker2, &mut executor2, "BTCUSDT", &bar(px2, 25));
        assert!(!s2.in_pos);
        let executed = executor2.drain_executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].reason, "momentum_reversal");
    }

    #[test]
    fn flat_cooldown_blocks_reentry() {
        let mut cfg = test_cfg();
        cfg.flat_cooldown = 3;
        let mut s = MomentumStrategy::new(cfg).unwrap();
        let (mut broker, mut executor) = rig(10_000.0);
        let entry = enter_long(&mut s, &mut broker, &mut executor);

        let pump = entry * 1.025;
        broker.mark("BTCUSDT", pump, 11);
        s.on_bar(&mut broker, &mut executor, "BTCUSDT", &bar(pump, 11));
        assert!(!s.in_pos);
        assert_eq!(s.flat_counter, 3);

        // Another jump immediately: flat cooldown must swallow it.
        let jump = pump * 1.03;
        broker.mark("BTCUSDT", jump, 12);
        s.on_bar(&mut broker, &mut executor, "BTCUSDT", &bar(jump, 12));
        assert!(!s.in_pos);
        assert_eq!(s.flat_counter, 2);
    }

    #[test]
    fn dynamic_modifiers_stay_within_bounds() {
        let mut cfg = test_cfg();
        cfg.use_dynamic_sl = true;
        cfg.use_dynamic_tp = true;
        cfg.use_dynamic_entry = true;
        let s = MomentumStrategy::new(cfg.clone()).unwrap();

        // SL factor clamps to [0.8, 1.2]
        assert!((s.dynamic_sl(0.0) - cfg.stop_loss_pct * 0.8).abs() < 1e-12);
        assert!((s.dynamic_sl(1.0) - cfg.stop_loss_pct * 1.2).abs() < 1e-12);
        // TP factor clamps to [0.67, 1.5]
        assert!((s.dynamic_tp(0.0) - cfg.take_profit_pct * 1.5).abs() < 1e-12);
        assert!((s.dynamic_tp(1.0) - cfg.take_profit_pct * 0.67).abs() < 1e-12);
        // Entry tightens in panic, relaxes in calm
        assert!(s.dynamic_entry_threshold(0.02) > cfg.entry_threshold);
        assert!(s.dynamic_entry_threshold(0.0001) < cfg.entry_threshold);
    }

    #[test]
    fn dynamic_cooldown_tracks_last_profit() {
        let mut cfg = test_cfg();
        cfg.use_dynamic_cooldown = true;
        cfg.cooldown_bars = 4;
        let mut s = MomentumStrategy::new(cfg).unwrap();
        assert_eq!(s.dynamic_cooldown(), 4, "no trade yet → configured value");
        s.last_profit_bps = 150.0;
        assert_eq!(s.dynamic_cooldown(), 1);
        s.last_profit_bps = 60.0;
        assert_eq!(s.dynamic_cooldown(), 2);
        s.last_profit_bps = 10.0;
        assert_eq!(s.dynamic_cooldown(), 5);
    }
}
