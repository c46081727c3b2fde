/// strategy.rs — Strategy contract, registry and shared indicator math.
///
/// The engine invokes `on_bar(broker, executor, symbol, bar)` once per
/// closed micro-bar. Strategies keep their own rolling state, read broker
/// state (cash, position) and emit orders only through the executor —
/// never by mutating the broker directly.
///
/// Strategies are resolved by name through `build_strategy`, which maps a
/// registered name to a constructor over a JSON params object and fails
/// fast on unknown names.

use serde_json::Value;

use crate::broker::PaperBroker;
use crate::costs::CostModel;
use crate::error::ConfigError;
use crate::executor::MarketExecutor;
use crate::strategies::buy_and_hold::BuyAndHoldStrategy;
use crate::strategies::momentum::MomentumStrategy;
use crate::strategies::vol_breakout::VolBreakoutStrategy;
use crate::strategies::vwap_reversion::VwapReversionStrategy;
use crate::types::Bar;

pub trait Strategy: Send + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Called once per closed bar, in bar order.
    fn on_bar(
        &mut self,
        broker: &mut PaperBroker,
        executor: &mut MarketExecutor,
        symbol: &str,
        bar: &Bar,
    );

    /// Session lifecycle hooks.
    fn on_start(&mut self) {}
    fn on_end(&mut self) {}
}

// ── Registry ──────────────────────────────────────────────────────────────

const STRATEGIES: &[&str] = &["buy_and_hold", "momentum", "vol_breakout", "vwap_reversion"];

pub fn list_strategies() -> &'static [&'static str] {
    STRATEGIES
}

/// Resolve a registered strategy name and instantiate it with the parsed
/// params mapping. Unknown names are a startup error.
pub fn build_strategy(name: &str, params: &Value) -> Result<Box<dyn Strategy>, ConfigError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "buy_and_hold" => Ok(Box::new(BuyAndHoldStrategy::from_params(params)?)),
        "momentum" => Ok(Box::new(MomentumStrategy::from_params(params)?)),
        "vol_breakout" => Ok(Box::new(VolBreakoutStrategy::from_params(params)?)),
        "vwap_reversion" => Ok(Box::new(VwapReversionStrategy::from_params(params)?)),
        _ => Err(ConfigError::UnknownStrategy {
            name: name.to_owned(),
            available: STRATEGIES.join(", "),
        }),
    }
}

// ── Params helpers ────────────────────────────────────────────────────────

pub(crate) fn param_f64(params: &Value, key: &str, default: f64) -> Result<f64, ConfigError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_f64()
            .ok_or_else(|| ConfigError::BadParams(format!("'{key}' must be a number, got {v}"))),
    }
}

pub(crate) fn param_usize(params: &Value, key: &str, default: usize) -> Result<usize, ConfigError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| ConfigError::BadParams(format!("'{key}' must be an integer, got {v}"))),
    }
}

pub(crate) fn param_bool(params: &Value, key: &str, default: bool) -> Result<bool, ConfigError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| ConfigError::BadParams(format!("'{key}' must be a boolean, got {v}"))),
    }
}

// ── Indicator math ────────────────────────────────────────────────────────

pub fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    x.max(lo).min(hi)
}

pub fn simple_moving_average(window: &[f64]) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    window.iter().sum::<f64>() / window.len() as f64
}

/// Sample standard deviation of simple returns over a price window.
pub fn return_volatility(prices: &[f64]) -> f64 {
    if prices.len() < 3 {
        return 0.0;
    }
    let returns: Vec<f64> = prices
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
        / (returns.len() - 1) as f64;
    var.sqrt()
}

/// Z-score of the last element against the window (sample stdev).
pub fn zscore(window: &[f64]) -> f64 {
    let n = window.len();
    if n < 2 {
        return 0.0;
    }
    let mean = window.iter().sum::<f64>() / n as f64;
    let var = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let sd = var.sqrt();
    if sd == 0.0 {
        return 0.0;
    }
    (window[n - 1] - mean) / sd
}

/// Mean true range over the last `n` bars.
pub fn atr_like(highs: &[f64], lows: &[f64], closes: &[f64], n: usize) -> f64 {
    let len = highs.len().min(lows.len()).min(closes.len());
    if len < 2 {
        return 0.0;
    }
    let mut trs = Vec::with_capacity(len - 1);
    for i in 1..len {
        let (h, l, pc) = (highs[i], lows[i], closes[i - 1]);
        trs.push((h - l).max((h - pc).abs()).max((l - pc).abs()));
    }
    let take = n.min(trs.len()).max(1);
    trs[trs.len() - take..].iter().sum::<f64>() / take as f64
}

/// One EMA step; seeds with `x` when there is no previous value.
pub fn ema(prev: Option<f64>, x: f64, alpha: f64) -> f64 {
    match prev {
        None => x,
        Some(p) => {
            let a = clamp(alpha, 0.0, 1.0);
            a * x + (1.0 - a) * p
        }
    }
}

pub fn qty_from_notional(notional: f64, price: f64) -> f64 {
    if price <= 0.0 {
        return 0.0;
    }
    (notional / price).max(0.0)
}

// ── Edge vs cost gate ─────────────────────────────────────────────────────

/// Would closing a long at `current_price` be non-negative net of the
/// round-trip costs? With `gate_enabled = false` the check is bypassed —
/// an explicit configuration choice, surfaced as the `cost_exit_gate`
/// strategy parameter.
pub fn exit_clears_costs(
    cost_model: &CostModel,
    gate_enabled: bool,
    entry_price: f64,
    current_price: f64,
    qty: f64,
) -> bool {
    if !gate_enabled {
        return true;
    }
    if entry_price <= 0.0 || qty <= 0.0 {
        return false;
    }
    let gross = (current_price - entry_price) * qty;
    let notional = current_price * qty;
    let cost = cost_model.round_trip_cost_bps(notional) / 10_000.0 * notional;
    gross - cost >= 0.0
}
