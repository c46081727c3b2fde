/// costs.rs — Fees and slippage applied to simulated fills.
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
/// EFFECTIVE PRICE
///   BUY pushes the fill price up, SELL down:
///     P_eff = P_base × (1 ± slip_bps / 10_000)
///
/// SLIPPAGE (bps)
///   Fixed:    slip_bps = constant
///   Dynamic:  slip_bps = base + α·σ·10_000 + β·min(5, notional / 10_000)
///             capped at 80 bps
///   where base = half the rolling mean top-of-book spread (bps) from the
///   spread tracker, falling back to 5 bps when no samples exist or the
///   spread reads below 0.5 bps, and σ is the latest per-bar return
///   volatility fed in by the engine.
///
/// FEE
///   fee = |notional| × fee_bps(role) / 10_000
///   Maker (resting limit) and taker (market) rates may differ; the
///   single-rate constructor collapses them.
///
/// ROUND TRIP
///   C_bps = 2 × taker_fee_bps + 2 × slip_bps(notional)
///   Used by strategies as the edge-vs-cost gate before submitting.
/// ─────────────────────────────────────────────────────────────────────────

use crate::spread::SpreadHandle;
use crate::types::{Role, Side};

/// Fallback base slippage when the spread tracker has no usable data.
pub const FALLBACK_SLIP_BPS: f64 = 5.0;
/// Hard cap on dynamic slippage.
pub const MAX_SLIP_BPS: f64 = 80.0;
/// Spreads below this are treated as unreliable testnet quotes.
const MIN_USABLE_SPREAD_BPS: f64 = 0.5;

#[derive(Debug, Clone)]
enum SlippageModel {
    Fixed { slip_bps: f64 },
    Dynamic { spread: SpreadHandle, alpha: f64, beta: f64 },
}

/// Value-type cost configuration owned by the broker and consulted by
/// strategies for pre-trade edge-vs-cost checks. No global state.
#[derive(Debug, Clone)]
pub struct CostModel {
    maker_fee_bps: f64,
    taker_fee_bps: f64,
    slippage: SlippageModel,
    /// Latest per-bar return volatility (fraction), engine-fed.
    volatility: f64,
}

impl CostModel {
    /// Single fee rate for both roles and a fixed slippage.
    pub fn fixed(fee_bps: f64, slip_bps: f64) -> Self {
        Self {
            maker_fee_bps: fee_bps,
            taker_fee_bps: fee_bps,
            slippage: SlippageModel::Fixed { slip_bps },
            volatility: 0.0,
        }
    }

    /// Distinct maker/taker fees with a fixed slippage.
    pub fn with_roles(maker_fee_bps: f64, taker_fee_bps: f64, slip_bps: f64) -> Self {
        Self {
            maker_fee_bps,
            taker_fee_bps,
            slippage: SlippageModel::Fixed { slip_bps },
            volatility: 0.0,
        }
    }

    /// Dynamic slippage driven by the spread tracker plus volatility and
    /// order-size terms.
    pub fn dynamic(fee_bps: f64, spread: SpreadHandle, alpha: f64, beta: f64) -> Self {
        Self {
            maker_fee_bps: fee_bps,
            taker_fee_bps: fee_bps,
            slippage: SlippageModel::Dynamic { spread, alpha, beta },
            volatility: 0.0,
        }
    }

    pub fn fee_bps(&self, role: Role) -> f64 {
        match role {
            Role::Maker => self.maker_fee_bps,
            Role::Taker => self.taker_fee_bps,
        }
    }

    /// Engine hook: note the latest per-bar return volatility so the
    /// dynamic model can widen under turbulence.
    pub fn update_volatility(&mut self, volatility: f64) {
        if volatility.is_finite() && volatility >= 0.0 {
            self.volatility = volatility;
        }
    }

    /// Slippage in bps for an order of the given notional.
    pub fn slip_bps(&self, notional: f64) -> f64 {
        match &self.slippage {
            SlippageModel::Fixed { slip_bps } => *slip_bps,
            SlippageModel::Dynamic { spread, alpha, beta } => {
                let base = match spread.latest_bps() {
                    Some(s) if s >= MIN_USABLE_SPREAD_BPS => s * 0.5,
                    _ => FALLBACK_SLIP_BPS,
                };
                let vol_term = alpha * self.volatility * 10_000.0;
                let size_term = beta * (notional.abs() / 10_000.0).min(5.0);
                (base + vol_term + size_term).min(MAX_SLIP_BPS)
            }
        }
    }

    /// Fill price after slippage. BUY up, SELL down.
    pub fn effective_price(&self, base_price: f64, side: Side, _role: Role, notional: f64) -> f64 {
        let rate = self.slip_bps(notional) / 10_000.0;
        match side {
            Side::Buy => base_price * (1.0 + rate),
            Side::Sell => base_price * (1.0 - rate),
        }
    }

    /// Absolute fee for a fill of the given notional.
    pub fn fee_amount(&self, notional: f64, role: Role) -> f64 {
        notional.abs() * self.fee_bps(role) / 10_000.0
    }

    /// Expected round-trip cost (entry taker + exit taker + both slips).
    pub fn round_trip_cost_bps(&self, notional: f64) -> f64 {
        2.0 * self.taker_fee_bps + 2.0 * self.slip_bps(notional)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn buy_up_sell_down() {
        let cm = CostModel::fixed(10.0, 5.0);
        let buy = cm.effective_price(100.0, Side::Buy, Role::Taker, 100.0);
        let sell = cm.effective_price(100.0, Side::Sell, Role::Taker, 100.0);
        assert_relative_eq!(buy, 100.0 * 1.0005, epsilon = 1e-12);
        assert_relative_eq!(sell, 100.0 * 0.9995, epsilon = 1e-12);
    }

    #[test]
    fn fee_scales_with_notional_and_role() {
        let cm = CostModel::with_roles(2.0, 5.0, 0.0);
        assert_relative_eq!(cm.fee_amount(10_000.0, Role::Maker), 2.0, epsilon = 1e-12);
        assert_relative_eq!(cm.fee_amount(10_000.0, Role::Taker), 5.0, epsilon = 1e-12);
        // fees are always non-negative
        assert_relative_eq!(cm.fee_amount(-10_000.0, Role::Taker), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn dynamic_slip_caps_at_80_bps() {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let tracker = crate::spread::SpreadTracker::spawn(rx, 4);
        let mut cm = CostModel::dynamic(10.0, tracker.handle(), 1.0, 1.0);
        cm.update_volatility(0.5); // absurd vol → hits the cap
        assert_relative_eq!(cm.slip_bps(1e9), MAX_SLIP_BPS, epsilon = 1e-12);
    }

    #[test]
    fn dynamic_falls_back_without_samples() {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let tracker = crate::spread::SpreadTracker::spawn(rx, 4);
        let cm = CostModel::dynamic(10.0, tracker.handle(), 0.0, 0.0);
        assert_relative_eq!(cm.slip_bps(100.0), FALLBACK_SLIP_BPS, epsilon = 1e-12);
    }

    #[test]
    fn round_trip_covers_both_legs() {
        let cm = CostModel::fixed(10.0, 5.0);
        assert_relative_eq!(cm.round_trip_cost_bps(100.0), 30.0, epsilon = 1e-12);
    }
}
