/// metrics.rs — Performance Metrics
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
/// SHARPE RATIO (per-bar)
///   r̄  = mean(bar returns)
///   σ_r = sample std(bar returns)
///   SR  = (r̄ − r_f) / σ_r          r_f = 0 for crypto
///
/// SORTINO RATIO
///   Penalises only downside volatility:
///   σ_d = std(negative returns)     (population form over the losers)
///   SoR = (r̄ − r_f) / σ_d           +∞ when there are no losing bars
///
/// MAXIMUM DRAWDOWN
///   peak_t = max_{s ≤ t}(E_s)
///   DD_t   = (peak_t − E_t) / peak_t
///   MaxDD  = max_t(DD_t)            reported as a positive fraction
///
/// PROFIT FACTOR / WIN RATE (per closed trade)
///   PF      = gross profit / gross loss   (+∞ with no losers)
///   P_win   = winners / trades
///   AvgWin  = mean(positive PnL),  AvgLoss = mean(negative PnL)
/// ─────────────────────────────────────────────────────────────────────────

use serde::Serialize;

/// Full metric set computed at session end from the equity curve and the
/// per-trade PnL list.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub sharpe_ratio:       f64,
    pub sortino_ratio:      f64,
    /// Positive fraction (0.25 = −25% peak-to-trough).
    pub max_drawdown:       f64,
    pub max_drawdown_peak_idx:   usize,
    pub max_drawdown_trough_idx: usize,
    pub profit_factor:      f64,
    pub win_rate:           f64,
    pub num_winning_trades: usize,
    pub num_losing_trades:  usize,
    pub avg_win:            f64,
    pub avg_loss:           f64,
    pub avg_trade:          f64,
    pub total_return:       f64,
}

impl std::fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "════════════════════════════════════════════")?;
        writeln!(f, "  SESSION PERFORMANCE")?;
        writeln!(f, "════════════════════════════════════════════")?;
        writeln!(f, "  Sharpe Ratio   : {:.4}", self.sharpe_ratio)?;
        writeln!(f, "  Sortino Ratio  : {:.4}", self.sortino_ratio)?;
        writeln!(f, "  Max Drawdown   : {:.2}%", self.max_drawdown * 100.0)?;
        writeln!(f, "  Profit Factor  : {:.3}", self.profit_factor)?;
        writeln!(f, "  Win Rate       : {:.2}%", self.win_rate * 100.0)?;
        writeln!(f, "  Wins / Losses  : {} / {}", self.num_winning_trades, self.num_losing_trades)?;
        writeln!(f, "  Avg Win        : {:+.2}", self.avg_win)?;
        writeln!(f, "  Avg Loss       : {:+.2}", self.avg_loss)?;
        writeln!(f, "  Avg Trade      : {:+.2}", self.avg_trade)?;
        writeln!(f, "  Total Return   : {:+.2}%", self.total_return * 100.0)
    }
}

/// Percentage returns between consecutive equity points.
pub fn bar_returns(equity_curve: &[f64]) -> Vec<f64> {
    if equity_curve.len() < 2 {
        return Vec::new();
    }
    equity_curve
        .windows(2)
        .map(|w| if w[0] == 0.0 { 0.0 } else { (w[1] - w[0]) / w[0] })
        .collect()
}

pub fn sharpe(returns: &[f64], risk_free_rate: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
        / (returns.len() - 1) as f64;
    let std = var.sqrt();
    if std == 0.0 {
        return 0.0;
    }
    (mean - risk_free_rate) / std
}

pub fn sortino(returns: &[f64], risk_free_rate: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.is_empty() {
        return if mean > 0.0 { f64::INFINITY } else { 0.0 };
    }
    let d_mean = downside.iter().sum::<f64>() / downside.len() as f64;
    // Population variance: a single downside return must not divide by zero.
    let d_var =
        downside.iter().map(|r| (r - d_mean).powi(2)).sum::<f64>() / downside.len() as f64;
    let d_std = d_var.sqrt();
    if d_std == 0.0 {
        return 0.0;
    }
    (mean - risk_free_rate) / d_std
}

/// Maximum drawdown as (positive fraction, peak index, trough index).
pub fn max_drawdown(equity_curve: &[f64]) -> (f64, usize, usize) {
    if equity_curve.len() < 2 {
        return (0.0, 0, 0);
    }
    let mut peak = equity_curve[0];
    let mut peak_idx = 0usize;
    let mut max_dd = 0.0f64;
    let mut dd_peak = 0usize;
    let mut dd_trough = 0usize;

    for (i, &value) in equity_curve.iter().enumerate() {
        if value > peak {
            peak = value;
            peak_idx = i;
        }
        let dd = if peak > 0.0 { (peak - value) / peak } else { 0.0 };
        if dd > max_dd {
            max_dd = dd;
            dd_peak = peak_idx;
            dd_trough = i;
        }
    }
    (max_dd, dd_peak, dd_trough)
}

pub fn profit_factor(trades_pnl: &[f64]) -> f64 {
    let gross_profit: f64 = trades_pnl.iter().filter(|p| **p > 0.0).sum();
    let gross_loss: f64 = trades_pnl.iter().filter(|p| **p < 0.0).sum::<f64>().abs();
    if gross_loss == 0.0 {
        return if gross_profit > 0.0 { f64::INFINITY } else { 0.0 };
    }
    gross_profit / gross_loss
}

/// (win rate, wins, losses). Zero-PnL trades count toward neither.
pub fn win_rate(trades_pnl: &[f64]) -> (f64, usize, usize) {
    if trades_pnl.is_empty() {
        return (0.0, 0, 0);
    }
    let wins = trades_pnl.iter().filter(|p| **p > 0.0).count();
    let losses = trades_pnl.iter().filter(|p| **p < 0.0).count();
    (wins as f64 / trades_pnl.len() as f64, wins, losses)
}

pub fn avg_win_loss(trades_pnl: &[f64]) -> (f64, f64) {
    let winners: Vec<f64> = trades_pnl.iter().copied().filter(|p| *p > 0.0).collect();
    let losers: Vec<f64> = trades_pnl.iter().copied().filter(|p| *p < 0.0).collect();
    let avg_win =
        if winners.is_empty() { 0.0 } else { winners.iter().sum::<f64>() / winners.len() as f64 };
    let avg_loss =
        if losers.is_empty() { 0.0 } else { losers.iter().sum::<f64>() / losers.len() as f64 };
    (avg_win, avg_loss)
}

/// Compute the full metric set in one pass.
pub fn compute_all(equity_curve: &[f64], trades_pnl: &[f64]) -> MetricsReport {
    let returns = bar_returns(equity_curve);
    let (max_dd, dd_peak, dd_trough) = max_drawdown(equity_curve);
    let (wr, wins, losses) = win_rate(trades_pnl);
    let (avg_win, avg_loss) = avg_win_loss(trades_pnl);

    MetricsReport {
        sharpe_ratio: sharpe(&returns, 0.0),
        sortino_ratio: sortino(&returns, 0.0),
        max_drawdown: max_dd,
        max_drawdown_peak_idx: dd_peak,
        max_drawdown_trough_idx: dd_trough,
        profit_factor: profit_factor(trades_pnl),
        win_rate: wr,
        num_winning_trades: wins,
        num_losing_trades: losses,
        avg_win,
        avg_loss,
        avg_trade: if trades_pnl.is_empty() {
            0.0
        } else {
            trades_pnl.iter().sum::<f64>() / trades_pnl.len() as f64
        },
        total_return: if equity_curve.first().copied().unwrap_or(0.0) > 0.0 {
            (equity_curve[equity_curve.len() - 1] - equity_curve[0]) / equity_curve[0]
        } else {
            0.0
        },
    }
}
