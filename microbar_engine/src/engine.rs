/// engine.rs — The per-trade live loop.
///
/// ARCHITECTURE
/// ┌──────────────────────────────────────────────────────────┐
/// │  TradeSource (WS replay / channel)                       │
/// │        │ trade                                           │
/// │        ▼                                                 │
/// │  broker.mark(symbol, price, ts)     ← every trade        │
/// │  time aggregator update             ← every trade        │
/// │  builder.update(trade) → Bar?                            │
/// │        │ closed bar                                      │
/// │   ┌────┴───────────────────────────────┐                 │
/// │   │ data.csv append (+ bars.csv log)   │                 │
/// │   │ strategy.on_bar(broker, executor)  │ panic-guarded   │
/// │   │ drain decisions → decisions.csv    │                 │
/// │   │ drain fills     → trades.csv       │                 │
/// │   │ mark-to-market  → equity.csv       │                 │
/// │   └────────────────────────────────────┘                 │
/// │  session end: liquidate → quality/summary/returns        │
/// └──────────────────────────────────────────────────────────┘
///
/// Ordering guarantees: trades are processed in source order; for one
/// symbol all submission/matching/mark steps are serialized; EquityRows
/// are emitted in strict bar order and the TradeRows of bar B always
/// precede B's EquityRow.
///
/// A strategy panic is logged and the loop continues with the next bar;
/// no orders are assumed beyond what the broker reported. Source failures
/// end the session gracefully, as does the shutdown signal (Ctrl-C), which
/// still liquidates, flushes and writes the summary.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::bars::{BarBuilder, TimeBarAggregator};
use crate::broker::PaperBroker;
use crate::error::PersistenceError;
use crate::executor::MarketExecutor;
use crate::metrics::compute_all;
use crate::source::TradeSource;
use crate::strategy::{return_volatility, Strategy};
use crate::types::Side;
use crate::writers::{
    round_to, write_json, BackgroundBarWriter, BarWriterConfig, QualityReport, RunWriters, Summary,
};

/// Position smaller than this at session end is not worth liquidating.
const LIQUIDATION_MIN_QTY: f64 = 1e-9;

/// Bar closes kept for the cost model's volatility hint.
const VOL_HINT_WINDOW: usize = 32;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub symbol: String,
    pub starting_cash: f64,
    /// Wall-clock session cap; None runs until the source ends.
    pub duration: Option<Duration>,
    /// Hard cap on trades processed (debugging aid).
    pub max_trades: Option<u64>,
    /// Liquidate any open position when the session ends.
    pub close_at_end: bool,
    /// Emit chart_<tf>.csv files through the time aggregator.
    pub time_charts: bool,
    pub gap_fill: bool,
    /// Route closed bars through the background bars.csv writer too.
    pub bar_session_log: bool,
}

impl EngineConfig {
    pub fn new(symbol: &str, starting_cash: f64) -> Self {
        Self {
            symbol: symbol.to_owned(),
            starting_cash,
            duration: None,
            max_trades: None,
            close_at_end: true,
            time_charts: false,
            gap_fill: false,
            bar_session_log: false,
        }
    }
}

/// In-memory trade row kept for PnL pairing at session end.
struct TradeMemo {
    side: Side,
    equity_after: f64,
}

pub struct LiveEngine {
    cfg: EngineConfig,
    writers: RunWriters,
    time_agg: Option<TimeBarAggregator>,
    bar_log: Option<BackgroundBarWriter>,
}

impl LiveEngine {
    /// Create the run directory layout. Failing here is fatal: a session
    /// without a run directory has nowhere to record anything.
    pub fn new(
        cfg: EngineConfig,
        run_dir: &Path,
        rule: &str,
        limit: f64,
    ) -> Result<Self, PersistenceError> {
        let writers = RunWriters::create(run_dir)?;
        let time_agg = if cfg.time_charts {
            Some(TimeBarAggregator::new(run_dir, cfg.gap_fill))
        } else {
            None
        };
        let bar_log = if cfg.bar_session_log {
            Some(BackgroundBarWriter::start(
                run_dir.join("bars.csv"),
                rule,
                limit,
                BarWriterConfig::default(),
            )?)
        } else {
            None
        };
        Ok(Self { cfg, writers, time_agg, bar_log })
    }

    /// Drive the session until the source ends, the duration elapses or
    /// the shutdown signal fires. Always finishes with liquidation,
    /// writer flush and quality/summary/returns emission.
    pub async fn run<S: TradeSource>(
        mut self,
        source: &mut S,
        builder: &mut BarBuilder,
        broker: &mut PaperBroker,
        strategy: &mut dyn Strategy,
        mut shutdown: watch::Receiver<bool>,
    ) -> Summary {
        let symbol = self.cfg.symbol.clone();
        let started = Instant::now();
        let mut executor = MarketExecutor::new();

        let mut trades_seen: u64 = 0;
        let mut bars_emitted: u64 = 0;
        let mut orders_buy: u64 = 0;
        let mut orders_sell: u64 = 0;
        let mut last_price = 0.0f64;
        let mut last_ts = 0i64;
        let mut equity_rows: Vec<(i64, f64)> = Vec::new();
        let mut trade_memos: Vec<TradeMemo> = Vec::new();
        let mut close_window: VecDeque<f64> = VecDeque::with_capacity(VOL_HINT_WINDOW + 1);

        strategy.on_start();
        info!(symbol = %symbol, rule = builder.rule_name(), "session started");

        loop {
            if let Some(cap) = self.cfg.duration {
                if started.elapsed() >= cap {
                    info!(elapsed = ?started.elapsed(), "session duration reached");
                    break;
                }
            }
            if let Some(cap) = self.cfg.max_trades {
                if trades_seen >= cap {
                    info!(trades_seen, "max trades reached");
                    break;
                }
            }

            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!("shutdown signal received");
                    break;
                }
                res = source.next_trade() => res,
            };

            let trade = match next {
                Ok(Some(t)) => t,
                Ok(None) => {
                    info!("trade source ended");
                    break;
                }
                Err(e) => {
                    // Source retries internally; an error surfacing here
                    // means it gave up. End the stream gracefully.
                    warn!("trade source failed, ending session: {e}");
                    break;
                }
            };

            trades_seen += 1;
            last_price = trade.price;
            last_ts = trade.timestamp;

            broker.mark(&symbol, trade.price, trade.timestamp);
            if let Some(agg) = self.time_agg.as_mut() {
                agg.update(trade.timestamp, trade.price, trade.qty);
            }

            let Some(bar) = builder.update(&trade) else {
                continue;
            };
            bars_emitted += 1;

            // 1. Persist the bar before anything can trade on it.
            self.writers.append_bar(&bar);
            if let Some(log) = self.bar_log.as_mut() {
                log.write(&bar);
            }

            // 2. Volatility hint for the dynamic slippage model.
            close_window.push_back(bar.close);
            if close_window.len() > VOL_HINT_WINDOW {
                close_window.pop_front();
            }
            let closes: Vec<f64> = close_window.iter().copied().collect();
            broker.cost_model_mut().update_volatility(return_volatility(&closes));

            // 3. Strategy, guarded: one bad bar must not kill the session.
            let guarded = catch_unwind(AssertUnwindSafe(|| {
                strategy.on_bar(broker, &mut executor, &symbol, &bar)
            }));
            if guarded.is_err() {
                error!(bar = bars_emitted, "strategy panicked; continuing with next bar");
            }

            // 4. Decisions, then trade rows, then the equity row. Every
            //    fill of bar B must precede B's equity row.
            for d in executor.drain_decisions() {
                self.writers.append_decision(bar.end_time, &d.action, &d.reason, d.qty, d.price);
            }
            for t in executor.drain_executed() {
                let cash_after = broker.cash();
                let equity_after = broker.equity();
                self.writers.append_trade(
                    bar.end_time,
                    t.side,
                    t.price,
                    t.qty,
                    cash_after,
                    equity_after,
                    &t.reason,
                );
                match t.side {
                    Side::Buy => orders_buy += 1,
                    Side::Sell => orders_sell += 1,
                }
                trade_memos.push(TradeMemo { side: t.side, equity_after });
                debug!(side = t.side.as_str(), qty = t.qty, price = t.price, "fill recorded");
            }

            let pos_qty = broker.position_qty(&symbol);
            let cash_now = broker.cash();
            let equity_now = cash_now + pos_qty * bar.close;
            self.writers.append_equity(bar.end_time, &symbol, bar.close, pos_qty, cash_now, equity_now);
            equity_rows.push((bar.end_time, equity_now));
        }

        strategy.on_end();

        // ── Liquidation ───────────────────────────────────────────────────
        if self.cfg.close_at_end {
            let pos = broker.position_qty(&symbol);
            if pos.abs() > LIQUIDATION_MIN_QTY && last_price > 0.0 {
                let side = if pos > 0.0 { Side::Sell } else { Side::Buy };
                info!(pos, side = side.as_str(), "closing open position at session end");
                let order = broker.submit_order(
                    crate::types::OrderRequest::market(&symbol, side, pos.abs())
                        .with_reason("close_position_end"),
                );
                if !order.fills.is_empty() {
                    let cash = broker.cash();
                    let equity = broker.equity();
                    let px = order.avg_fill_price().unwrap_or(last_price);
                    self.writers.append_trade(
                        last_ts,
                        side,
                        px,
                        order.filled_qty,
                        cash,
                        equity,
                        "close_position_end",
                    );
                    match side {
                        Side::Buy => orders_buy += 1,
                        Side::Sell => orders_sell += 1,
                    }
                    trade_memos.push(TradeMemo { side, equity_after: equity });
                }
            }
        }

        if let Some(mut agg) = self.time_agg.take() {
            agg.finalize();
        }
        if let Some(mut log) = self.bar_log.take() {
            log.close();
        }

        // ── Reports ───────────────────────────────────────────────────────
        let duration_sec = started.elapsed().as_secs_f64();
        let quality = QualityReport {
            bars_processed: bars_emitted,
            duration_sec,
            bars_per_sec: if duration_sec > 0.0 { bars_emitted as f64 / duration_sec } else { 0.0 },
        };
        if let Err(e) = write_json(self.writers.run_dir(), "quality.json", &quality) {
            warn!("quality.json: {e}");
        }

        let final_equity = broker.cash()
            + broker.position_qty(&symbol) * if last_price > 0.0 { last_price } else { 0.0 };
        let pnl = final_equity - self.cfg.starting_cash;
        let return_pct = if self.cfg.starting_cash > 0.0 {
            pnl / self.cfg.starting_cash * 100.0
        } else {
            0.0
        };

        let equity_values: Vec<f64> = equity_rows.iter().map(|(_, e)| *e).collect();
        let trades_pnl = pair_round_trips(&trade_memos);
        let report = compute_all(&equity_values, &trades_pnl);

        let summary = Summary {
            trades_processed: trades_seen,
            bars_emitted,
            orders_executed: orders_buy + orders_sell,
            orders_buy,
            orders_sell,
            starting_cash: self.cfg.starting_cash,
            final_equity,
            pnl,
            return_pct,
            duration_s: duration_sec,
            sharpe_ratio: round_to(report.sharpe_ratio, 4),
            sortino_ratio: round_to(report.sortino_ratio, 4),
            max_drawdown_pct: round_to(report.max_drawdown * 100.0, 2),
            profit_factor: round_to(report.profit_factor, 2),
            win_rate_pct: round_to(report.win_rate * 100.0, 2),
            num_winning_trades: report.num_winning_trades,
            num_losing_trades: report.num_losing_trades,
            avg_win: round_to(report.avg_win, 2),
            avg_loss: round_to(report.avg_loss, 2),
            avg_trade: round_to(report.avg_trade, 2),
        };
        if let Err(e) = write_json(self.writers.run_dir(), "summary.json", &summary) {
            warn!("summary.json: {e}");
        }
        if let Err(e) = self.writers.write_returns(&equity_rows) {
            warn!("returns.csv: {e}");
        }

        info!(
            trades = trades_seen,
            bars = bars_emitted,
            orders = orders_buy + orders_sell,
            final_equity,
            pnl,
            "session finished"
        );
        summary
    }
}

/// Per-trade PnL from equity snapshots, pairing each BUY row with the SELL
/// row that follows it.
fn pair_round_trips(memos: &[TradeMemo]) -> Vec<f64> {
    let mut pnl = Vec::new();
    let mut i = 0;
    while i + 1 < memos.len() {
        if memos[i].side == Side::Buy && memos[i + 1].side == Side::Sell {
            pnl.push(memos[i + 1].equity_after - memos[i].equity_after);
            i += 2;
        } else {
            i += 1;
        }
    }
    pnl
}
