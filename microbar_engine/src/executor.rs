/// executor.rs — Turns strategy intents into broker orders.
///
/// Two operating modes:
///
/// `MarketExecutor` (fire-and-forget) submits and returns immediately;
/// matching is deferred to the engine's mark cycle. Every submission is
/// recorded as a decision, and every order the broker reports filled is
/// recorded as an executed-order snapshot. The engine drains both logs
/// after each strategy callback to produce TradeRows and DecisionRows.
///
/// `WaitExecutor` (live) submits against a shared broker and polls until
/// the order reaches a terminal state or a wall-clock deadline passes, in
/// which case it cancels and reports `canceled_by_timeout`. Fill latency is
/// measured in event time (`submitted_ts` → `updated_ts`); only the
/// timeout itself uses the OS clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::broker::PaperBroker;
use crate::types::{Order, OrderRequest, OrderStatus, Side, TimeInForce};

// ── Fire-and-forget ───────────────────────────────────────────────────────

/// Snapshot of one executed (filled) order, for the trade log.
#[derive(Debug, Clone)]
pub struct ExecutedOrder {
    pub side:   Side,
    pub price:  f64,
    pub qty:    f64,
    pub fee:    f64,
    pub reason: String,
}

/// One strategy intent, recorded whether or not it filled.
#[derive(Debug, Clone)]
pub struct DecisionRecord {
    pub action: String,
    pub reason: String,
    pub qty:    f64,
    pub price:  f64,
}

#[derive(Debug, Default)]
pub struct MarketExecutor {
    executed: Vec<ExecutedOrder>,
    decisions: Vec<DecisionRecord>,
}

impl MarketExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn market_buy(
        &mut self,
        broker: &mut PaperBroker,
        symbol: &str,
        qty: f64,
        reason: &str,
    ) -> Order {
        self.submit(broker, OrderRequest::market(symbol, Side::Buy, qty).with_reason(reason))
    }

    pub fn market_sell(
        &mut self,
        broker: &mut PaperBroker,
        symbol: &str,
        qty: f64,
        reason: &str,
    ) -> Order {
        self.submit(broker, OrderRequest::market(symbol, Side::Sell, qty).with_reason(reason))
    }

    pub fn limit_buy(
        &mut self,
        broker: &mut PaperBroker,
        symbol: &str,
        qty: f64,
        price: f64,
        tif: TimeInForce,
        reason: &str,
    ) -> Order {
        self.submit(
            broker,
            OrderRequest::limit(symbol, Side::Buy, qty, price, tif).with_reason(reason),
        )
    }

    pub fn limit_sell(
        &mut self,
        broker: &mut PaperBroker,
        symbol: &str,
        qty: f64,
        price: f64,
        tif: TimeInForce,
        reason: &str,
    ) -> Order {
        self.submit(
            broker,
            OrderRequest::limit(symbol, Side::Sell, qty, price, tif).with_reason(reason),
        )
    }

    fn submit(&mut self, broker: &mut PaperBroker, req: OrderRequest) -> Order {
        let symbol = req.symbol.clone();
        let reason = req.reason.clone();
        let side = req.side;
        let req_qty = req.qty;
        let order = broker.submit_order(req);

        self.decisions.push(DecisionRecord {
            action: side.as_str().to_owned(),
            reason: reason.clone(),
            qty: req_qty,
            price: order
                .avg_fill_price()
                .or_else(|| broker.last_price(&symbol))
                .unwrap_or(0.0),
        });

        if !order.fills.is_empty() {
            self.executed.push(ExecutedOrder {
                side,
                price: order.avg_fill_price().unwrap_or(0.0),
                qty: order.filled_qty,
                fee: order.total_commission(),
                reason,
            });
        } else if order.status == OrderStatus::Rejected {
            debug!(order_id = order.id, reason = ?order.reason, "intent rejected");
        }
        order
    }

    /// Orders filled since the last drain, in submission order.
    pub fn drain_executed(&mut self) -> Vec<ExecutedOrder> {
        std::mem::take(&mut self.executed)
    }

    /// Intents recorded since the last drain, in submission order.
    pub fn drain_decisions(&mut self) -> Vec<DecisionRecord> {
        std::mem::take(&mut self.decisions)
    }
}

// ── Wait-for-terminal (live) ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct WaitExecConfig {
    /// State poll period.
    pub poll_interval: Duration,
    /// Deadline before the executor cancels a non-terminal order.
    pub max_wait: Duration,
}

impl Default for WaitExecConfig {
    fn default() -> Self {
        Self { poll_interval: Duration::from_millis(50), max_wait: Duration::from_secs(5) }
    }
}

#[derive(Debug, Clone)]
pub struct WaitExecResult {
    pub order: Order,
    /// `updated_ts − submitted_ts` in ms for FILLED orders, None otherwise.
    pub latency_ms: Option<f64>,
    pub canceled_by_timeout: bool,
}

/// Executes against a broker shared with the marking task and guarantees a
/// terminal (or canceled) outcome for every submission.
pub struct WaitExecutor {
    broker: Arc<Mutex<PaperBroker>>,
    cfg: WaitExecConfig,
}

impl WaitExecutor {
    pub fn new(broker: Arc<Mutex<PaperBroker>>, cfg: WaitExecConfig) -> Self {
        Self { broker, cfg }
    }

    pub async fn market_buy(&self, symbol: &str, qty: f64) -> WaitExecResult {
        self.place_and_wait(OrderRequest::market(symbol, Side::Buy, qty)).await
    }

    pub async fn market_sell(&self, symbol: &str, qty: f64) -> WaitExecResult {
        self.place_and_wait(OrderRequest::market(symbol, Side::Sell, qty)).await
    }

    pub async fn limit_buy(&self, symbol: &str, qty: f64, price: f64) -> WaitExecResult {
        self.place_and_wait(OrderRequest::limit(symbol, Side::Buy, qty, price, TimeInForce::Gtc))
            .await
    }

    pub async fn limit_sell(&self, symbol: &str, qty: f64, price: f64) -> WaitExecResult {
        self.place_and_wait(OrderRequest::limit(symbol, Side::Sell, qty, price, TimeInForce::Gtc))
            .await
    }

    async fn place_and_wait(&self, req: OrderRequest) -> WaitExecResult {
        let order = {
            let mut broker = self.broker.lock().expect("broker mutex poisoned");
            broker.submit_order(req)
        };
        if order.status.is_terminal() {
            let latency = fill_latency_ms(&order);
            return WaitExecResult { order, latency_ms: latency, canceled_by_timeout: false };
        }

        let deadline = tokio::time::Instant::now() + self.cfg.max_wait;
        let id = order.id;
        let mut last_seen = order;

        while tokio::time::Instant::now() < deadline {
            sleep(self.cfg.poll_interval).await;
            let snapshot = {
                let broker = self.broker.lock().expect("broker mutex poisoned");
                broker.fetch_order(id)
            };
            if let Ok(o) = snapshot {
                if o.status.is_terminal() {
                    let latency = fill_latency_ms(&o);
                    return WaitExecResult {
                        order: o,
                        latency_ms: latency,
                        canceled_by_timeout: false,
                    };
                }
                last_seen = o;
            }
        }

        // Timeout: cancel defensively and return the final snapshot.
        let out = {
            let mut broker = self.broker.lock().expect("broker mutex poisoned");
            broker.cancel_order(id).unwrap_or(last_seen)
        };
        let latency = fill_latency_ms(&out);
        WaitExecResult { order: out, latency_ms: latency, canceled_by_timeout: true }
    }
}

fn fill_latency_ms(order: &Order) -> Option<f64> {
    if order.status == OrderStatus::Filled {
        Some(((order.updated_ts - order.submitted_ts).max(0)) as f64)
    } else {
        None
    }
}
