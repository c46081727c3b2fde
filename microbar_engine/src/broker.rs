/// broker.rs — Binance-style paper broker: no network, in-memory matching.
///
/// The "book" is implicit: the engine feeds `mark(symbol, mid, ts)` between
/// trades and the broker advances every open order of that symbol against
/// the mark. MARKET orders fill at the slipped mid (taker), LIMIT orders
/// fill when the mid touches the limit (maker, at the slipped limit price).
/// IOC remainders cancel after the matching attempt.
///
/// Cash never goes negative: a MARKET/LIMIT BUY that exceeds available cash
/// is scaled down to what the cash (fee included) can pay, the remainder is
/// canceled and the order carries reason "insufficient_cash_scaled".
///
/// All timestamps on orders and fills are event time taken from the mark
/// stream, so replaying the same trades reproduces identical order state.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use ahash::AHashMap;
use tracing::warn;

use crate::costs::CostModel;
use crate::error::BrokerError;
use crate::types::{
    AccountSnapshot, Fill, Order, OrderId, OrderRequest, OrderStatus, OrderType, Position, Role,
    Side, SymbolFilters, TimeInForce, QTY_EPSILON,
};

/// Tolerance for "fully filled" checks.
const FILL_TOLERANCE: f64 = 1e-9;

/// Snapshot of one execution delivered to the fill observer.
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub timestamp:       i64,
    pub symbol:          String,
    pub side:            Side,
    pub role:            Role,
    pub mid_price:       f64,
    pub effective_price: f64,
    pub qty:             f64,
    pub fee:             f64,
    pub order_type:      OrderType,
    pub limit_price:     Option<f64>,
}

pub type FillObserver = Box<dyn FnMut(&FillEvent) + Send>;

pub struct PaperBroker {
    filters: AHashMap<String, SymbolFilters>,
    cost_model: CostModel,
    /// Ordered by id so matching is FIFO and replay-deterministic.
    orders: BTreeMap<OrderId, Order>,
    positions: BTreeMap<String, Position>,
    cash: f64,
    fees_paid_total: f64,
    next_id: OrderId,
    /// Last mark per symbol; MARKET orders submitted with a cached mark
    /// execute immediately.
    last_px: AHashMap<String, f64>,
    /// Event-time ms of the most recent mark.
    last_ts: i64,
    on_fill: Option<FillObserver>,
}

impl std::fmt::Debug for PaperBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperBroker")
            .field("cash", &self.cash)
            .field("positions", &self.positions)
            .field("orders", &self.orders.len())
            .field("fees_paid_total", &self.fees_paid_total)
            .finish()
    }
}

impl PaperBroker {
    pub fn new(starting_cash: f64, cost_model: CostModel) -> Self {
        Self {
            filters: AHashMap::new(),
            cost_model,
            orders: BTreeMap::new(),
            positions: BTreeMap::new(),
            cash: starting_cash,
            fees_paid_total: 0.0,
            next_id: 1,
            last_px: AHashMap::new(),
            last_ts: 0,
            on_fill: None,
        }
    }

    pub fn with_filters(mut self, symbol: &str, filters: SymbolFilters) -> Self {
        self.filters.insert(symbol.to_owned(), filters);
        self
    }

    /// Register an observer called once per executed fill. Panics inside
    /// the observer are swallowed and logged, never propagated.
    pub fn set_fill_observer(&mut self, observer: FillObserver) {
        self.on_fill = Some(observer);
    }

    // ── Read API ──────────────────────────────────────────────────────────

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn fees_paid_total(&self) -> f64 {
        self.fees_paid_total
    }

    pub fn position_qty(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).map_or(0.0, |p| p.qty)
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.positions.get(symbol).copied()
    }

    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.last_px.get(symbol).copied()
    }

    /// Mark-to-market equity: cash + Σ qty · last price.
    pub fn equity(&self) -> f64 {
        let mut eq = self.cash;
        for (symbol, pos) in &self.positions {
            let px = self.last_px.get(symbol).copied().unwrap_or(pos.avg_price);
            eq += pos.qty * px;
        }
        eq
    }

    pub fn account(&self) -> AccountSnapshot {
        AccountSnapshot {
            cash: self.cash,
            positions: self.positions.iter().map(|(s, p)| (s.clone(), *p)).collect(),
            fees_paid_total: self.fees_paid_total,
        }
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.cost_model
    }

    pub fn cost_model_mut(&mut self) -> &mut CostModel {
        &mut self.cost_model
    }

    pub fn open_orders(&self, symbol: Option<&str>) -> Vec<Order> {
        self.orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .cloned()
            .collect()
    }

    pub fn fetch_order(&self, id: OrderId) -> Result<Order, BrokerError> {
        self.orders.get(&id).cloned().ok_or(BrokerError::UnknownOrder(id))
    }

    // ── Order entry ───────────────────────────────────────────────────────

    /// Check a request against the symbol filters without submitting.
    pub fn validate(&self, req: &OrderRequest) -> Result<(), BrokerError> {
        if !(req.qty > 0.0) {
            return Err(BrokerError::NonPositiveQty(req.qty));
        }
        if req.order_type == OrderType::Limit && req.price.is_none() {
            return Err(BrokerError::LimitWithoutPrice);
        }
        if let Some(f) = self.filters.get(&req.symbol) {
            if let (Some(price), Some(tick)) = (req.price, f.tick_size) {
                let q = (price / tick).round() * tick;
                if (q - price).abs() > 1e-12 {
                    return Err(BrokerError::TickSizeViolated { price, tick });
                }
            }
            if let Some(step) = f.step_size {
                let q = (req.qty / step).round() * step;
                if (q - req.qty).abs() > 1e-12 {
                    return Err(BrokerError::StepSizeViolated { qty: req.qty, step });
                }
            }
            if let Some(min_qty) = f.min_qty {
                if req.qty < min_qty {
                    return Err(BrokerError::MinQtyViolated { qty: req.qty, min_qty });
                }
            }
            // Notional is only checkable when a price is attached (LIMIT).
            if let (Some(price), Some(min_notional)) = (req.price, f.min_notional) {
                let notional = price * req.qty;
                if notional < min_notional {
                    return Err(BrokerError::MinNotionalViolated { notional, min_notional });
                }
            }
        }
        Ok(())
    }

    /// Submit an order. Validation failures come back as a stored order in
    /// REJECTED state carrying the error text as reason; they are never
    /// fatal to the session.
    pub fn submit_order(&mut self, req: OrderRequest) -> Order {
        let id = self.next_id;
        self.next_id += 1;

        let now = self.last_ts;
        let mut order = Order {
            id,
            symbol: req.symbol.clone(),
            side: req.side,
            order_type: req.order_type,
            price: req.price,
            requested_qty: req.qty,
            filled_qty: 0.0,
            status: OrderStatus::New,
            tif: req.tif,
            submitted_ts: now,
            updated_ts: now,
            fills: Vec::new(),
            reason: if req.reason.is_empty() { None } else { Some(req.reason.clone()) },
            client_order_id: req.client_order_id.clone(),
        };

        if let Err(err) = self.validate(&req) {
            warn!(order_id = id, %err, "order rejected");
            order.status = OrderStatus::Rejected;
            order.reason = Some(err.to_string());
            self.orders.insert(id, order.clone());
            return order;
        }

        // MARKET orders with a cached mark execute immediately; the IOC/FOK
        // remainder rule applies only once an attempt has been made.
        if order.order_type == OrderType::Market {
            if let Some(mid) = self.last_px.get(&order.symbol).copied() {
                self.fill_market(&mut order, mid, now);
                self.apply_tif(&mut order, now);
            }
        }

        self.orders.insert(id, order.clone());
        order
    }

    /// Cancel by id. Canceling an already-terminal order is idempotent and
    /// returns the current snapshot.
    pub fn cancel_order(&mut self, id: OrderId) -> Result<Order, BrokerError> {
        let now = self.last_ts;
        let order = self.orders.get_mut(&id).ok_or(BrokerError::UnknownOrder(id))?;
        if !order.status.is_terminal() {
            order.status = OrderStatus::Canceled;
            order.updated_ts = now;
        }
        Ok(order.clone())
    }

    // ── Matching ──────────────────────────────────────────────────────────

    /// Advance every open order of `symbol` against a new mid price.
    /// Called by the engine between trades; `ts` is the trade's event time.
    pub fn mark(&mut self, symbol: &str, mid: f64, ts: i64) {
        self.last_px.insert(symbol.to_owned(), mid);
        self.last_ts = ts;

        let ids: Vec<OrderId> = self
            .orders
            .iter()
            .filter(|(_, o)| o.symbol == symbol && !o.status.is_terminal())
            .map(|(id, _)| *id)
            .collect();

        for id in ids {
            // Detach while filling so cash/position updates don't alias.
            let mut order = match self.orders.remove(&id) {
                Some(o) => o,
                None => continue,
            };
            match order.order_type {
                OrderType::Market => self.fill_market(&mut order, mid, ts),
                OrderType::Limit => self.try_fill_limit(&mut order, mid, ts),
            }
            self.apply_tif(&mut order, ts);
            self.orders.insert(id, order);
        }
    }

    /// IOC cancels any unfilled remainder after a matching attempt; FOK
    /// behaves the same here because fills are all-or-scaled in one shot.
    fn apply_tif(&self, order: &mut Order, ts: i64) {
        if order.status.is_terminal() {
            return;
        }
        if matches!(order.tif, TimeInForce::Ioc | TimeInForce::Fok)
            && order.remaining_qty() > FILL_TOLERANCE
        {
            order.status = OrderStatus::Canceled;
            order.updated_ts = ts;
            if order.reason.is_none() {
                order.reason = Some("ioc_unfilled_remainder".to_owned());
            }
        }
    }

    fn fill_market(&mut self, order: &mut Order, mid: f64, ts: i64) {
        if order.status.is_terminal() {
            return;
        }
        let qty_left = order.remaining_qty();
        if qty_left <= FILL_TOLERANCE {
            return;
        }
        let px = self.cost_model.effective_price(mid, order.side, Role::Taker, mid * qty_left);
        self.execute_fill(order, px, qty_left, mid, ts, Role::Taker);
    }

    fn try_fill_limit(&mut self, order: &mut Order, mid: f64, ts: i64) {
        if order.status.is_terminal() {
            return;
        }
        let limit = match order.price {
            Some(p) => p,
            None => return,
        };
        let crossed = match order.side {
            Side::Buy => mid <= limit,
            Side::Sell => mid >= limit,
        };
        if !crossed {
            return;
        }
        let qty_left = order.remaining_qty();
        if qty_left <= FILL_TOLERANCE {
            return;
        }
        let px = self.cost_model.effective_price(limit, order.side, Role::Maker, limit * qty_left);
        self.execute_fill(order, px, qty_left, mid, ts, Role::Maker);
    }

    /// One execution: scales BUY quantity to available cash, records the
    /// fill, applies cash/position effects and notifies the observer.
    fn execute_fill(
        &mut self,
        order: &mut Order,
        px: f64,
        qty_wanted: f64,
        mid: f64,
        ts: i64,
        role: Role,
    ) {
        let fee_rate = self.cost_model.fee_bps(role) / 10_000.0;

        let mut fill_qty = qty_wanted;
        let mut scaled = false;
        if order.side == Side::Buy {
            let affordable = self.cash / (px * (1.0 + fee_rate));
            if affordable < fill_qty {
                fill_qty = affordable.max(0.0);
                scaled = true;
            }
        }

        if fill_qty <= QTY_EPSILON {
            order.status = OrderStatus::Canceled;
            order.updated_ts = ts;
            order.reason = Some("insufficient_cash".to_owned());
            return;
        }
        if scaled && order.tif == TimeInForce::Fok {
            // FOK cannot accept a partial; kill without filling.
            order.status = OrderStatus::Canceled;
            order.updated_ts = ts;
            order.reason = Some("fok_unfillable".to_owned());
            return;
        }

        let fee = self.cost_model.fee_amount(px * fill_qty, role);
        order.fills.push(Fill { price: px, qty: fill_qty, timestamp: ts, commission: fee });
        order.filled_qty += fill_qty;
        order.updated_ts = ts;

        if order.remaining_qty() <= FILL_TOLERANCE {
            order.status = OrderStatus::Filled;
        } else if scaled {
            // Nothing left to pay with; cancel the remainder now instead of
            // retrying against every future mark.
            order.status = OrderStatus::Canceled;
            order.reason = Some("insufficient_cash_scaled".to_owned());
        } else {
            order.status = OrderStatus::PartiallyFilled;
        }

        self.apply_cash_position_effects(order.side, &order.symbol, px, fill_qty, fee);

        if let Some(cb) = self.on_fill.as_mut() {
            let event = FillEvent {
                timestamp: ts,
                symbol: order.symbol.clone(),
                side: order.side,
                role,
                mid_price: mid,
                effective_price: px,
                qty: fill_qty,
                fee,
                order_type: order.order_type,
                limit_price: match order.order_type {
                    OrderType::Limit => order.price,
                    OrderType::Market => None,
                },
            };
            if catch_unwind(AssertUnwindSafe(|| cb(&event))).is_err() {
                warn!("fill observer panicked; ignored");
            }
        }
    }

    fn apply_cash_position_effects(
        &mut self,
        side: Side,
        symbol: &str,
        px: f64,
        qty: f64,
        fee: f64,
    ) {
        match side {
            Side::Buy => self.cash -= px * qty + fee,
            Side::Sell => self.cash += px * qty - fee,
        }
        if self.cash < 0.0 {
            debug_assert!(self.cash > -1e-6, "cash materially negative: {}", self.cash);
            self.cash = 0.0;
        }
        self.fees_paid_total += fee;

        let pos = self
            .positions
            .entry(symbol.to_owned())
            .or_insert(Position { qty: 0.0, avg_price: 0.0 });
        let delta = side.sign() * qty;
        let new_qty = pos.qty + delta;
        if pos.qty.abs() <= QTY_EPSILON || pos.qty.signum() == delta.signum() {
            // Opening or adding: volume-weighted average entry.
            if new_qty.abs() > QTY_EPSILON {
                pos.avg_price = (pos.qty * pos.avg_price + delta * px) / new_qty;
            }
        } else if pos.qty.signum() != new_qty.signum() && new_qty.abs() > QTY_EPSILON {
            // Flipped through zero: the residual was opened here.
            pos.avg_price = px;
        }
        pos.qty = new_qty;
        if pos.qty.abs() < QTY_EPSILON {
            self.positions.remove(symbol);
        }
    }
}
