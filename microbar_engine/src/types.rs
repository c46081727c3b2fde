/// types.rs — Core data types shared by bars, broker, strategies and engine.
///
/// All prices and quantities are f64 in the quote/base currency of the pair.
/// All timestamps are epoch milliseconds in event time: they come from the
/// trade stream, never from the OS clock, so replays are deterministic.

use serde::{Deserialize, Serialize};

/// Below this absolute quantity a position is considered flat.
pub const QTY_EPSILON: f64 = 1e-12;

// ── Market data ───────────────────────────────────────────────────────────

/// A single trade from the exchange stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub price: f64,
    pub qty: f64,
    /// Epoch milliseconds. Non-decreasing within a source session.
    pub timestamp: i64,
    /// True when the buyer was the resting (maker) side,
    /// i.e. the trade was seller-initiated.
    pub is_buyer_maker: bool,
}

impl Trade {
    pub fn notional(&self) -> f64 {
        self.price * self.qty
    }

    /// Aggressor side: buyer-initiated when the buyer was the taker.
    pub fn is_buy_aggressor(&self) -> bool {
        !self.is_buyer_maker
    }
}

/// A closed micro-bar: OHLCV aggregate of one or more consecutive trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open:         f64,
    pub high:         f64,
    pub low:          f64,
    pub close:        f64,
    /// Sum of base-asset quantity.
    pub volume:       f64,
    /// Sum of price · qty in quote currency.
    pub dollar_value: f64,
    pub trade_count:  usize,
    /// Timestamp of the first trade in the bar (ms).
    pub start_time:   i64,
    /// Timestamp of the last trade in the bar (ms).
    pub end_time:     i64,
}

impl Bar {
    pub fn duration_ms(&self) -> i64 {
        self.end_time - self.start_time
    }
}

// ── Order lifecycle ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    /// +1 for BUY, −1 for SELL.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
        }
    }
}

/// Liquidity role of a fill. Takers consume liquidity (market or marketable
/// limit); makers provide it (resting limit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Maker,
    Taker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Maker => "maker",
            Role::Taker => "taker",
        }
    }
}

/// NEW → PARTIALLY_FILLED? → FILLED | CANCELED | REJECTED | EXPIRED.
/// Terminal states are sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

/// One execution event against an order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub price:      f64,
    pub qty:        f64,
    /// Event-time ms of the mark that produced the fill.
    pub timestamp:  i64,
    pub commission: f64,
}

pub type OrderId = u64;

/// Broker-visible order. Ids are monotonic integers assigned at submit.
#[derive(Debug, Clone)]
pub struct Order {
    pub id:              OrderId,
    pub symbol:          String,
    pub side:            Side,
    pub order_type:      OrderType,
    pub price:           Option<f64>,
    pub requested_qty:   f64,
    pub filled_qty:      f64,
    pub status:          OrderStatus,
    pub tif:             TimeInForce,
    /// Event-time ms of the mark current at submission.
    pub submitted_ts:    i64,
    /// Event-time ms of the last state change.
    pub updated_ts:      i64,
    pub fills:           Vec<Fill>,
    pub reason:          Option<String>,
    pub client_order_id: Option<String>,
}

impl Order {
    pub fn remaining_qty(&self) -> f64 {
        (self.requested_qty - self.filled_qty).max(0.0)
    }

    /// Quantity-weighted average fill price, None when nothing filled.
    pub fn avg_fill_price(&self) -> Option<f64> {
        if self.filled_qty <= QTY_EPSILON {
            return None;
        }
        let notional: f64 = self.fills.iter().map(|f| f.price * f.qty).sum();
        Some(notional / self.filled_qty)
    }

    pub fn total_commission(&self) -> f64 {
        self.fills.iter().map(|f| f.commission).sum()
    }
}

/// What a strategy asks the broker to do.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol:          String,
    pub side:            Side,
    pub order_type:      OrderType,
    pub qty:             f64,
    pub price:           Option<f64>,
    pub tif:             TimeInForce,
    pub reason:          String,
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: Side, qty: f64) -> Self {
        Self {
            symbol: symbol.to_owned(),
            side,
            order_type: OrderType::Market,
            qty,
            price: None,
            tif: TimeInForce::Gtc,
            reason: String::new(),
            client_order_id: None,
        }
    }

    pub fn limit(symbol: &str, side: Side, qty: f64, price: f64, tif: TimeInForce) -> Self {
        Self {
            symbol: symbol.to_owned(),
            side,
            order_type: OrderType::Limit,
            qty,
            price: Some(price),
            tif,
            reason: String::new(),
            client_order_id: None,
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = reason.to_owned();
        self
    }
}

// ── Account & filters ─────────────────────────────────────────────────────

/// Per-symbol exchange constraints enforced at order submission.
/// All fields are optional so partially-known symbols stay tradable.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub min_qty:      Option<f64>,
    pub step_size:    Option<f64>,
    pub min_notional: Option<f64>,
    pub tick_size:    Option<f64>,
}

/// Per-symbol net quantity and volume-weighted average entry price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub qty:       f64,
    pub avg_price: f64,
}

/// Point-in-time account view exposed to strategies and reporting.
#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    pub cash:            f64,
    pub positions:       Vec<(String, Position)>,
    pub fees_paid_total: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_avg_fill_price_weighted() {
        let mut o = Order {
            id: 1,
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            order_type: OrderType::Market,
            price: None,
            requested_qty: 3.0,
            filled_qty: 3.0,
            status: OrderStatus::Filled,
            tif: TimeInForce::Gtc,
            submitted_ts: 0,
            updated_ts: 0,
            fills: vec![],
            reason: None,
            client_order_id: None,
        };
        o.fills.push(Fill { price: 100.0, qty: 1.0, timestamp: 0, commission: 0.0 });
        o.fills.push(Fill { price: 110.0, qty: 2.0, timestamp: 0, commission: 0.0 });
        let avg = o.avg_fill_price().unwrap();
        assert!((avg - 320.0 / 3.0).abs() < 1e-12, "avg = {avg}");
    }

    #[test]
    fn terminal_states() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn aggressor_side_from_buyer_maker() {
        let t = Trade { price: 100.0, qty: 1.0, timestamp: 0, is_buyer_maker: true };
        // buyer was maker → seller initiated
        assert!(!t.is_buy_aggressor());
    }
}
