/// error.rs — Error taxonomy for the trading pipeline.
///
/// Propagation policy: configuration errors are fatal at startup; everything
/// else is localized. Order validation failures surface as REJECTED orders,
/// source failures end the stream gracefully, persistence failures drop the
/// row and keep the session alive.

use thiserror::Error;

use crate::types::OrderId;

/// Invalid parameters detected at construction time. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid parameter {name}: {message}")]
    InvalidParameter { name: &'static str, message: String },

    #[error("unknown bar rule '{rule}'; available: {available}")]
    UnknownRule { rule: String, available: String },

    #[error("unknown strategy '{name}'; available: {available}")]
    UnknownStrategy { name: String, available: String },

    #[error("bad strategy params: {0}")]
    BadParams(String),
}

impl ConfigError {
    pub fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        ConfigError::InvalidParameter { name, message: message.into() }
    }
}

/// Order rejected by the paper broker. Surfaced to the strategy through
/// order status REJECTED with the error text as reason; never fatal.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("LIMIT order without price")]
    LimitWithoutPrice,

    #[error("tick_size {tick} violated: price={price}")]
    TickSizeViolated { price: f64, tick: f64 },

    #[error("step_size {step} violated: qty={qty}")]
    StepSizeViolated { qty: f64, step: f64 },

    #[error("min_notional violated: {notional:.8} < {min_notional:.8}")]
    MinNotionalViolated { notional: f64, min_notional: f64 },

    #[error("min_qty violated: {qty} < {min_qty}")]
    MinQtyViolated { qty: f64, min_qty: f64 },

    #[error("non-positive quantity: {0}")]
    NonPositiveQty(f64),

    #[error("order {0} not found")]
    UnknownOrder(OrderId),
}

/// Transient trade source failure. The source retries internally with
/// backoff; `Exhausted` means retries ran out and the engine should treat
/// the stream as ended.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("malformed trade record at line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("out-of-order timestamp: {current} < {previous}")]
    OutOfOrder { previous: i64, current: i64 },

    #[error("source retries exhausted: {0}")]
    Exhausted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// File I/O failure while appending a row. Logged; the row is dropped and
/// previously written rows stay intact.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("json encode failed: {0}")]
    Json(#[from] serde_json::Error),
}
