/// strategies.rs — Concrete strategy implementations.
///
/// All variants share the sizing convention
/// `notional = min(order_notional, cash · qty_frac)` and submit orders
/// through the executor only.

pub mod buy_and_hold;
pub mod momentum;
pub mod vol_breakout;
pub mod vwap_reversion;

pub use buy_and_hold::BuyAndHoldStrategy;
pub use momentum::{MomentumConfig, MomentumStrategy};
pub use vol_breakout::{VolBreakoutConfig, VolBreakoutStrategy};
pub use vwap_reversion::{VwapReversionConfig, VwapReversionStrategy};
