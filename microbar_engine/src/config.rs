/// config.rs — Centralised configuration loaded from .env
///
/// Environment variables supply session defaults; the CLI flags of the
/// binaries override whatever is loaded here. Loading happens once at
/// startup.

use anyhow::Result;
use std::env;

/// Binance spot taker fee, in bps (0.1%).
pub const DEFAULT_FEES_BPS: f64 = 10.0;
/// Conservative fixed slippage when dynamic mode is off.
pub const DEFAULT_SLIP_BPS: f64 = 5.0;
/// Default volume-bar threshold in base asset (≈ $4.5k per bar on BTC).
pub const DEFAULT_BAR_LIMIT: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct AppConfig {
    // ── Trading universe ─────────────────────────────────────────────
    pub symbol: String,
    pub testnet: bool,

    // ── Capital & costs ──────────────────────────────────────────────
    /// Initial paper cash in USDT.
    pub starting_cash: f64,
    pub fees_bps: f64,
    /// None ⇒ dynamic slippage from the spread tracker.
    pub slip_bps: Option<f64>,

    // ── Bar construction ─────────────────────────────────────────────
    /// tick_count | volume_qty | dollar | imbalance
    pub bar_rule: String,
    pub bar_limit: f64,

    // ── Strategy ─────────────────────────────────────────────────────
    pub strategy: Option<String>,
    /// JSON object of strategy params.
    pub strategy_params: String,

    // ── Session ──────────────────────────────────────────────────────
    /// Wall-clock cap in seconds (live mode).
    pub duration_s: u64,
}

impl AppConfig {
    /// Load configuration from environment variables (after dotenv).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // ignore missing .env

        let slip_bps = match env::var("SLIP_BPS") {
            Ok(v) if v.trim().eq_ignore_ascii_case("dynamic") => None,
            Ok(v) => Some(v.parse::<f64>().map_err(|e| anyhow::anyhow!("SLIP_BPS: {e}"))?),
            Err(_) => Some(DEFAULT_SLIP_BPS),
        };

        Ok(Self {
            symbol: env::var("SYMBOL").unwrap_or_else(|_| "BTCUSDT".into()),
            testnet: env::var("USE_TESTNET")
                .unwrap_or_else(|_| "true".into())
                .to_lowercase()
                == "true",

            starting_cash: parse_env("STARTING_CASH", 10_000.0)?,
            fees_bps: parse_env("FEES_BPS", DEFAULT_FEES_BPS)?,
            slip_bps,

            bar_rule: env::var("BAR_RULE").unwrap_or_else(|_| "volume_qty".into()),
            bar_limit: parse_env("BAR_LIMIT", DEFAULT_BAR_LIMIT)?,

            strategy: env::var("STRATEGY").ok().filter(|s| !s.trim().is_empty()),
            strategy_params: env::var("STRATEGY_PARAMS").unwrap_or_else(|_| "{}".into()),

            duration_s: parse_env("DURATION_S", 600u64)?,
        })
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Config key {key}: {e}")),
        Err(_) => Ok(default),
    }
}
