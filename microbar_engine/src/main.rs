/// main.rs — Backtest entry point: replay a recorded trade file through
/// the full pipeline (bars → strategy → paper broker → run directory).
///
/// Usage:
///     backtest --run-dir runs/20250101T000000Z \
///         --trades data/btcusdt_trades.csv \
///         --symbol BTCUSDT --cash 10000 --fees-bps 10 --slip-bps 1 \
///         --rule volume_qty --limit 0.05 \
///         --strategy momentum --params '{"lookback_ticks": 50}'
///
/// Replays are deterministic: same trade file + same configuration ⇒
/// byte-identical output CSVs.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use microbar_engine::bars;
use microbar_engine::broker::PaperBroker;
use microbar_engine::config::{DEFAULT_BAR_LIMIT, DEFAULT_FEES_BPS, DEFAULT_SLIP_BPS};
use microbar_engine::costs::CostModel;
use microbar_engine::engine::{EngineConfig, LiveEngine};
use microbar_engine::executor::MarketExecutor;
use microbar_engine::source::ReplaySource;
use microbar_engine::strategy::{build_strategy, Strategy};
use microbar_engine::types::Bar;
use microbar_engine::writers::{write_json, Manifest};

#[derive(Parser, Debug)]
#[command(name = "backtest", about = "Replay recorded trades through the paper-trading pipeline")]
struct Args {
    /// Directory for all session outputs (created if missing).
    #[arg(long = "run-dir")]
    run_dir: PathBuf,

    /// Trade file to replay (.csv: t,price,qty,is_buyer_maker — or .jsonl).
    #[arg(long)]
    trades: PathBuf,

    #[arg(long, default_value = "BTCUSDT")]
    symbol: String,

    /// Initial capital (USDT).
    #[arg(long, default_value_t = 10_000.0)]
    cash: f64,

    /// Commission in bps per fill.
    #[arg(long = "fees-bps", default_value_t = DEFAULT_FEES_BPS)]
    fees_bps: f64,

    /// Fixed slippage in bps.
    #[arg(long = "slip-bps", default_value_t = DEFAULT_SLIP_BPS)]
    slip_bps: f64,

    /// Bar closing rule: tick_count | volume_qty | dollar | imbalance.
    #[arg(long, default_value = "volume_qty")]
    rule: String,

    /// Closing threshold for the rule.
    #[arg(long, default_value_t = DEFAULT_BAR_LIMIT)]
    limit: f64,

    /// Imbalance accumulation mode: qty | tick.
    #[arg(long = "imbal-mode")]
    imbal_mode: Option<String>,

    /// Strategy name from the registry; omit for a bars-only run.
    #[arg(long)]
    strategy: Option<String>,

    /// Strategy params as a JSON object.
    #[arg(long)]
    params: Option<String>,

    /// Also write the extended bars.csv through the background writer.
    #[arg(long = "bar-log", default_value_t = false)]
    bar_log: bool,

    /// Cap on trades processed (debugging).
    #[arg(long = "max-trades")]
    max_trades: Option<u64>,
}

/// Bars-only mode: collect data without trading.
#[derive(Debug)]
struct PassiveStrategy;

impl Strategy for PassiveStrategy {
    fn name(&self) -> &'static str {
        "passive"
    }
    fn on_bar(&mut self, _: &mut PaperBroker, _: &mut MarketExecutor, _: &str, _: &Bar) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    std::fs::create_dir_all(&args.run_dir)
        .with_context(|| format!("cannot create run dir {}", args.run_dir.display()))?;

    let params: serde_json::Value = match &args.params {
        Some(raw) => serde_json::from_str(raw).context("--params must be a JSON object")?,
        None => serde_json::json!({}),
    };

    // ── Assemble the pipeline ─────────────────────────────────────────────
    let mut builder = bars::make(&args.rule, args.limit, args.imbal_mode.as_deref())?;

    let started_ts = Utc::now();
    let manifest = Manifest {
        run_id: started_ts.format("%Y%m%dT%H%M%SZ").to_string(),
        started_ts: started_ts.timestamp_millis() as f64 / 1000.0,
        symbol: args.symbol.clone(),
        testnet: false,
        duration_s: None,
        cash: args.cash,
        fees_bps: args.fees_bps,
        slip_bps: Some(args.slip_bps),
        rule: builder.rule_name().to_owned(),
        limit: builder.limit(),
        strategy: args.strategy.clone(),
        params: params.clone(),
    };
    write_json(&args.run_dir, "manifest.json", &manifest)
        .context("cannot write manifest.json")?;
    let cost_model = CostModel::fixed(args.fees_bps, args.slip_bps);
    let mut broker = PaperBroker::new(args.cash, cost_model);
    let mut strategy: Box<dyn Strategy> = match &args.strategy {
        Some(name) => build_strategy(name, &params)?,
        None => Box::new(PassiveStrategy),
    };
    let mut source = ReplaySource::open(&args.trades)?;

    let mut engine_cfg = EngineConfig::new(&args.symbol, args.cash);
    engine_cfg.max_trades = args.max_trades;
    engine_cfg.bar_session_log = args.bar_log;
    let engine = LiveEngine::new(engine_cfg, &args.run_dir, builder.rule_name(), builder.limit())?;

    // Ctrl-C ends the replay cleanly: liquidate, flush, summarize.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let summary = engine
        .run(&mut source, &mut builder, &mut broker, strategy.as_mut(), shutdown_rx)
        .await;

    info!(
        "final equity ${:.2}  pnl ${:+.2} ({:+.2}%)",
        summary.final_equity, summary.pnl, summary.return_pct
    );
    info!("results saved to {}", args.run_dir.display());
    Ok(())
}
