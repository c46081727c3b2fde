/// live_main.rs — Paper trading entry point.
///
/// Drives the live pipeline against a trade stream replayed at recorded
/// pace (the exchange WebSocket client is an external producer with the
/// same record contract: {t, price, qty, is_buyer_maker}).
///
/// FLOW:
///   1. Load .env defaults, apply CLI overrides
///   2. Create the run directory and write manifest.json
///   3. Build builder / cost model / paper broker / strategy
///   4. Stream trades through the engine until the duration elapses,
///      the stream ends or Ctrl-C fires
///   5. Liquidate, stop the spread tracker, flush writers, write
///      quality.json + summary.json + returns.csv
///
/// Exit code is 0 on any clean end including Ctrl-C; non-zero only for
/// unrecoverable configuration errors.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use microbar_engine::bars;
use microbar_engine::broker::PaperBroker;
use microbar_engine::config::AppConfig;
use microbar_engine::costs::CostModel;
use microbar_engine::engine::{EngineConfig, LiveEngine};
use microbar_engine::executor::MarketExecutor;
use microbar_engine::source::ReplaySource;
use microbar_engine::spread::{SpreadTracker, DEFAULT_SPREAD_WINDOW};
use microbar_engine::strategy::{build_strategy, Strategy};
use microbar_engine::types::Bar;
use microbar_engine::writers::{write_json, Manifest};

#[derive(Parser, Debug)]
#[command(name = "paper_trader", about = "Paper trading over a live-paced trade stream")]
struct Args {
    /// Directory for all session outputs (created if missing).
    #[arg(long = "run-dir")]
    run_dir: PathBuf,

    /// Trade stream file (.csv or .jsonl), replayed at recorded pace.
    #[arg(long)]
    trades: PathBuf,

    #[arg(long)]
    symbol: Option<String>,

    /// Session length in seconds.
    #[arg(long)]
    duration: Option<u64>,

    /// Initial capital (USDT).
    #[arg(long)]
    cash: Option<f64>,

    #[arg(long = "fees-bps")]
    fees_bps: Option<f64>,

    /// Slippage in bps; omit for dynamic slippage from the spread tracker.
    #[arg(long = "slip-bps")]
    slip_bps: Option<f64>,

    /// Bar closing rule: tick_count | volume_qty | dollar | imbalance.
    #[arg(long)]
    rule: Option<String>,

    /// Closing threshold for the rule.
    #[arg(long)]
    limit: Option<f64>,

    /// Strategy name from the registry; omit for a bars-only run.
    #[arg(long)]
    strategy: Option<String>,

    /// Strategy params as a JSON object.
    #[arg(long)]
    params: Option<String>,

    /// Use the exchange testnet stream (recorded in the manifest).
    #[arg(long, default_value_t = false)]
    testnet: bool,

    /// Replay speed multiplier (2.0 = twice the recorded pace).
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Disable the chart_<tf>.csv time bars (on by default).
    #[arg(long = "no-charts", default_value_t = false)]
    no_charts: bool,

    /// Fill empty chart intervals with flat bars.
    #[arg(long = "gap-fill", default_value_t = false)]
    gap_fill: bool,
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
    let env_cfg = AppConfig::from_env()?;

    // CLI beats .env, .env beats built-in defaults.
    let symbol = args.symbol.unwrap_or(env_cfg.symbol);
    let cash = args.cash.unwrap_or(env_cfg.starting_cash);
    let fees_bps = args.fees_bps.unwrap_or(env_cfg.fees_bps);
    let slip_bps = args.slip_bps.or(env_cfg.slip_bps);
    let rule = args.rule.unwrap_or(env_cfg.bar_rule);
    let limit = args.limit.unwrap_or(env_cfg.bar_limit);
    let duration_s = args.duration.unwrap_or(env_cfg.duration_s);
    let strategy_name = args.strategy.or(env_cfg.strategy);
    let raw_params = args.params.unwrap_or(env_cfg.strategy_params);
    let testnet = args.testnet || env_cfg.testnet;

    std::fs::create_dir_all(&args.run_dir)
        .with_context(|| format!("cannot create run dir {}", args.run_dir.display()))?;

    let params: serde_json::Value =
        serde_json::from_str(&raw_params).context("--params must be a JSON object")?;

    let mut builder = bars::make(&rule, limit, None)?;

    let started_ts = Utc::now();
    let manifest = Manifest {
        run_id: started_ts.format("%Y%m%dT%H%M%SZ").to_string(),
        started_ts: started_ts.timestamp_millis() as f64 / 1000.0,
        symbol: symbol.clone(),
        testnet,
        duration_s: Some(duration_s),
        cash,
        fees_bps,
        slip_bps,
        rule: builder.rule_name().to_owned(),
        limit: builder.limit(),
        strategy: strategy_name.clone(),
        params: params.clone(),
    };
    write_json(&args.run_dir, "manifest.json", &manifest)
        .context("cannot write manifest.json")?;

    info!("╔══════════════════════════════════════════════╗");
    info!("║        PAPER TRADING — MICRO-BAR ENGINE      ║");
    info!("╚══════════════════════════════════════════════╝");
    info!("symbol {symbol}  testnet {testnet}  duration {duration_s}s  cash ${cash:.2}");
    match slip_bps {
        Some(bps) => info!("fees {fees_bps} bps | slippage {bps} bps"),
        None => info!("fees {fees_bps} bps | slippage dynamic (spread tracker)"),
    }

    // ── Cost model & optional spread tracker ──────────────────────────────
    // With no --slip-bps the broker prices slippage off the rolling spread.
    // The sample channel is the hook for an external book-ticker client;
    // with no producer attached the model sits on its 5 bps floor.
    let mut spread_parts: Option<(mpsc::Sender<_>, SpreadTracker)> = None;
    let cost_model = match slip_bps {
        Some(bps) => CostModel::fixed(fees_bps, bps),
        None => {
            let (tx, rx) = mpsc::channel(1024);
            let tracker = SpreadTracker::spawn(rx, DEFAULT_SPREAD_WINDOW);
            let model = CostModel::dynamic(fees_bps, tracker.handle(), 0.05, 1.0);
            spread_parts = Some((tx, tracker));
            model
        }
    };

    // ── Assemble the pipeline ─────────────────────────────────────────────
    let mut broker = PaperBroker::new(cash, cost_model);
    let mut strategy: Box<dyn Strategy> = match &strategy_name {
        Some(name) => {
            let s = build_strategy(name, &params)?;
            info!("strategy loaded: {name}");
            s
        }
        None => {
            warn!("no strategy configured — collecting bars only");
            Box::new(PassiveStrategy)
        }
    };
    let mut source = ReplaySource::open(&args.trades)?.with_pacing(args.speed);

    let mut engine_cfg = EngineConfig::new(&symbol, cash);
    engine_cfg.duration = Some(Duration::from_secs(duration_s));
    engine_cfg.time_charts = !args.no_charts;
    engine_cfg.gap_fill = args.gap_fill;
    engine_cfg.bar_session_log = true;
    let engine = LiveEngine::new(engine_cfg, &args.run_dir, builder.rule_name(), builder.limit())?;

    // Ctrl-C stops the trade pull; the engine still liquidates, flushes
    // and summarizes, and the process exits 0.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let summary = engine
        .run(&mut source, &mut builder, &mut broker, strategy.as_mut(), shutdown_rx)
        .await;

    if let Some((_tx, tracker)) = spread_parts.take() {
        tracker.stop();
    }

    info!("════════════════════════════════════════════");
    info!("  trades processed : {}", summary.trades_processed);
    info!("  bars emitted     : {}", summary.bars_emitted);
    info!("  orders executed  : {}", summary.orders_executed);
    info!("  starting cash    : ${:.2}", summary.starting_cash);
    info!("  final equity     : ${:.2}", summary.final_equity);
    info!("  pnl              : ${:+.2} ({:+.2}%)", summary.pnl, summary.return_pct);
    info!("════════════════════════════════════════════");
    info!("results saved to {}", args.run_dir.display());
    Ok(())
}
