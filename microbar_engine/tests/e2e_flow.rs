//! End-to-end pipeline tests: synthetic trade stream → bars → strategy →
//! paper broker → run-directory outputs. Checks row ordering, trade
//! conservation, the liquidation step and replay determinism.

use std::path::Path;
use std::time::Duration;

use tokio::sync::watch;

use microbar_engine::bars;
use microbar_engine::broker::PaperBroker;
use microbar_engine::costs::CostModel;
use microbar_engine::engine::{EngineConfig, LiveEngine};
use microbar_engine::source::ChannelSource;
use microbar_engine::strategies::momentum::{MomentumConfig, MomentumStrategy};
use microbar_engine::strategy::build_strategy;
use microbar_engine::types::Trade;
use microbar_engine::writers::Summary;

fn trade(price: f64, qty: f64, ts: i64) -> Trade {
    Trade { price, qty, timestamp: ts, is_buyer_maker: false }
}

/// Flat warmup, one jump (momentum entry), one pump (take profit).
/// With a volume limit of 1.0 and trade qty 0.5 every 2 trades close a bar.
fn scripted_trades() -> Vec<Trade> {
    let mut trades = Vec::new();
    let mut ts = 1_000i64;
    for _ in 0..20 {
        trades.push(trade(100.0, 0.5, ts));
        ts += 100;
    }
    for _ in 0..2 {
        trades.push(trade(102.0, 0.5, ts));
        ts += 100;
    }
    for _ in 0..2 {
        trades.push(trade(104.55, 0.5, ts));
        ts += 100;
    }
    trades
}

fn momentum_cfg() -> MomentumConfig {
    MomentumConfig {
        lookback_ticks: 10,
        volatility_window: 10,
        entry_threshold: 0.002,
        exit_threshold: 0.001,
        min_volatility: 0.0,
        max_volatility: 0.05,
        cooldown_bars: 0,
        trend_confirmation: false,
        order_notional: 100.0,
        stop_loss_pct: 0.01,
        take_profit_pct: 0.02,
        min_profit_bps: 30.0,
        ..MomentumConfig::default()
    }
}

async fn run_momentum_session(run_dir: &Path, trades: Vec<Trade>) -> Summary {
    let (tx, mut source) = ChannelSource::pair(trades.len() + 1);
    for t in trades {
        tx.send(t).await.unwrap();
    }
    drop(tx);

    let mut builder = bars::make("volume_qty", 1.0, None).unwrap();
    let mut broker = PaperBroker::new(10_000.0, CostModel::fixed(0.0, 0.0));
    let mut strategy = MomentumStrategy::new(momentum_cfg()).unwrap();

    let engine =
        LiveEngine::new(EngineConfig::new("BTCUSDT", 10_000.0), run_dir, "volume_qty", 1.0)
            .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let summary = engine
        .run(&mut source, &mut builder, &mut broker, &mut strategy, shutdown_rx)
        .await;
    drop(shutdown_tx);
    summary
}

fn read_lines(run_dir: &Path, name: &str) -> Vec<String> {
    std::fs::read_to_string(run_dir.join(name))
        .unwrap_or_else(|_| panic!("{name} missing"))
        .lines()
        .map(str::to_owned)
        .collect()
}

#[tokio::test]
async fn full_flow_produces_consistent_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let trades = scripted_trades();
    let n_trades = trades.len() as u64;
    let summary = run_momentum_session(dir.path(), trades).await;

    assert_eq!(summary.trades_processed, n_trades);
    assert_eq!(summary.bars_emitted, 12, "24 trades at 2 per bar");
    assert_eq!(summary.orders_buy, 1, "one momentum entry");
    assert_eq!(summary.orders_sell, 1, "one take-profit exit");
    assert!(summary.pnl > 0.0);
    assert_eq!(summary.num_winning_trades, 1);

    // data.csv: one row per bar, trade counts sum to the trades consumed.
    let data = read_lines(dir.path(), "data.csv");
    assert_eq!(data.len() as u64, 1 + summary.bars_emitted);
    let tc_sum: u64 = data[1..]
        .iter()
        .map(|l| l.split(',').nth(6).unwrap().parse::<u64>().unwrap())
        .sum();
    assert_eq!(tc_sum, n_trades, "no trade lost or double-counted");

    // equity.csv: strict bar order, one row per bar.
    let equity = read_lines(dir.path(), "equity.csv");
    assert_eq!(equity.len() as u64, 1 + summary.bars_emitted);
    let ts_col: Vec<i64> =
        equity[1..].iter().map(|l| l.split(',').next().unwrap().parse().unwrap()).collect();
    assert!(ts_col.windows(2).all(|w| w[0] <= w[1]), "equity rows out of order");

    // trades.csv: entry precedes exit, with the bar timestamps.
    let trade_rows = read_lines(dir.path(), "trades.csv");
    assert_eq!(trade_rows.len(), 3);
    assert!(trade_rows[1].contains(",BUY,"));
    assert!(trade_rows[1].contains(",entry"));
    assert!(trade_rows[2].contains(",SELL,"));
    assert!(trade_rows[2].contains(",take_profit"));

    // The trade row of a bar precedes that bar's equity row: the entry
    // fill carries the same timestamp as its equity row, and equity for
    // that bar reflects the position opened by the fill.
    let entry_ts: i64 = trade_rows[1].split(',').next().unwrap().parse().unwrap();
    let eq_row = equity[1..]
        .iter()
        .find(|l| l.starts_with(&format!("{entry_ts},")))
        .expect("equity row for the entry bar");
    let pos_qty: f64 = eq_row.split(',').nth(3).unwrap().parse().unwrap();
    assert!(pos_qty > 0.0, "equity row must already see the fill");

    // decisions.csv mirrors the two intents.
    let decisions = read_lines(dir.path(), "decisions.csv");
    assert_eq!(decisions.len(), 3);

    // returns.csv, quality.json and summary.json exist and parse.
    let returns = read_lines(dir.path(), "returns.csv");
    assert_eq!(returns.len() as u64, 1 + summary.bars_emitted);
    let quality: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("quality.json")).unwrap())
            .unwrap();
    assert_eq!(quality["bars_processed"], 12);
    let summary_json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("summary.json")).unwrap())
            .unwrap();
    assert_eq!(summary_json["orders_executed"], 2);
}

#[tokio::test]
async fn replay_is_byte_deterministic() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    run_momentum_session(dir_a.path(), scripted_trades()).await;
    run_momentum_session(dir_b.path(), scripted_trades()).await;

    for name in ["data.csv", "equity.csv", "trades.csv", "decisions.csv", "returns.csv"] {
        let a = std::fs::read(dir_a.path().join(name)).unwrap();
        let b = std::fs::read(dir_b.path().join(name)).unwrap();
        assert_eq!(a, b, "{name} differs between identical replays");
    }
}

#[tokio::test]
async fn buy_and_hold_liquidates_at_session_end() {
    let dir = tempfile::tempdir().unwrap();
    let trades: Vec<Trade> =
        (0..10).map(|i| trade(100.0 + i as f64, 0.5, 1_000 + i * 100)).collect();

    let (tx, mut source) = ChannelSource::pair(16);
    for t in trades {
        tx.send(t).await.unwrap();
    }
    drop(tx);

    let mut builder = bars::make("tick_count", 2.0, None).unwrap();
    let mut broker = PaperBroker::new(1_000.0, CostModel::fixed(0.0, 0.0));
    let mut strategy = build_strategy("buy_and_hold", &serde_json::json!({})).unwrap();

    let engine =
        LiveEngine::new(EngineConfig::new("BTCUSDT", 1_000.0), dir.path(), "tick_count", 2.0)
            .unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let summary = engine
        .run(&mut source, &mut builder, &mut broker, strategy.as_mut(), shutdown_rx)
        .await;
    drop(shutdown_tx);

    // Entry on the first bar, liquidation at the end.
    assert_eq!(summary.orders_buy, 1);
    assert_eq!(summary.orders_sell, 1);
    assert_eq!(broker.position_qty("BTCUSDT"), 0.0, "liquidation must flatten");
    let trade_rows = read_lines(dir.path(), "trades.csv");
    assert!(trade_rows.last().unwrap().contains("close_position_end"));
    // Prices rose after the entry: the session must end profitable.
    assert!(summary.pnl > 0.0);
}

#[tokio::test]
async fn shutdown_signal_ends_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, mut source) = ChannelSource::pair(4);
    // Keep the sender alive: the stream never ends on its own.
    let mut builder = bars::make("tick_count", 2.0, None).unwrap();
    let mut broker = PaperBroker::new(1_000.0, CostModel::fixed(0.0, 0.0));
    let mut strategy = build_strategy("buy_and_hold", &serde_json::json!({})).unwrap();

    let engine =
        LiveEngine::new(EngineConfig::new("BTCUSDT", 1_000.0), dir.path(), "tick_count", 2.0)
            .unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    shutdown_tx.send(true).unwrap();

    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        engine.run(&mut source, &mut builder, &mut broker, strategy.as_mut(), shutdown_rx),
    )
    .await
    .expect("engine must stop on the shutdown signal");
    drop(tx);

    assert_eq!(summary.bars_emitted, 0);
    // Headers are in place even for an empty session.
    assert!(dir.path().join("data.csv").exists());
    assert!(dir.path().join("summary.json").exists());
}
