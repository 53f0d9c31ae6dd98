// End-to-end engine scenarios and cross-cutting invariants

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use crate::backtesting::engine::BacktestEngine;
use crate::backtesting::position::Position;
use crate::config::{RebalanceFrequency, StrategyConfig};
use crate::data::{AlignedUniverse, PriceSeries};
use crate::error::BacktestError;
use crate::optimizer::OptimizationMethod;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn universe_from(closes: &[(&str, Vec<f64>)]) -> AlignedUniverse {
    let mut map = HashMap::new();
    for (symbol, series) in closes {
        map.insert(
            symbol.to_string(),
            PriceSeries::from_closes(*symbol, d(2024, 1, 1), series).unwrap(),
        );
    }
    AlignedUniverse::build(&map).unwrap()
}

fn frictionless_config() -> StrategyConfig {
    StrategyConfig {
        lookback_period: 1,
        optimization_lookback: 1,
        rebalance_frequency: RebalanceFrequency::Daily,
        position_count: 1,
        absolute_threshold: 0.0,
        commission: 0.0,
        slippage: 0.0,
        initial_capital: 10_000.0,
        ..Default::default()
    }
}

// ── Scenario: single-asset buy and hold ─────────────────────────────────

#[test]
fn test_single_asset_buy_and_hold() {
    let universe = universe_from(&[("A", vec![99.0, 100.0, 110.0, 121.0])]);
    let mut engine = BacktestEngine::new(frictionless_config()).unwrap();
    let result = engine.run(&universe).unwrap();

    // First rebalance lands on the 100 close once the 1-day lookback is
    // covered; 10,000 buys exactly 100 shares.
    assert!((result.final_capital - 12_100.0).abs() < 1e-6);
    assert!((result.metrics.total_return - 0.21).abs() < 1e-9);
    // The holding is never closed, so no round trips are recorded.
    assert!(result.trades.is_empty());

    let last = result.position_history.last().unwrap();
    assert_eq!(last.holdings.len(), 1);
    assert!((last.holdings[0].quantity - 100.0).abs() < 1e-9);
}

// ── Scenario: sells execute before buys ─────────────────────────────────

#[test]
fn test_sell_before_buy_rotation() {
    let flat = vec![100.0; 5];
    let universe = universe_from(&[
        ("W", flat.clone()),
        ("X", flat.clone()),
        ("Y", flat.clone()),
        ("Z", flat),
    ]);

    let mut config = frictionless_config();
    config.commission = 0.001;
    let mut engine = BacktestEngine::new(config).unwrap();

    // Seed the book: X 30%, Y 30%, Z 40% of a 100k portfolio, no cash.
    engine.cash = 0.0;
    for (symbol, quantity) in [("X", 300.0), ("Y", 300.0), ("Z", 400.0)] {
        engine.positions.insert(
            symbol.to_string(),
            Position::open(symbol.to_string(), quantity, 100.0, d(2024, 1, 1), 0.0, 0.0),
        );
        engine
            .positions
            .get_mut(symbol)
            .unwrap()
            .mark(100.0);
    }

    let mut targets = BTreeMap::new();
    targets.insert("W".to_string(), 0.30);
    targets.insert("X".to_string(), 0.30);
    targets.insert("Y".to_string(), 0.40);
    engine.execute_rebalance(&universe, 2, &targets).unwrap();

    // Z exits entirely and is the only closed round trip.
    assert!(!engine.positions.contains_key("Z"));
    assert_eq!(engine.trades.len(), 1);
    assert_eq!(engine.trades[0].symbol, "Z");

    // W entered, Y topped up, X untouched.
    let w = &engine.positions["W"];
    let x = &engine.positions["X"];
    let y = &engine.positions["Y"];
    assert!((x.quantity - 300.0).abs() < 1e-9);
    assert!((w.quantity - 300.0).abs() < 1.0);
    assert!(y.quantity > 395.0, "buy starved of cash: {}", y.quantity);

    // Only frictions remain in cash: less than 1% of the book.
    let value: f64 = engine.cash
        + engine
            .positions
            .values()
            .map(Position::market_value)
            .sum::<f64>();
    assert!(engine.cash >= 0.0);
    assert!(engine.cash < 0.01 * value, "cash drag: {}", engine.cash);
}

// ── Scenario: defensive rotation into the safe asset ────────────────────

#[test]
fn test_defensive_rotation_into_safe_asset() {
    let falling: Vec<f64> = (0..40).map(|i| 100.0 * 0.995f64.powi(i)).collect();
    let falling2: Vec<f64> = (0..40).map(|i| 80.0 * 0.994f64.powi(i)).collect();
    let flat = vec![50.0; 40];
    let universe = universe_from(&[("A", falling), ("B", falling2), ("S", flat)]);

    let mut config = frictionless_config();
    config.position_count = 2;
    config.safe_asset = Some("S".to_string());
    config.rebalance_frequency = RebalanceFrequency::Monthly;
    let mut engine = BacktestEngine::new(config).unwrap();
    let result = engine.run(&universe).unwrap();

    // The whole book sits in the safe asset from the first rebalance on.
    let last = result.position_history.last().unwrap();
    assert_eq!(last.holdings.len(), 1);
    assert_eq!(last.holdings[0].symbol, "S");
    assert!(last.holdings[0].pct > 99.0);
    assert!(result.final_capital > 9_999.0); // flat safe asset preserves capital
}

#[test]
fn test_all_assets_fail_without_safe_asset_holds_cash() {
    let falling: Vec<f64> = (0..30).map(|i| 100.0 * 0.99f64.powi(i)).collect();
    let falling2: Vec<f64> = (0..30).map(|i| 90.0 * 0.985f64.powi(i)).collect();
    let universe = universe_from(&[("A", falling), ("B", falling2)]);

    let mut config = frictionless_config();
    config.position_count = 2;
    let mut engine = BacktestEngine::new(config).unwrap();
    let result = engine.run(&universe).unwrap();

    assert!(result.position_history.iter().all(|s| s.holdings.is_empty()));
    assert!((result.final_capital - 10_000.0).abs() < 1e-9);
    assert_eq!(result.metrics.total_return, 0.0);
}

// ── Safe-asset split when only some slots fill ──────────────────────────

#[test]
fn test_partial_fill_splits_between_risky_and_safe() {
    let rising: Vec<f64> = (0..30).map(|i| 100.0 * 1.005f64.powi(i)).collect();
    let falling: Vec<f64> = (0..30).map(|i| 100.0 * 0.99f64.powi(i)).collect();
    let flat = vec![50.0; 30];
    let universe = universe_from(&[("UP", rising), ("DOWN", falling), ("S", flat)]);

    let mut config = frictionless_config();
    config.position_count = 2;
    config.safe_asset = Some("S".to_string());
    let mut engine = BacktestEngine::new(config).unwrap();
    let result = engine.run(&universe).unwrap();

    // One of two slots filled: risk share 1/2, safe share 1/2.
    let last = result.position_history.last().unwrap();
    let pct: HashMap<&str, f64> = last
        .holdings
        .iter()
        .map(|h| (h.symbol.as_str(), h.pct))
        .collect();
    assert!(pct["UP"] > 40.0 && pct["UP"] < 60.0, "UP pct {:?}", pct);
    assert!(pct["S"] > 40.0 && pct["S"] < 60.0, "S pct {:?}", pct);
}

// ── Boundary behaviors ──────────────────────────────────────────────────

#[test]
fn test_lookback_exceeding_history_never_trades() {
    let universe = universe_from(&[("A", vec![100.0, 101.0, 102.0])]);
    let mut config = frictionless_config();
    config.lookback_period = 50;
    config.optimization_lookback = 50;
    let mut engine = BacktestEngine::new(config).unwrap();
    let result = engine.run(&universe).unwrap();

    assert!(result.trades.is_empty());
    assert_eq!(result.metadata.rebalance_count, 0);
    assert!((result.final_capital - 10_000.0).abs() < 1e-9);
}

#[test]
fn test_one_day_backtest_yields_zero_metrics() {
    let universe = universe_from(&[("A", vec![100.0])]);
    let mut engine = BacktestEngine::new(frictionless_config()).unwrap();
    let result = engine.run(&universe).unwrap();

    assert!(result.returns.is_empty());
    assert_eq!(result.metrics.total_return, 0.0);
    assert_eq!(result.metrics.max_drawdown, 0.0);
    assert_eq!(result.metrics.sharpe_ratio, 0.0);
}

#[test]
fn test_missing_safe_asset_is_configuration_error() {
    let universe = universe_from(&[("A", vec![100.0, 101.0])]);
    let mut config = frictionless_config();
    config.safe_asset = Some("BIL".to_string());
    let mut engine = BacktestEngine::new(config).unwrap();
    let err = engine.run(&universe).unwrap_err();

    match err {
        BacktestError::Configuration { message } => {
            assert!(message.contains("BIL"));
            assert!(message.contains("universe"));
        }
        other => panic!("expected configuration error, got {:?}", other),
    }
}

#[test]
fn test_missing_benchmark_degrades_with_warning() {
    let universe = universe_from(&[("A", vec![99.0, 100.0, 101.0, 102.0])]);
    let mut config = frictionless_config();
    config.benchmark = Some("SPY".to_string());
    let mut engine = BacktestEngine::new(config).unwrap();
    let result = engine.run(&universe).unwrap();

    assert!(result.metrics.benchmark.is_none());
    assert!(result
        .metadata
        .warnings
        .iter()
        .any(|w| w.contains("SPY")));
}

#[test]
fn test_benchmark_metrics_present_when_data_available() {
    let rising: Vec<f64> = (0..50).map(|i| 100.0 * 1.002f64.powi(i)).collect();
    let spy: Vec<f64> = (0..50).map(|i| 400.0 * 1.001f64.powi(i)).collect();
    let universe = universe_from(&[("A", rising), ("SPY", spy)]);

    let mut config = frictionless_config();
    config.benchmark = Some("SPY".to_string());
    let mut engine = BacktestEngine::new(config).unwrap();
    let result = engine.run(&universe).unwrap();

    assert!(result.metrics.benchmark.is_some());
    assert_eq!(result.metadata.benchmark_mode.as_deref(), Some("passive"));
}

// ── Run-level invariants ────────────────────────────────────────────────

#[test]
fn test_snapshots_satisfy_accounting_identity() {
    let a: Vec<f64> = (0..60)
        .map(|i| 100.0 * (1.0 + 0.002 * ((i as f64 * 0.7).sin() + 0.3)).powi(i))
        .collect();
    let b: Vec<f64> = (0..60)
        .map(|i| 80.0 * (1.0 + 0.003 * ((i as f64 * 1.1).cos() + 0.2)).powi(i))
        .collect();
    let universe = universe_from(&[("A", a), ("B", b)]);

    let mut config = frictionless_config();
    config.position_count = 2;
    config.commission = 0.001;
    config.slippage = 0.0005;
    config.lookback_period = 5;
    config.optimization_lookback = 5;
    let mut engine = BacktestEngine::new(config).unwrap();
    let result = engine.run(&universe).unwrap();

    assert!(result.metadata.rebalance_count > 0);
    for snapshot in &result.position_history {
        assert!(snapshot.is_consistent(1e-6), "snapshot at {}", snapshot.date);
        assert!(snapshot.cash >= -1e-9, "negative cash at {}", snapshot.date);
        let pct_sum: f64 = snapshot.holdings.iter().map(|h| h.pct).sum();
        assert!(pct_sum <= 100.0 + 1e-4, "levered book at {}", snapshot.date);
    }

    // Equity timestamps are strictly increasing.
    for pair in result.equity_curve.dates.windows(2) {
        assert!(pair[0] < pair[1]);
    }
}

#[test]
fn test_same_config_same_data_is_deterministic() {
    let a: Vec<f64> = (0..80)
        .map(|i| 100.0 * (1.0 + 0.01 * (i as f64 * 0.9).sin()))
        .collect();
    let b: Vec<f64> = (0..80)
        .map(|i| 90.0 * (1.0 + 0.012 * (i as f64 * 1.3).cos()))
        .collect();
    let c: Vec<f64> = (0..80).map(|i| 50.0 + 0.1 * i as f64).collect();
    let make_universe = || universe_from(&[("A", a.clone()), ("B", b.clone()), ("C", c.clone())]);

    let mut config = frictionless_config();
    config.position_count = 3;
    config.lookback_period = 10;
    config.optimization_lookback = 10;
    config.optimization_method = OptimizationMethod::RiskParity;
    config.rebalance_frequency = RebalanceFrequency::Weekly;
    config.commission = 0.001;

    let run = |config: StrategyConfig| {
        let mut engine = BacktestEngine::new(config).unwrap();
        engine.run(&make_universe()).unwrap()
    };
    let first = run(config.clone());
    let second = run(config);

    assert_eq!(first.equity_curve.values, second.equity_curve.values);
    assert_eq!(first.trades.len(), second.trades.len());
    for (a, b) in first.trades.iter().zip(&second.trades) {
        assert_eq!(a.pnl, b.pnl);
        assert_eq!(a.quantity, b.quantity);
    }
}

#[test]
fn test_cancellation_stops_at_rebalance_boundary() {
    use std::sync::atomic::AtomicBool;

    let universe = universe_from(&[("A", vec![99.0, 100.0, 101.0, 102.0, 103.0])]);
    let cancel = AtomicBool::new(true);
    let mut engine = BacktestEngine::new(frictionless_config()).unwrap();
    let err = engine.run_cancellable(&universe, &cancel).unwrap_err();
    assert!(matches!(err, BacktestError::Cancelled { .. }));
}

#[test]
fn test_commission_and_slippage_reduce_final_capital() {
    let rising: Vec<f64> = (0..40).map(|i| 100.0 * 1.003f64.powi(i)).collect();
    let make_universe = || universe_from(&[("A", rising.clone())]);

    let free = {
        let mut engine = BacktestEngine::new(frictionless_config()).unwrap();
        engine.run(&make_universe()).unwrap()
    };
    let costly = {
        let mut config = frictionless_config();
        config.commission = 0.002;
        config.slippage = 0.001;
        let mut engine = BacktestEngine::new(config).unwrap();
        engine.run(&make_universe()).unwrap()
    };

    assert!(costly.final_capital < free.final_capital);
    assert!(costly.final_capital > 0.0);
}
