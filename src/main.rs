// Demo runner - loads a CSV universe, runs one backtest, optionally sweeps

use std::collections::HashMap;

use clap::Parser;

use dualmomentum::backtesting::BacktestEngine;
use dualmomentum::config::{RebalanceFrequency, StrategyConfig};
use dualmomentum::data::{AlignedUniverse, CsvDataSource, DataSource, Timeframe};
use dualmomentum::error::BacktestError;
use dualmomentum::tuning::{ObjectiveMetric, ParameterDomain, ParameterSpace, SearchMethod, Tuner};

#[derive(Parser, Debug)]
#[command(name = "dualmomentum", about = "Momentum-strategy backtesting engine")]
struct Args {
    /// Directory holding one <SYMBOL>.csv per universe member
    #[arg(long, default_value = "data")]
    data_dir: String,

    /// Comma-separated universe (defaults to every CSV in the directory)
    #[arg(long)]
    symbols: Option<String>,

    /// Defensive rotation target; must have a CSV in the universe
    #[arg(long)]
    safe_asset: Option<String>,

    /// Comparison asset for benchmark metrics
    #[arg(long)]
    benchmark: Option<String>,

    /// Momentum lookback in trading days
    #[arg(long, default_value_t = 126)]
    lookback: usize,

    /// Maximum risky holdings
    #[arg(long, default_value_t = 3)]
    positions: usize,

    /// daily/weekly/monthly/quarterly/yearly or ND/NW/NM
    #[arg(long, default_value = "monthly")]
    frequency: String,

    /// Starting cash
    #[arg(long, default_value_t = 100_000.0)]
    capital: f64,

    /// Run a hyperparameter sweep after the base backtest
    #[arg(long)]
    tune: bool,

    /// Random-search trial count for --tune
    #[arg(long, default_value_t = 25)]
    trials: usize,

    /// Sweep seed
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), BacktestError> {
    let symbols: Vec<String> = match &args.symbols {
        Some(list) => list.split(',').map(|s| s.trim().to_string()).collect(),
        None => discover_symbols(&args.data_dir)?,
    };
    println!("Universe: {}", symbols.join(", "));

    let source = CsvDataSource::load(&args.data_dir, &symbols)?;
    let mut series = HashMap::new();
    for symbol in source.symbols() {
        let (start, end) = source
            .get_data_range(&symbol)
            .map_err(|e| BacktestError::data_unavailable(e.to_string()))?;
        let s = source
            .fetch(&symbol, start, end, Timeframe::Daily)
            .map_err(|e| BacktestError::data_unavailable(e.to_string()))?;
        series.insert(symbol, s);
    }
    let universe = AlignedUniverse::build(&series)?;
    println!(
        "Aligned {} symbols over {} trading days ({} to {})",
        universe.symbols().len(),
        universe.len(),
        universe.dates()[0],
        universe.dates().last().unwrap(),
    );

    let config = StrategyConfig {
        lookback_period: args.lookback,
        position_count: args.positions,
        rebalance_frequency: RebalanceFrequency::parse(&args.frequency)?,
        safe_asset: args.safe_asset.clone(),
        benchmark: args.benchmark.clone(),
        initial_capital: args.capital,
        ..Default::default()
    };

    let mut engine = BacktestEngine::new(config.clone())?;
    let result = engine.run(&universe)?;
    result.print_summary();

    if args.tune {
        let space = ParameterSpace::new()
            .add(
                "lookback_period",
                ParameterDomain::IntValues(vec![63, 126, 189, 252]),
            )?
            .add(
                "position_count",
                ParameterDomain::IntRange { min: 1, max: 5 },
            )?
            .add(
                "absolute_threshold",
                ParameterDomain::FloatRange {
                    min: -0.05,
                    max: 0.10,
                },
            )?;

        println!("\nSweeping {} random trials (seed {})...", args.trials, args.seed);
        let tuning = Tuner::new(config, space, ObjectiveMetric::SharpeRatio)
            .with_seed(args.seed)
            .run(
                &universe,
                SearchMethod::Random {
                    n_trials: args.trials,
                },
            )?;

        println!("\n{}", "=".repeat(80));
        println!("TUNING RESULTS ({} search, {:.1}s)", tuning.method, tuning.elapsed_secs);
        println!("{}", "=".repeat(80));
        println!("Best {}: {:.3}", tuning.objective, tuning.best_score);
        if let Some(best) = &tuning.best_params {
            for (name, value) in best {
                println!("  {} = {}", name, value);
            }
        }
        let failed = tuning.trials.iter().filter(|t| t.error.is_some()).count();
        if failed > 0 {
            println!("({} of {} trials failed)", failed, tuning.trials.len());
        }
    }

    Ok(())
}

/// Every *.csv in the data directory, stem taken as the symbol.
fn discover_symbols(dir: &str) -> Result<Vec<String>, BacktestError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| BacktestError::data_unavailable(format!("{}: {}", dir, e)))?;
    let mut symbols: Vec<String> = entries
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            if path.extension()? == "csv" {
                Some(path.file_stem()?.to_string_lossy().into_owned())
            } else {
                None
            }
        })
        .collect();
    symbols.sort();
    if symbols.is_empty() {
        return Err(BacktestError::data_unavailable(format!(
            "no CSV files found in {}",
            dir
        )));
    }
    Ok(symbols)
}
