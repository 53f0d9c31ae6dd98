// Backtesting engine - orchestrates the historical simulation
//
// Per-timestep pipeline: mark-to-market -> snapshot -> rebalance gate ->
// signals -> target weights -> execution (sells before buys) -> invariant
// check. Price data is read-only; the cash ledger, positions, trades and
// equity curve are owned exclusively by one engine instance.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::backtesting::benchmark::{benchmark_curve, BenchmarkMode};
use crate::backtesting::metrics::{EquityCurve, PerformanceMetrics};
use crate::backtesting::position::Position;
use crate::backtesting::rebalance::should_rebalance;
use crate::backtesting::snapshot::PositionSnapshot;
use crate::backtesting::trade::Trade;
use crate::config::StrategyConfig;
use crate::data::AlignedUniverse;
use crate::error::BacktestError;
use crate::optimizer::PortfolioOptimizer;
use crate::signals::{Signal, SignalEngine, SignalReason};

/// Absolute tolerance on monetary comparisons.
pub const MONEY_TOL: f64 = 1e-6;

/// Share quantities below this are treated as fully closed.
const QTY_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub benchmark_symbol: Option<String>,
    pub benchmark_mode: Option<String>,
    pub rebalance_count: usize,
    /// Non-fatal degradations observed during the run.
    pub warnings: Vec<String>,
}

/// Terminal aggregate of one backtest run. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub final_capital: f64,
    /// Period returns of the equity curve, paired with period-end dates.
    pub returns: Vec<(NaiveDate, f64)>,
    pub equity_curve: EquityCurve,
    pub position_history: Vec<PositionSnapshot>,
    pub trades: Vec<Trade>,
    pub metrics: PerformanceMetrics,
    pub metadata: ResultMetadata,
}

impl BacktestResult {
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(80));
        println!("BACKTEST RESULTS - {}", self.strategy_name);
        println!("{}", "=".repeat(80));
        println!("Period: {} to {}", self.start_date, self.end_date);
        println!("Initial Capital:  ${:.2}", self.initial_capital);
        println!("Final Capital:    ${:.2}", self.final_capital);
        println!();
        println!("PERFORMANCE");
        println!("{}", "-".repeat(80));
        println!("Total Return:     {:>10.2}%", self.metrics.total_return * 100.0);
        println!("Annualized:       {:>10.2}%", self.metrics.annualized_return * 100.0);
        println!("CAGR:             {:>10.2}%", self.metrics.cagr * 100.0);
        println!("Volatility:       {:>10.2}%", self.metrics.volatility * 100.0);
        println!("Sharpe Ratio:     {:>10.2}", self.metrics.sharpe_ratio);
        println!("Sortino Ratio:    {:>10.2}", self.metrics.sortino_ratio);
        println!("Max Drawdown:     {:>10.2}%", self.metrics.max_drawdown * 100.0);
        println!("Calmar Ratio:     {:>10.2}", self.metrics.calmar_ratio);
        if let Some(b) = &self.metrics.benchmark {
            println!();
            println!("VS BENCHMARK ({})", self.metadata.benchmark_symbol.as_deref().unwrap_or("?"));
            println!("{}", "-".repeat(80));
            println!("Alpha:            {:>10.2}%", b.alpha * 100.0);
            println!("Beta:             {:>10.2}", b.beta);
            println!("Info Ratio:       {:>10.2}", b.information_ratio);
            println!("Tracking Error:   {:>10.2}%", b.tracking_error * 100.0);
        }
        println!();
        println!("TRADES");
        println!("{}", "-".repeat(80));
        println!("Round Trips:      {:>10}", self.metrics.total_trades);
        println!("Win Rate:         {:>10.2}%", self.metrics.win_rate);
        println!("Avg P&L:          ${:>9.2}", self.metrics.avg_trade_pnl);
        println!("Profit Factor:    {:>10.2}", self.metrics.profit_factor);
        println!("Rebalances:       {:>10}", self.metadata.rebalance_count);
        if !self.metadata.warnings.is_empty() {
            println!();
            println!("WARNINGS");
            for w in &self.metadata.warnings {
                println!("  - {}", w);
            }
        }
        println!("{}", "=".repeat(80));
    }
}

pub struct BacktestEngine {
    config: StrategyConfig,
    signal_engine: SignalEngine,
    optimizer: PortfolioOptimizer,
    pub(crate) cash: f64,
    pub(crate) positions: BTreeMap<String, Position>,
    position_history: Vec<PositionSnapshot>,
    pub(crate) trades: Vec<Trade>,
    equity_curve: EquityCurve,
    last_rebalance: Option<NaiveDate>,
    rebalance_count: usize,
    warnings: Vec<String>,
}

impl BacktestEngine {
    /// Fail-fast construction: configuration problems abort here, before
    /// any data is touched.
    pub fn new(config: StrategyConfig) -> Result<Self, BacktestError> {
        config.validate()?;
        Ok(Self {
            signal_engine: SignalEngine::from_config(&config),
            optimizer: PortfolioOptimizer::from_config(&config),
            cash: config.initial_capital,
            config,
            positions: BTreeMap::new(),
            position_history: Vec::new(),
            trades: Vec::new(),
            equity_curve: EquityCurve::new(),
            last_rebalance: None,
            rebalance_count: 0,
            warnings: Vec::new(),
        })
    }

    /// Run the full simulation over the aligned universe.
    pub fn run(&mut self, universe: &AlignedUniverse) -> Result<BacktestResult, BacktestError> {
        self.run_inner(universe, None)
    }

    /// Like `run`, but checks the cancellation flag before each rebalance.
    /// Mid-execution cancellation is not supported.
    pub fn run_cancellable(
        &mut self,
        universe: &AlignedUniverse,
        cancel: &AtomicBool,
    ) -> Result<BacktestResult, BacktestError> {
        self.run_inner(universe, Some(cancel))
    }

    fn run_inner(
        &mut self,
        universe: &AlignedUniverse,
        cancel: Option<&AtomicBool>,
    ) -> Result<BacktestResult, BacktestError> {
        if universe.is_empty() {
            return Err(BacktestError::data_unavailable(
                "universe has no trading days",
            ));
        }
        self.validate_safe_asset(universe)?;

        let benchmark_symbol = self.resolve_benchmark(universe);
        let risky: Vec<String> = universe
            .symbols()
            .iter()
            .filter(|s| {
                Some(s.as_str()) != self.config.safe_asset.as_deref()
                    && Some(s.as_str()) != benchmark_symbol.as_deref()
            })
            .cloned()
            .collect();
        if risky.is_empty() {
            return Err(BacktestError::data_unavailable(
                "universe contains no risky assets after removing safe asset and benchmark",
            ));
        }

        // Closes needed before the first rebalance: a lookback of L days
        // consumes L+1 observations.
        let required_closes = self.config.required_history() + 1;
        let mut gated_symbols: Vec<String> = risky.clone();
        if let Some(safe) = &self.config.safe_asset {
            gated_symbols.push(safe.clone());
        }

        for idx in 0..universe.len() {
            let date = universe.date_at(idx);

            // 1. Mark-to-market. Positions past the staleness limit keep
            //    their last fill-forward price.
            for pos in self.positions.values_mut() {
                if let Some(price) = universe.mark_close(&pos.symbol, idx) {
                    pos.mark(price);
                }
            }

            // 2. Snapshot happens-before any rebalance at this timestep.
            let snapshot = PositionSnapshot::capture(date, self.cash, self.positions.values());
            let portfolio_value = snapshot.portfolio_value;
            self.equity_curve.add_point(date, portfolio_value);
            self.position_history.push(snapshot);

            // 3. Rebalance gate.
            if !should_rebalance(self.config.rebalance_frequency, date, self.last_rebalance) {
                continue;
            }
            if self.last_rebalance.is_none()
                && !gated_symbols
                    .iter()
                    .all(|s| universe.history_len(s, idx) >= required_closes)
            {
                continue;
            }
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    return Err(BacktestError::Cancelled {
                        date: date.to_string(),
                    });
                }
            }

            // 4-5. Signals and target weights.
            let signals = self.signal_engine.generate(universe, &risky, idx);
            let targets = self.target_weights(universe, &signals, idx);

            // 6. Execute, sells before buys.
            self.execute_rebalance(universe, idx, &targets)?;

            // 7. Mark the rebalance done.
            self.last_rebalance = Some(date);
            self.rebalance_count += 1;
        }

        Ok(self.build_result(universe, benchmark_symbol))
    }

    /// Startup check: a configured safe asset must exist in the price
    /// data. No silent substitution.
    fn validate_safe_asset(&self, universe: &AlignedUniverse) -> Result<(), BacktestError> {
        if let Some(safe) = &self.config.safe_asset {
            if !universe.contains(safe) {
                return Err(BacktestError::configuration(format!(
                    "safe asset '{}' has no price data; either add it to the universe, \
                     configure a different safe asset, or set safe_asset to none",
                    safe
                )));
            }
        }
        Ok(())
    }

    /// Benchmark data is optional: when missing the run proceeds with the
    /// benchmark metrics nulled and a warning attached.
    fn resolve_benchmark(&mut self, universe: &AlignedUniverse) -> Option<String> {
        let symbol = self.config.benchmark.clone()?;
        if universe.contains(&symbol) {
            return Some(symbol);
        }
        let warning = format!(
            "benchmark '{}' has no price data; proceeding without benchmark metrics",
            symbol
        );
        log::warn!("{}", warning);
        self.warnings.push(warning);
        None
    }

    /// Map this rebalance's signals to a symbol -> weight book. Empty map
    /// means 100% cash.
    fn target_weights(
        &mut self,
        universe: &AlignedUniverse,
        signals: &[Signal],
        idx: usize,
    ) -> BTreeMap<String, f64> {
        let longs: Vec<&Signal> = signals.iter().filter(|s| s.direction > 0).collect();
        if longs.is_empty() {
            return BTreeMap::new();
        }

        // Defensive rotation: the safe asset takes the whole book
        // regardless of the optimization method.
        if longs.len() == 1 && longs[0].reason == SignalReason::DefensiveRotation {
            let mut targets = BTreeMap::new();
            targets.insert(longs[0].symbol.clone(), 1.0);
            return targets;
        }

        let selected: Vec<(String, f64)> = longs
            .iter()
            .filter(|s| s.reason == SignalReason::RelativeTop)
            .map(|s| (s.symbol.clone(), s.strength))
            .collect();

        // When fewer than position_count risky slots fill and a safe asset
        // is available, the unfilled share rotates into it.
        let k = selected.len();
        let safe_available = self
            .config
            .safe_asset
            .as_ref()
            .filter(|safe| universe.close(safe, idx).is_some());
        let (risk_share, safe_share) = match safe_available {
            Some(_) if k < self.config.position_count => {
                let rs = k as f64 / self.config.position_count as f64;
                (rs, 1.0 - rs)
            }
            _ => (1.0, 0.0),
        };

        let output = self.optimizer.optimize(universe, &selected, idx);
        if output.fell_back {
            self.warnings.push(format!(
                "{}: optimizer fell back to equal weight at {}",
                self.config.optimization_method.as_str(),
                universe.date_at(idx)
            ));
        }

        let mut targets: BTreeMap<String, f64> = output
            .weights
            .iter()
            .map(|(symbol, &w)| (symbol.clone(), w * risk_share))
            .collect();
        if safe_share > 0.0 {
            if let Some(safe) = safe_available {
                targets.insert(safe.clone(), safe_share);
            }
        }
        targets
    }

    /// Reconstitute the book toward the target weights.
    ///
    /// Sells always execute before buys: proceeds must land in the cash
    /// ledger before they are spent, otherwise entries fail on capital
    /// that is still tied up in outgoing positions.
    pub(crate) fn execute_rebalance(
        &mut self,
        universe: &AlignedUniverse,
        idx: usize,
        targets: &BTreeMap<String, f64>,
    ) -> Result<(), BacktestError> {
        let date = universe.date_at(idx);
        let value = self.cash
            + self
                .positions
                .values()
                .map(Position::market_value)
                .sum::<f64>();

        let mut sells: Vec<(String, f64)> = Vec::new();
        let mut buys: Vec<(String, f64)> = Vec::new();

        // Held but no longer signaled: full close.
        for (symbol, pos) in &self.positions {
            if !targets.contains_key(symbol) {
                sells.push((symbol.clone(), pos.quantity));
            }
        }

        // Signaled: compare target shares against the current book. Target
        // shares are computed at the buy-side execution price so a fresh
        // entry is affordable at its own fill.
        for (symbol, &weight) in targets {
            let Some(close) = universe.close(symbol, idx) else {
                let warning = format!(
                    "{}: no tradable price for {} at rebalance; leaving holding unchanged",
                    date, symbol
                );
                log::warn!("{}", warning);
                self.warnings.push(warning);
                continue;
            };
            let exec_buy = close * (1.0 + self.config.slippage);
            let target_shares = value * weight / exec_buy;
            let current = self.positions.get(symbol).map_or(0.0, |p| p.quantity);
            let delta = target_shares - current;
            if delta < -QTY_EPS {
                sells.push((symbol.clone(), -delta));
            } else if delta > QTY_EPS {
                buys.push((symbol.clone(), delta));
            }
        }

        // BTreeMap iteration already orders the legs by symbol; the
        // explicit sort keeps the close-then-trim legs deterministic too.
        sells.sort_by(|a, b| a.0.cmp(&b.0));
        buys.sort_by(|a, b| a.0.cmp(&b.0));

        for (symbol, quantity) in sells {
            self.sell(universe, idx, &symbol, quantity);
        }
        for (symbol, quantity) in buys {
            self.buy(universe, idx, &symbol, quantity);
        }

        self.verify_invariants(date, value)
    }

    fn sell(&mut self, universe: &AlignedUniverse, idx: usize, symbol: &str, quantity: f64) {
        let date = universe.date_at(idx);
        let Some(pos) = self.positions.get_mut(symbol) else {
            return;
        };
        let quantity = quantity.min(pos.quantity);
        if quantity <= QTY_EPS {
            return;
        }

        let close = universe.mark_close(symbol, idx).unwrap_or(pos.current_price);
        let exec_price = close * (1.0 - self.config.slippage);
        let notional = quantity * exec_price;
        let commission = notional * self.config.commission;
        let slippage_cost = quantity * close * self.config.slippage;

        self.cash += notional - commission;

        let entry_date = pos.entry_date;
        let entry_price = pos.entry_price;
        let (entry_commission, entry_slippage) = pos.reduce(quantity);
        let fully_closed = pos.quantity <= QTY_EPS;

        self.trades.push(Trade::close(
            symbol.to_string(),
            entry_date,
            date,
            quantity,
            entry_price,
            exec_price,
            entry_commission + commission,
            entry_slippage + slippage_cost,
        ));

        if fully_closed {
            self.positions.remove(symbol);
        }
    }

    fn buy(&mut self, universe: &AlignedUniverse, idx: usize, symbol: &str, quantity: f64) {
        let date = universe.date_at(idx);
        let Some(close) = universe.close(symbol, idx) else {
            return;
        };
        let exec_price = close * (1.0 + self.config.slippage);
        let all_in_rate = 1.0 + self.config.commission;

        // Never overdraw: an unaffordable order shrinks to available cash.
        let mut quantity = quantity;
        let required = quantity * exec_price * all_in_rate;
        if required > self.cash {
            quantity = self.cash / (exec_price * all_in_rate);
        }
        if quantity * exec_price < MONEY_TOL {
            return;
        }

        let notional = quantity * exec_price;
        let commission = notional * self.config.commission;
        let slippage_cost = quantity * close * self.config.slippage;
        self.cash -= notional + commission;

        use std::collections::btree_map::Entry;
        match self.positions.entry(symbol.to_string()) {
            Entry::Occupied(mut entry) => {
                entry
                    .get_mut()
                    .increase(quantity, exec_price, commission, slippage_cost);
            }
            Entry::Vacant(entry) => {
                entry.insert(Position::open(
                    symbol.to_string(),
                    quantity,
                    exec_price,
                    date,
                    commission,
                    slippage_cost,
                ));
            }
        }
    }

    /// Post-rebalance invariants. A violation is a bug, not a market
    /// condition: abort with a diagnostic dump.
    fn verify_invariants(&mut self, date: NaiveDate, value_before: f64) -> Result<(), BacktestError> {
        if self.cash < -MONEY_TOL {
            return Err(self.invariant_failure(date, value_before, "cash went negative"));
        }
        // Clamp float dust from an exactly-exhausted ledger.
        if self.cash < 0.0 {
            self.cash = 0.0;
        }
        let value_after = self.cash
            + self
                .positions
                .values()
                .map(Position::market_value)
                .sum::<f64>();
        if value_after <= 0.0 {
            return Err(self.invariant_failure(date, value_before, "portfolio value not positive"));
        }
        if self
            .positions
            .values()
            .any(|p| p.quantity <= 0.0 || !p.current_price.is_finite() || p.current_price <= 0.0)
        {
            return Err(self.invariant_failure(date, value_before, "degenerate open position"));
        }
        Ok(())
    }

    fn invariant_failure(
        &self,
        date: NaiveDate,
        value_before: f64,
        what: &str,
    ) -> BacktestError {
        let mut dump = format!(
            "{}; cash={:.6}, pre-rebalance value={:.6}, positions:",
            what, self.cash, value_before
        );
        for pos in self.positions.values() {
            dump.push_str(&format!(
                " {}[qty={:.6} px={:.4}]",
                pos.symbol, pos.quantity, pos.current_price
            ));
        }
        log::error!("rebalance invariant violated at {}: {}", date, dump);
        BacktestError::RebalanceFailed {
            date: date.to_string(),
            message: dump,
        }
    }

    fn build_result(
        &mut self,
        universe: &AlignedUniverse,
        benchmark_symbol: Option<String>,
    ) -> BacktestResult {
        let final_capital = self.cash
            + self
                .positions
                .values()
                .map(Position::market_value)
                .sum::<f64>();

        let benchmark_mode = if self.config.benchmark_include_costs {
            BenchmarkMode::Realistic {
                commission: self.config.commission,
                slippage: self.config.slippage,
            }
        } else {
            BenchmarkMode::Passive
        };
        let benchmark = benchmark_symbol.as_ref().and_then(|symbol| {
            benchmark_curve(universe, symbol, self.config.initial_capital, benchmark_mode)
        });

        let metrics = PerformanceMetrics::calculate(
            &self.equity_curve,
            &self.trades,
            benchmark.as_ref(),
            self.config.risk_free_rate,
        );

        BacktestResult {
            strategy_name: self.config.name.clone(),
            start_date: universe.dates()[0],
            end_date: *universe.dates().last().unwrap(),
            initial_capital: self.config.initial_capital,
            final_capital,
            returns: self.equity_curve.returns(),
            equity_curve: self.equity_curve.clone(),
            position_history: self.position_history.clone(),
            trades: self.trades.clone(),
            metrics,
            metadata: ResultMetadata {
                benchmark_mode: benchmark_symbol
                    .is_some()
                    .then(|| benchmark_mode.as_str().to_string()),
                benchmark_symbol,
                rebalance_count: self.rebalance_count,
                warnings: self.warnings.clone(),
            },
        }
    }
}
