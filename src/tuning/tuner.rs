// Hyperparameter tuner - sweeps a parameter space by re-running the
// backtest per trial and ranking by the chosen objective metric.
//
// Trials are pure functions of (config, price data), so they evaluate in
// parallel; the trial list itself is generated serially under the seed,
// which keeps every sweep reproducible. Aggregated output follows
// submission order, not completion order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::backtesting::{BacktestEngine, BacktestResult, PerformanceMetrics};
use crate::config::StrategyConfig;
use crate::data::AlignedUniverse;
use crate::error::BacktestError;
use crate::tuning::space::{apply_params, ParameterSpace, TrialParams};

/// Grid sizes above this log a warning before the sweep starts.
const GRID_WARN_THRESHOLD: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMethod {
    /// Cartesian product of all discrete values.
    Grid,
    /// Uniform per-dimension sampling, deterministic under the seed.
    Random { n_trials: usize },
    /// Degrades to random search: no Bayesian optimization backend is
    /// wired in, and the degradation is recorded in the result metadata.
    Bayesian { n_trials: usize },
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grid => "grid",
            Self::Random { .. } => "random",
            Self::Bayesian { .. } => "bayesian",
        }
    }
}

/// Which result metric a sweep optimizes. Higher is always better; the
/// drawdown objective maximizes `-|max_drawdown|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveMetric {
    SharpeRatio,
    TotalReturn,
    AnnualizedReturn,
    SortinoRatio,
    CalmarRatio,
    MaxDrawdown,
}

impl ObjectiveMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SharpeRatio => "sharpe_ratio",
            Self::TotalReturn => "total_return",
            Self::AnnualizedReturn => "annualized_return",
            Self::SortinoRatio => "sortino_ratio",
            Self::CalmarRatio => "calmar_ratio",
            Self::MaxDrawdown => "max_drawdown",
        }
    }

    pub fn score(&self, metrics: &PerformanceMetrics) -> f64 {
        match self {
            Self::SharpeRatio => metrics.sharpe_ratio,
            Self::TotalReturn => metrics.total_return,
            Self::AnnualizedReturn => metrics.annualized_return,
            Self::SortinoRatio => metrics.sortino_ratio,
            Self::CalmarRatio => metrics.calmar_ratio,
            Self::MaxDrawdown => -metrics.max_drawdown.abs(),
        }
    }
}

/// Outcome of one trial. A raising trial keeps its parameters, a
/// worst-possible score, and the error message; it never aborts the sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialResult {
    pub parameters: TrialParams,
    pub score: f64,
    pub metrics: Option<PerformanceMetrics>,
    pub backtest: Option<BacktestResult>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningResult {
    /// Trials in submission order.
    pub trials: Vec<TrialResult>,
    pub best_params: Option<TrialParams>,
    pub best_score: f64,
    pub best_backtest: Option<BacktestResult>,
    pub method: String,
    pub objective: String,
    pub seed: u64,
    pub elapsed_secs: f64,
    /// Degradations observed while sweeping (e.g. Bayesian fallback).
    pub metadata: Vec<String>,
}

pub struct Tuner {
    base_config: StrategyConfig,
    space: ParameterSpace,
    objective: ObjectiveMetric,
    seed: u64,
    parallel: bool,
    cancel: Option<Arc<AtomicBool>>,
}

impl Tuner {
    pub fn new(
        base_config: StrategyConfig,
        space: ParameterSpace,
        objective: ObjectiveMetric,
    ) -> Self {
        Self {
            base_config,
            space,
            objective,
            seed: 42,
            parallel: true,
            cancel: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Cooperative cancellation: checked between trials and at every
    /// rebalance boundary inside each trial.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Run the sweep against pre-aligned data. Data is read-only across
    /// trials, so the same universe serves them all.
    pub fn run(
        &self,
        universe: &AlignedUniverse,
        method: SearchMethod,
    ) -> Result<TuningResult, BacktestError> {
        if self.space.is_empty() {
            return Err(BacktestError::configuration(
                "parameter space is empty; nothing to sweep",
            ));
        }

        let started = Instant::now();
        let mut metadata = Vec::new();
        let trial_params = self.generate_trials(method, &mut metadata)?;
        log::info!(
            "tuning {} with {} search: {} trials",
            self.objective.as_str(),
            method.as_str(),
            trial_params.len()
        );

        let trials: Vec<TrialResult> = if self.parallel {
            trial_params
                .into_par_iter()
                .map(|params| self.evaluate(universe, params))
                .collect()
        } else {
            trial_params
                .into_iter()
                .map(|params| self.evaluate(universe, params))
                .collect()
        };

        let best = trials
            .iter()
            .filter(|t| t.score.is_finite())
            .max_by(|a, b| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        let (best_params, best_score, best_backtest) = match best {
            Some(t) => (
                Some(t.parameters.clone()),
                t.score,
                t.backtest.clone(),
            ),
            None => (None, f64::NEG_INFINITY, None),
        };

        Ok(TuningResult {
            trials,
            best_params,
            best_score,
            best_backtest,
            method: method.as_str().to_string(),
            objective: self.objective.as_str().to_string(),
            seed: self.seed,
            elapsed_secs: started.elapsed().as_secs_f64(),
            metadata,
        })
    }

    /// Build the full trial list up front. Serial and seeded, so the list
    /// (and with it the whole sweep) is reproducible regardless of how
    /// the trials are later scheduled.
    fn generate_trials(
        &self,
        method: SearchMethod,
        metadata: &mut Vec<String>,
    ) -> Result<Vec<TrialParams>, BacktestError> {
        match method {
            SearchMethod::Grid => {
                let grid = self.space.grid()?;
                if grid.len() > GRID_WARN_THRESHOLD {
                    let warning = format!(
                        "grid search over {} combinations; consider random search",
                        grid.len()
                    );
                    log::warn!("{}", warning);
                    metadata.push(warning);
                }
                Ok(grid)
            }
            SearchMethod::Random { n_trials } => {
                let mut rng = StdRng::seed_from_u64(self.seed);
                Ok((0..n_trials).map(|_| self.space.sample(&mut rng)).collect())
            }
            SearchMethod::Bayesian { n_trials } => {
                let warning =
                    "Bayesian optimizer unavailable; falling back to random search".to_string();
                log::warn!("{}", warning);
                metadata.push(warning);
                let mut rng = StdRng::seed_from_u64(self.seed);
                Ok((0..n_trials).map(|_| self.space.sample(&mut rng)).collect())
            }
        }
    }

    /// Evaluate one trial: fresh engine, own state, shared read-only data.
    fn evaluate(&self, universe: &AlignedUniverse, parameters: TrialParams) -> TrialResult {
        if let Some(cancel) = &self.cancel {
            if cancel.load(Ordering::Relaxed) {
                return Self::failed(parameters, "cancelled before start".to_string());
            }
        }

        let result = apply_params(&self.base_config, &parameters)
            .and_then(|config| BacktestEngine::new(config).map(|e| (e,)))
            .and_then(|(mut engine,)| match &self.cancel {
                Some(cancel) => engine.run_cancellable(universe, cancel),
                None => engine.run(universe),
            });

        match result {
            Ok(backtest) => TrialResult {
                parameters,
                score: self.objective.score(&backtest.metrics),
                metrics: Some(backtest.metrics.clone()),
                backtest: Some(backtest),
                error: None,
            },
            Err(e) => Self::failed(parameters, e.to_string()),
        }
    }

    fn failed(parameters: TrialParams, error: String) -> TrialResult {
        TrialResult {
            parameters,
            score: f64::NEG_INFINITY,
            metrics: None,
            backtest: None,
            error: Some(error),
        }
    }
}
