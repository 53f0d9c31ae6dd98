// Strategy configuration - every operating mode is a closed enum with a
// deterministic behavior table; new modes require explicit addition.

use serde::{Deserialize, Serialize};

use crate::error::BacktestError;
use crate::momentum::MomentumMode;
use crate::optimizer::OptimizationMethod;
use crate::signals::StrengthMethod;

/// How often the portfolio is reconstituted.
///
/// Weekly and custom frequencies use plain date arithmetic, not ISO week
/// numbers — comparing week 52 to week 1 across a year boundary would skip
/// a due rebalance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebalanceFrequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
    /// Custom interval in calendar days (parsed from "ND" / "NW" / "NM").
    Every(u32),
}

impl RebalanceFrequency {
    /// Parse a frequency string: the named frequencies plus custom
    /// "10D" (days), "2W" (weeks), "3M" (months, 30-day approximation).
    pub fn parse(s: &str) -> Result<Self, BacktestError> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => return Ok(Self::Daily),
            "weekly" => return Ok(Self::Weekly),
            "monthly" => return Ok(Self::Monthly),
            "quarterly" => return Ok(Self::Quarterly),
            "yearly" | "annual" => return Ok(Self::Yearly),
            _ => {}
        }

        let s = s.trim();
        if s.len() >= 2 {
            let (num, unit) = s.split_at(s.len() - 1);
            if let Ok(n) = num.parse::<u32>() {
                if n > 0 {
                    match unit.to_ascii_uppercase().as_str() {
                        "D" => return Ok(Self::Every(n)),
                        "W" => return Ok(Self::Every(n * 7)),
                        "M" => return Ok(Self::Every(n * 30)),
                        _ => {}
                    }
                }
            }
        }

        Err(BacktestError::configuration(format!(
            "unknown rebalance frequency '{}': expected daily/weekly/monthly/quarterly/yearly or ND/NW/NM",
            s
        )))
    }
}

/// Full strategy configuration consumed by the engine and swept by the tuner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Display name carried into the result.
    pub name: String,
    /// Momentum window in trading days.
    pub lookback_period: usize,
    /// Momentum formula (simple lookback return or MA crossover).
    pub momentum_mode: MomentumMode,
    /// Divide momentum by realized volatility before filtering/ranking.
    pub use_volatility_adjustment: bool,
    pub rebalance_frequency: RebalanceFrequency,
    /// Maximum number of risky holdings.
    pub position_count: usize,
    /// Minimum momentum an asset must clear to be held.
    pub absolute_threshold: f64,
    pub strength_method: StrengthMethod,
    /// Denominator for the linear strength method.
    pub strength_scale_range: f64,
    /// Defensive rotation target; None resolves to cash.
    pub safe_asset: Option<String>,
    pub optimization_method: OptimizationMethod,
    /// Trailing returns window for covariance estimation.
    pub optimization_lookback: usize,
    pub weight_min: f64,
    pub weight_max: f64,
    /// Annualized risk-free rate for Sharpe and max-Sharpe.
    pub risk_free_rate: f64,
    pub initial_capital: f64,
    /// Per-notional commission rate.
    pub commission: f64,
    /// Per-notional price impact on execution.
    pub slippage: f64,
    /// Comparison asset; None disables benchmark metrics.
    pub benchmark: Option<String>,
    /// Apply entry/exit frictions to the benchmark series.
    pub benchmark_include_costs: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            name: "dual_momentum".to_string(),
            lookback_period: 126,        // ~6 months
            momentum_mode: MomentumMode::SimpleReturn,
            use_volatility_adjustment: false,
            rebalance_frequency: RebalanceFrequency::Monthly,
            position_count: 3,
            absolute_threshold: 0.0,
            strength_method: StrengthMethod::Binary,
            strength_scale_range: 0.30,
            safe_asset: None,
            optimization_method: OptimizationMethod::EqualWeight,
            optimization_lookback: 63,   // ~3 months of daily returns
            weight_min: 0.0,
            weight_max: 1.0,
            risk_free_rate: 0.02,
            initial_capital: 100_000.0,
            commission: 0.001,           // 10 bps per notional
            slippage: 0.0005,            // 5 bps price impact
            benchmark: None,
            benchmark_include_costs: false,
        }
    }
}

impl StrategyConfig {
    /// Load a configuration from a JSON file.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, BacktestError> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            BacktestError::configuration(format!("{}: {}", path.as_ref().display(), e))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            BacktestError::configuration(format!("{}: {}", path.as_ref().display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Observations every symbol must have before the first rebalance.
    pub fn required_history(&self) -> usize {
        self.lookback_period.max(self.optimization_lookback)
    }

    /// Fail-fast validation, run before the time loop begins.
    pub fn validate(&self) -> Result<(), BacktestError> {
        if self.initial_capital <= 0.0 {
            return Err(BacktestError::configuration(format!(
                "initial_capital must be > 0, got {}",
                self.initial_capital
            )));
        }
        if self.position_count == 0 {
            return Err(BacktestError::configuration(
                "position_count must be at least 1",
            ));
        }
        if self.lookback_period == 0 {
            return Err(BacktestError::configuration(
                "lookback_period must be at least 1 trading day",
            ));
        }
        if !(0.0..=0.1).contains(&self.commission) {
            return Err(BacktestError::configuration(format!(
                "commission must be within [0, 0.1], got {}",
                self.commission
            )));
        }
        if !(0.0..=0.05).contains(&self.slippage) {
            return Err(BacktestError::configuration(format!(
                "slippage must be within [0, 0.05], got {}",
                self.slippage
            )));
        }
        if !(0.0..=1.0).contains(&self.weight_min)
            || !(0.0..=1.0).contains(&self.weight_max)
            || self.weight_min > self.weight_max
        {
            return Err(BacktestError::configuration(format!(
                "weight bounds must satisfy 0 <= weight_min <= weight_max <= 1, got [{}, {}]",
                self.weight_min, self.weight_max
            )));
        }
        if self.strength_scale_range <= 0.0 {
            return Err(BacktestError::configuration(format!(
                "strength_scale_range must be > 0, got {}",
                self.strength_scale_range
            )));
        }
        if let MomentumMode::MaCrossover { fast, slow } = self.momentum_mode {
            if fast == 0 || slow == 0 || fast >= slow {
                return Err(BacktestError::configuration(format!(
                    "MA crossover requires 0 < fast < slow, got fast={} slow={}",
                    fast, slow
                )));
            }
        }
        Ok(())
    }
}
