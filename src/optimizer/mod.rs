// Portfolio optimizer - maps the selected assets and their trailing
// returns onto a bounded weight vector. Every method that cannot produce
// weights degrades to equal weight with a logged warning; a rebalance is
// never aborted by the optimizer.

pub mod hrp;
pub mod matrix;
pub mod risk_parity;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::StrategyConfig;
use crate::data::AlignedUniverse;
use crate::optimizer::matrix::{
    covariance_matrix, matvec, mean_returns, quadratic_form, regularize_if_singular, solve,
    volatilities,
};

/// Weighting scheme applied to the selected assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationMethod {
    /// `w_i ∝ strength_i`
    MomentumBased,
    /// `w_i = 1/N`
    EqualWeight,
    /// `w_i ∝ 1/σ_i`
    InverseVolatility,
    /// minimize `wᵀΣw`
    MinimumVariance,
    /// maximize `(wᵀμ − r_f) / √(wᵀΣw)`
    MaximumSharpe,
    /// equalize `w_i × (Σw)_i`
    RiskParity,
    /// maximize `(wᵀσ) / √(wᵀΣw)`
    MaximumDiversification,
    /// correlation clustering + recursive inverse-variance bisection
    HierarchicalRiskParity,
}

impl OptimizationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MomentumBased => "momentum_based",
            Self::EqualWeight => "equal_weight",
            Self::InverseVolatility => "inverse_volatility",
            Self::MinimumVariance => "minimum_variance",
            Self::MaximumSharpe => "maximum_sharpe",
            Self::RiskParity => "risk_parity",
            Self::MaximumDiversification => "maximum_diversification",
            Self::HierarchicalRiskParity => "hierarchical_risk_parity",
        }
    }
}

/// Optimizer result: weights plus ex-ante diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationOutput {
    /// Weight per selected symbol, summing to 1 (or less when the bounds
    /// make a full allocation infeasible).
    pub weights: HashMap<String, f64>,
    /// Ex-ante annualized portfolio return under the trailing means.
    pub expected_return: f64,
    /// Ex-ante annualized portfolio volatility.
    pub expected_volatility: f64,
    pub sharpe_ratio: f64,
    /// `(wᵀσ) / √(wᵀΣw)` — 1.0 for a single asset.
    pub diversification_ratio: f64,
    /// Fractional risk contribution per symbol, summing to 1.
    pub risk_contributions: HashMap<String, f64>,
    /// True when the configured method could not run and equal weight was
    /// substituted.
    pub fell_back: bool,
}

#[derive(Debug, Clone)]
pub struct PortfolioOptimizer {
    pub method: OptimizationMethod,
    pub lookback: usize,
    pub weight_min: f64,
    pub weight_max: f64,
    pub risk_free_rate: f64,
}

impl PortfolioOptimizer {
    pub fn from_config(config: &StrategyConfig) -> Self {
        Self {
            method: config.optimization_method,
            lookback: config.optimization_lookback,
            weight_min: config.weight_min,
            weight_max: config.weight_max,
            risk_free_rate: config.risk_free_rate,
        }
    }

    /// Weights for the selected `(symbol, strength)` pairs using returns
    /// ending at `end_idx`. Output weights sum to 1 over the selected set;
    /// the engine scales them by the risk share.
    pub fn optimize(
        &self,
        universe: &AlignedUniverse,
        selected: &[(String, f64)],
        end_idx: usize,
    ) -> OptimizationOutput {
        let n = selected.len();
        if n == 0 {
            return OptimizationOutput {
                weights: HashMap::new(),
                expected_return: 0.0,
                expected_volatility: 0.0,
                sharpe_ratio: 0.0,
                diversification_ratio: 0.0,
                risk_contributions: HashMap::new(),
                fell_back: false,
            };
        }

        // Trailing returns matrix; a missing window forces the equal-weight
        // fallback rather than optimizing on partial covariance.
        let mut returns: Vec<Vec<f64>> = Vec::with_capacity(n);
        let mut window_ok = true;
        for (symbol, _) in selected {
            match universe.returns_window(symbol, end_idx, self.lookback) {
                Some(r) => returns.push(r),
                None => {
                    window_ok = false;
                    break;
                }
            }
        }

        if !window_ok {
            log::warn!(
                "returns window ({} days) unavailable for the full selection at {}; using equal weight",
                self.lookback,
                universe.date_at(end_idx)
            );
            return self.finish(selected, None, equal_weights(n), true);
        }

        let mut cov = covariance_matrix(&returns);
        regularize_if_singular(&mut cov);
        let mu = mean_returns(&returns);

        let (raw, fell_back) = match self.raw_weights(selected, &cov, &mu) {
            Some(w) => (w, false),
            None => {
                log::warn!(
                    "{} failed to produce weights at {}; using equal weight",
                    self.method.as_str(),
                    universe.date_at(end_idx)
                );
                (equal_weights(n), true)
            }
        };

        self.finish(selected, Some((&cov, &mu)), raw, fell_back)
    }

    /// Unbounded weights for the configured method, normalized to sum 1.
    /// None signals the equal-weight fallback.
    fn raw_weights(
        &self,
        selected: &[(String, f64)],
        cov: &[Vec<f64>],
        mu: &[f64],
    ) -> Option<Vec<f64>> {
        let n = selected.len();
        match self.method {
            OptimizationMethod::EqualWeight => Some(equal_weights(n)),
            OptimizationMethod::MomentumBased => {
                let strengths: Vec<f64> = selected.iter().map(|(_, s)| s.max(0.0)).collect();
                normalize(strengths)
            }
            OptimizationMethod::InverseVolatility => {
                let vols = volatilities(cov);
                if vols.iter().any(|&v| v <= 0.0) {
                    return None;
                }
                normalize(vols.iter().map(|v| 1.0 / v).collect())
            }
            OptimizationMethod::MinimumVariance => {
                // Unconstrained minimum variance: w ∝ Σ⁻¹ 1.
                let ones = vec![1.0; n];
                let w = solve(cov, &ones)?;
                normalize_long_only(w)
            }
            OptimizationMethod::MaximumSharpe => {
                // Tangency portfolio: w ∝ Σ⁻¹ (μ − r_f).
                let excess: Vec<f64> = mu.iter().map(|m| m - self.risk_free_rate).collect();
                if excess.iter().all(|&e| e <= 0.0) {
                    return None;
                }
                let w = solve(cov, &excess)?;
                normalize_long_only(w)
            }
            OptimizationMethod::RiskParity => risk_parity::risk_parity_weights(cov),
            OptimizationMethod::MaximumDiversification => {
                // Most-diversified portfolio: w ∝ Σ⁻¹ σ.
                let vols = volatilities(cov);
                if vols.iter().all(|&v| v <= 0.0) {
                    return None;
                }
                let w = solve(cov, &vols)?;
                normalize_long_only(w)
            }
            OptimizationMethod::HierarchicalRiskParity => match hrp::hrp_weights(cov) {
                Some(w) => Some(w),
                // Below the clustering minimum HRP is defined as equal weight.
                None => Some(equal_weights(n)),
            },
        }
    }

    /// Apply bounds and attach diagnostics.
    fn finish(
        &self,
        selected: &[(String, f64)],
        stats: Option<(&[Vec<f64>], &[f64])>,
        mut weights: Vec<f64>,
        fell_back: bool,
    ) -> OptimizationOutput {
        apply_bounds(&mut weights, self.weight_min, self.weight_max);

        let (expected_return, expected_volatility, diversification_ratio, contributions) =
            match stats {
                Some((cov, mu)) => {
                    let ret = weights.iter().zip(mu).map(|(w, m)| w * m).sum::<f64>();
                    let var = quadratic_form(cov, &weights);
                    let vol = var.max(0.0).sqrt();
                    let weighted_vol = weights
                        .iter()
                        .zip(volatilities(cov))
                        .map(|(w, v)| w * v)
                        .sum::<f64>();
                    let dr = if vol > 0.0 { weighted_vol / vol } else { 0.0 };

                    let marginal = matvec(cov, &weights);
                    let contributions: Vec<f64> = if var > 0.0 {
                        weights
                            .iter()
                            .zip(&marginal)
                            .map(|(w, m)| w * m / var)
                            .collect()
                    } else {
                        equal_weights(weights.len())
                    };
                    (ret, vol, dr, contributions)
                }
                None => (0.0, 0.0, 0.0, equal_weights(weights.len())),
            };

        let sharpe_ratio = if expected_volatility > 0.0 {
            (expected_return - self.risk_free_rate) / expected_volatility
        } else {
            0.0
        };

        OptimizationOutput {
            weights: selected
                .iter()
                .zip(&weights)
                .map(|((symbol, _), &w)| (symbol.clone(), w))
                .collect(),
            expected_return,
            expected_volatility,
            sharpe_ratio,
            diversification_ratio,
            risk_contributions: selected
                .iter()
                .zip(&contributions)
                .map(|((symbol, _), &c)| (symbol.clone(), c))
                .collect(),
            fell_back,
        }
    }
}

fn equal_weights(n: usize) -> Vec<f64> {
    vec![1.0 / n as f64; n]
}

/// Normalize non-negative raw weights to sum 1; None when the mass is zero.
fn normalize(raw: Vec<f64>) -> Option<Vec<f64>> {
    let total: f64 = raw.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return None;
    }
    Some(raw.into_iter().map(|w| w / total).collect())
}

/// Clip negative entries from an unconstrained solution, then normalize.
/// The core is long-only; a solution that is negative everywhere fails.
fn normalize_long_only(raw: Vec<f64>) -> Option<Vec<f64>> {
    normalize(raw.into_iter().map(|w| w.max(0.0)).collect())
}

/// Clamp weights into `[lo, hi]` and redistribute until they sum to 1, or
/// as close as the bounds allow (an infeasible ceiling leaves the
/// remainder in cash).
pub fn apply_bounds(weights: &mut [f64], lo: f64, hi: f64) {
    const TOL: f64 = 1e-12;
    for _ in 0..64 {
        for w in weights.iter_mut() {
            *w = w.clamp(lo, hi);
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() < TOL {
            return;
        }
        if sum > 1.0 {
            let excess = sum - 1.0;
            let pool: f64 = weights.iter().map(|&w| (w - lo).max(0.0)).sum();
            if pool <= 0.0 {
                return;
            }
            for w in weights.iter_mut() {
                *w -= excess * (*w - lo).max(0.0) / pool;
            }
        } else {
            let deficit = 1.0 - sum;
            let headroom: f64 = weights.iter().map(|&w| (hi - w).max(0.0)).sum();
            if headroom <= 0.0 {
                return;
            }
            for w in weights.iter_mut() {
                *w += deficit * (hi - *w).max(0.0) / headroom;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PriceSeries;
    use chrono::NaiveDate;

    fn optimizer(method: OptimizationMethod) -> PortfolioOptimizer {
        PortfolioOptimizer {
            method,
            lookback: 20,
            weight_min: 0.0,
            weight_max: 1.0,
            risk_free_rate: 0.02,
        }
    }

    /// Universe of synthetic price paths with differing noise amplitudes.
    /// Deterministic: a fixed pseudo-random walk per symbol.
    fn noisy_universe(specs: &[(&str, f64)]) -> AlignedUniverse {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let mut map = std::collections::HashMap::new();
        for (k, &(symbol, amplitude)) in specs.iter().enumerate() {
            let mut price = 100.0;
            let closes: Vec<f64> = (0..60)
                .map(|i| {
                    // Simple deterministic oscillation, phase-shifted per asset.
                    let r = amplitude * ((i as f64 * 0.9 + k as f64 * 1.7).sin());
                    price *= 1.0 + 0.0005 + r;
                    price
                })
                .collect();
            map.insert(
                symbol.to_string(),
                PriceSeries::from_closes(symbol, start, &closes).unwrap(),
            );
        }
        AlignedUniverse::build(&map).unwrap()
    }

    fn selected(symbols: &[&str]) -> Vec<(String, f64)> {
        symbols.iter().map(|s| (s.to_string(), 1.0)).collect()
    }

    #[test]
    fn test_equal_weight_sums_to_one_exactly() {
        let u = noisy_universe(&[("A", 0.01), ("B", 0.02), ("C", 0.03)]);
        let out = optimizer(OptimizationMethod::EqualWeight).optimize(
            &u,
            &selected(&["A", "B", "C"]),
            59,
        );
        let sum: f64 = out.weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        for &w in out.weights.values() {
            assert!((w - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_momentum_based_tracks_strengths() {
        let u = noisy_universe(&[("A", 0.01), ("B", 0.01)]);
        let picks = vec![("A".to_string(), 0.75), ("B".to_string(), 0.25)];
        let out = optimizer(OptimizationMethod::MomentumBased).optimize(&u, &picks, 59);
        assert!((out.weights["A"] - 0.75).abs() < 1e-9);
        assert!((out.weights["B"] - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_inverse_volatility_prefers_calm_asset() {
        let u = noisy_universe(&[("CALM", 0.003), ("WILD", 0.03)]);
        let out = optimizer(OptimizationMethod::InverseVolatility).optimize(
            &u,
            &selected(&["CALM", "WILD"]),
            59,
        );
        assert!(out.weights["CALM"] > out.weights["WILD"]);
        assert!(!out.fell_back);
    }

    #[test]
    fn test_missing_window_falls_back_to_equal_weight() {
        let u = noisy_universe(&[("A", 0.01), ("B", 0.02)]);
        let mut opt = optimizer(OptimizationMethod::MinimumVariance);
        opt.lookback = 500; // longer than available history
        let out = opt.optimize(&u, &selected(&["A", "B"]), 59);
        assert!(out.fell_back);
        assert!((out.weights["A"] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_weight_bounds_respected() {
        let u = noisy_universe(&[("A", 0.002), ("B", 0.02), ("C", 0.02), ("D", 0.02)]);
        let mut opt = optimizer(OptimizationMethod::InverseVolatility);
        opt.weight_max = 0.40;
        let out = opt.optimize(&u, &selected(&["A", "B", "C", "D"]), 59);
        for (_, &w) in &out.weights {
            assert!(w <= 0.40 + 1e-9);
            assert!(w >= 0.0);
        }
        let sum: f64 = out.weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_risk_contributions_sum_to_one() {
        let u = noisy_universe(&[("A", 0.01), ("B", 0.02), ("C", 0.015)]);
        let out = optimizer(OptimizationMethod::RiskParity).optimize(
            &u,
            &selected(&["A", "B", "C"]),
            59,
        );
        let total: f64 = out.risk_contributions.values().sum();
        assert!((total - 1.0).abs() < 1e-6, "contributions {:?}", out.risk_contributions);
    }

    #[test]
    fn test_single_asset_degenerates_cleanly() {
        let u = noisy_universe(&[("A", 0.01)]);
        for method in [
            OptimizationMethod::MinimumVariance,
            OptimizationMethod::MaximumSharpe,
            OptimizationMethod::RiskParity,
            OptimizationMethod::HierarchicalRiskParity,
            OptimizationMethod::MaximumDiversification,
        ] {
            let out = optimizer(method).optimize(&u, &selected(&["A"]), 59);
            let w = out.weights["A"];
            assert!((w - 1.0).abs() < 1e-9, "{}: weight {}", method.as_str(), w);
        }
    }

    #[test]
    fn test_apply_bounds_infeasible_ceiling_leaves_cash() {
        let mut w = vec![0.6, 0.4];
        apply_bounds(&mut w, 0.0, 0.3);
        assert!((w[0] - 0.3).abs() < 1e-12);
        assert!((w[1] - 0.3).abs() < 1e-12);
        // Sum stays at 0.6: the rest of the book sits in cash.
    }

    mod properties {
        use crate::optimizer::apply_bounds;
        use proptest::prelude::*;

        proptest! {
            // Bounded renormalization never leverages the book and never
            // breaks the per-asset bounds.
            #[test]
            fn apply_bounds_respects_constraints(
                raw in proptest::collection::vec(0.0f64..1.0, 2..8),
                hi in 0.2f64..1.0,
            ) {
                let total: f64 = raw.iter().sum();
                prop_assume!(total > 0.0);
                let mut w: Vec<f64> = raw.iter().map(|x| x / total).collect();
                apply_bounds(&mut w, 0.0, hi);

                let sum: f64 = w.iter().sum();
                prop_assert!(sum <= 1.0 + 1e-9);
                for &x in &w {
                    prop_assert!(x >= -1e-12 && x <= hi + 1e-9);
                }
                // When the ceiling leaves room for a full allocation, the
                // book is fully invested.
                if hi * w.len() as f64 >= 1.0 + 1e-9 {
                    prop_assert!((sum - 1.0).abs() < 1e-6, "sum {} with hi {}", sum, hi);
                }
            }
        }
    }
}
