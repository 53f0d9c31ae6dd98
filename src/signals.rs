// Signal engine - dual momentum: absolute filter, relative rank, top-N
// select, defensive rotation into the safe asset when nothing passes.
//
// The model is binary: an asset is either held or it is not. Partial
// risky/safe blending by marginal momentum is deliberately absent.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::StrategyConfig;
use crate::data::AlignedUniverse;
use crate::momentum::{momentum_at, MomentumMode};

/// How the per-asset signal strength is derived from momentum.
/// Every method outputs values in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrengthMethod {
    /// 1.0 for every selected asset — equal weight downstream.
    Binary,
    /// `clip((m - threshold) / scale_range, 0, 1)`. Threshold-independent:
    /// the same excess above threshold yields the same strength no matter
    /// where the threshold sits.
    Linear,
    /// `m_i / Σ m_j` over the selected set — overweight the strongest.
    Proportional,
    /// `m_i / max(m)` over the selected set — leader-biased.
    MomentumRatio,
}

/// Why a signal was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalReason {
    /// Passed the absolute filter and ranked in the top N.
    RelativeTop,
    /// No risky asset passed; rotated into the safe asset.
    DefensiveRotation,
    /// No risky asset passed and no safe asset configured.
    HoldCash,
}

/// One emitted signal at a rebalance timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    /// +1 long, 0 flat. The core is long-only; -1 is reserved.
    pub direction: i8,
    /// Position-sizing input in [0, 1].
    pub strength: f64,
    pub reason: SignalReason,
    pub date: NaiveDate,
    /// Diagnostic: the momentum score that produced this signal.
    pub momentum: f64,
    /// Diagnostic: annualized realized volatility over the lookback.
    pub volatility: f64,
}

/// Scored candidate, kept internal to the ranking step.
#[derive(Debug, Clone)]
struct Candidate {
    symbol: String,
    score: f64,
    volatility: f64,
}

/// Signal generator configured once per backtest.
#[derive(Debug, Clone)]
pub struct SignalEngine {
    pub lookback_period: usize,
    pub momentum_mode: MomentumMode,
    pub use_volatility_adjustment: bool,
    pub absolute_threshold: f64,
    pub position_count: usize,
    pub safe_asset: Option<String>,
    pub strength_method: StrengthMethod,
    pub strength_scale_range: f64,
}

impl SignalEngine {
    pub fn from_config(config: &StrategyConfig) -> Self {
        Self {
            lookback_period: config.lookback_period,
            momentum_mode: config.momentum_mode,
            use_volatility_adjustment: config.use_volatility_adjustment,
            absolute_threshold: config.absolute_threshold,
            position_count: config.position_count,
            safe_asset: config.safe_asset.clone(),
            strength_method: config.strength_method,
            strength_scale_range: config.strength_scale_range,
        }
    }

    /// Generate signals for one rebalance.
    ///
    /// `risky_symbols` is the tradable universe minus the safe asset.
    /// Symbols whose lookback window is not covered at `end_idx` (late
    /// inception, stale beyond the fill limit) are skipped for this
    /// rebalance rather than failing the run.
    pub fn generate(
        &self,
        universe: &AlignedUniverse,
        risky_symbols: &[String],
        end_idx: usize,
    ) -> Vec<Signal> {
        let date = universe.date_at(end_idx);

        let mut candidates: Vec<Candidate> = Vec::new();
        for symbol in risky_symbols {
            // A tradable price is required on the rebalance date itself.
            if universe.close(symbol, end_idx).is_none() {
                continue;
            }
            match momentum_at(
                universe,
                symbol,
                end_idx,
                self.lookback_period,
                self.momentum_mode,
                self.use_volatility_adjustment,
            ) {
                Ok(m) => candidates.push(Candidate {
                    symbol: symbol.clone(),
                    score: m.score,
                    volatility: m.volatility,
                }),
                Err(e) => log::debug!("{}: skipped at {}: {}", symbol, date, e),
            }
        }

        // Absolute filter.
        candidates.retain(|c| c.score > self.absolute_threshold);

        if candidates.is_empty() {
            return self.defensive(universe, end_idx, date);
        }

        // Relative rank, descending; symbol name breaks ties so runs are
        // reproducible.
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        candidates.truncate(self.position_count);

        let strengths = self.strengths(&candidates);
        candidates
            .into_iter()
            .zip(strengths)
            .map(|(c, strength)| Signal {
                symbol: c.symbol,
                direction: 1,
                strength,
                reason: SignalReason::RelativeTop,
                date,
                momentum: c.score,
                volatility: c.volatility,
            })
            .collect()
    }

    /// No risky asset passed the filter: rotate into the safe asset, or
    /// record a hold-cash marker the engine resolves to 100% cash.
    fn defensive(
        &self,
        universe: &AlignedUniverse,
        end_idx: usize,
        date: NaiveDate,
    ) -> Vec<Signal> {
        if let Some(safe) = &self.safe_asset {
            if universe.close(safe, end_idx).is_some() {
                return vec![Signal {
                    symbol: safe.clone(),
                    direction: 1,
                    strength: 1.0,
                    reason: SignalReason::DefensiveRotation,
                    date,
                    momentum: 0.0,
                    volatility: 0.0,
                }];
            }
            log::warn!(
                "safe asset {} has no tradable price at {}; holding cash",
                safe,
                date
            );
        }
        vec![Signal {
            symbol: String::new(),
            direction: 0,
            strength: 0.0,
            reason: SignalReason::HoldCash,
            date,
            momentum: 0.0,
            volatility: 0.0,
        }]
    }

    /// Strength per selected candidate, in candidate order.
    fn strengths(&self, selected: &[Candidate]) -> Vec<f64> {
        match self.strength_method {
            StrengthMethod::Binary => vec![1.0; selected.len()],
            StrengthMethod::Linear => selected
                .iter()
                .map(|c| {
                    ((c.score - self.absolute_threshold) / self.strength_scale_range)
                        .clamp(0.0, 1.0)
                })
                .collect(),
            StrengthMethod::Proportional => {
                let total: f64 = selected.iter().map(|c| c.score.max(0.0)).sum();
                if total <= 0.0 {
                    return vec![1.0; selected.len()];
                }
                selected
                    .iter()
                    .map(|c| (c.score.max(0.0) / total).clamp(0.0, 1.0))
                    .collect()
            }
            StrengthMethod::MomentumRatio => {
                let max = selected
                    .iter()
                    .map(|c| c.score)
                    .fold(f64::NEG_INFINITY, f64::max);
                if max <= 0.0 {
                    return vec![1.0; selected.len()];
                }
                selected
                    .iter()
                    .map(|c| (c.score.max(0.0) / max).clamp(0.0, 1.0))
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PriceSeries;
    use std::collections::HashMap;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// Universe where each symbol grows at a fixed daily rate.
    fn trending_universe(rates: &[(&str, f64)], days: usize) -> AlignedUniverse {
        let mut map = HashMap::new();
        for &(symbol, rate) in rates {
            let closes: Vec<f64> = (0..days)
                .map(|i| 100.0 * (1.0 + rate).powi(i as i32))
                .collect();
            map.insert(
                symbol.to_string(),
                PriceSeries::from_closes(symbol, d(2024, 1, 1), &closes).unwrap(),
            );
        }
        AlignedUniverse::build(&map).unwrap()
    }

    fn engine(position_count: usize, safe: Option<&str>) -> SignalEngine {
        SignalEngine {
            lookback_period: 10,
            momentum_mode: MomentumMode::SimpleReturn,
            use_volatility_adjustment: false,
            absolute_threshold: 0.0,
            position_count,
            safe_asset: safe.map(str::to_string),
            strength_method: StrengthMethod::Binary,
            strength_scale_range: 0.30,
        }
    }

    #[test]
    fn test_top_n_selection_by_momentum() {
        let u = trending_universe(&[("FAST", 0.01), ("SLOW", 0.002), ("DOWN", -0.01)], 20);
        let symbols: Vec<String> = vec!["DOWN".into(), "FAST".into(), "SLOW".into()];
        let signals = engine(2, None).generate(&u, &symbols, 19);

        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].symbol, "FAST");
        assert_eq!(signals[1].symbol, "SLOW");
        assert!(signals.iter().all(|s| s.reason == SignalReason::RelativeTop));
        assert!(signals.iter().all(|s| s.direction == 1));
    }

    #[test]
    fn test_defensive_rotation_when_all_fail() {
        let u = trending_universe(&[("A", -0.01), ("B", -0.02), ("SAFE", 0.0001)], 20);
        let symbols: Vec<String> = vec!["A".into(), "B".into()];
        let signals = engine(2, Some("SAFE")).generate(&u, &symbols, 19);

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].symbol, "SAFE");
        assert_eq!(signals[0].reason, SignalReason::DefensiveRotation);
        assert_eq!(signals[0].strength, 1.0);
    }

    #[test]
    fn test_hold_cash_when_all_fail_and_no_safe_asset() {
        let u = trending_universe(&[("A", -0.01), ("B", -0.02)], 20);
        let symbols: Vec<String> = vec!["A".into(), "B".into()];
        let signals = engine(2, None).generate(&u, &symbols, 19);

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].reason, SignalReason::HoldCash);
        assert_eq!(signals[0].direction, 0);
    }

    #[test]
    fn test_linear_strength_is_threshold_independent() {
        let scale = 0.25;
        for excess in [0.0, 0.05, 0.12, 0.40] {
            for threshold in [-0.10, 0.0, 0.07] {
                let mut e = engine(1, None);
                e.absolute_threshold = threshold;
                e.strength_method = StrengthMethod::Linear;
                e.strength_scale_range = scale;

                let candidate = Candidate {
                    symbol: "A".into(),
                    score: threshold + excess,
                    volatility: 0.2,
                };
                let s = e.strengths(std::slice::from_ref(&candidate))[0];
                let expected = (excess / scale).clamp(0.0, 1.0);
                assert!(
                    (s - expected).abs() < 1e-12,
                    "threshold {} excess {}: {} != {}",
                    threshold,
                    excess,
                    s,
                    expected
                );
            }
        }
    }

    #[test]
    fn test_proportional_strengths_sum_to_one() {
        let mut e = engine(3, None);
        e.strength_method = StrengthMethod::Proportional;
        let selected = vec![
            Candidate {
                symbol: "A".into(),
                score: 0.30,
                volatility: 0.2,
            },
            Candidate {
                symbol: "B".into(),
                score: 0.20,
                volatility: 0.2,
            },
            Candidate {
                symbol: "C".into(),
                score: 0.10,
                volatility: 0.2,
            },
        ];
        let s = e.strengths(&selected);
        assert!((s.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(s[0] > s[1] && s[1] > s[2]);
    }

    #[test]
    fn test_momentum_ratio_leader_gets_one() {
        let mut e = engine(2, None);
        e.strength_method = StrengthMethod::MomentumRatio;
        let selected = vec![
            Candidate {
                symbol: "A".into(),
                score: 0.40,
                volatility: 0.2,
            },
            Candidate {
                symbol: "B".into(),
                score: 0.10,
                volatility: 0.2,
            },
        ];
        let s = e.strengths(&selected);
        assert_eq!(s[0], 1.0);
        assert!((s[1] - 0.25).abs() < 1e-12);
    }

    mod properties {
        use super::*;
        use crate::signals::{Candidate, SignalEngine, StrengthMethod};
        use proptest::prelude::*;

        fn linear_engine(threshold: f64, scale: f64) -> SignalEngine {
            let mut e = engine(1, None);
            e.absolute_threshold = threshold;
            e.strength_method = StrengthMethod::Linear;
            e.strength_scale_range = scale;
            e
        }

        proptest! {
            // Same excess above threshold, same strength — no matter where
            // the threshold sits.
            #[test]
            fn linear_strength_threshold_independent(
                threshold in -0.5f64..0.5,
                excess in 0.0f64..1.0,
                scale in 0.01f64..2.0,
            ) {
                let candidate = |score| Candidate {
                    symbol: "A".into(),
                    score,
                    volatility: 0.2,
                };
                let shifted =
                    linear_engine(threshold, scale).strengths(&[candidate(threshold + excess)]);
                let zeroed = linear_engine(0.0, scale).strengths(&[candidate(excess)]);
                prop_assert!((shifted[0] - zeroed[0]).abs() < 1e-12);
            }

            // Every method maps every score profile into [0, 1].
            #[test]
            fn strengths_stay_in_unit_interval(
                scores in proptest::collection::vec(-1.0f64..2.0, 1..6),
                method_idx in 0usize..4,
            ) {
                let mut e = engine(scores.len(), None);
                e.strength_method = match method_idx {
                    0 => StrengthMethod::Binary,
                    1 => StrengthMethod::Linear,
                    2 => StrengthMethod::Proportional,
                    _ => StrengthMethod::MomentumRatio,
                };
                let selected: Vec<Candidate> = scores
                    .iter()
                    .map(|&score| Candidate {
                        symbol: "A".into(),
                        score,
                        volatility: 0.2,
                    })
                    .collect();
                for s in e.strengths(&selected) {
                    prop_assert!((0.0..=1.0).contains(&s), "strength {} out of range", s);
                }
            }
        }
    }

    #[test]
    fn test_symbol_without_current_price_is_skipped() {
        // B's data stops early enough that it has no tradable close at the
        // rebalance index, so only A can be selected.
        let mut map = HashMap::new();
        let closes_a: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        map.insert(
            "A".to_string(),
            PriceSeries::from_closes("A", d(2024, 1, 1), &closes_a).unwrap(),
        );
        let closes_b: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        map.insert(
            "B".to_string(),
            PriceSeries::from_closes("B", d(2024, 1, 1), &closes_b).unwrap(),
        );
        let u = AlignedUniverse::build(&map).unwrap();

        let symbols: Vec<String> = vec!["A".into(), "B".into()];
        let signals = engine(2, None).generate(&u, &symbols, 29);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].symbol, "A");
    }
}
