// Parameter space - named dimensions with discrete values or ranges

use std::collections::BTreeMap;

use itertools::Itertools;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{RebalanceFrequency, StrategyConfig};
use crate::error::BacktestError;
use crate::optimizer::OptimizationMethod;
use crate::signals::StrengthMethod;

/// One sampled parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Values a dimension can take.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ParameterDomain {
    IntValues(Vec<i64>),
    IntRange { min: i64, max: i64 },
    FloatValues(Vec<f64>),
    FloatRange { min: f64, max: f64 },
    Categorical(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub domain: ParameterDomain,
}

/// One trial's parameter assignment, keyed by dimension name.
pub type TrialParams = BTreeMap<String, ParamValue>;

/// The set of dimensions a sweep explores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterSpace {
    params: Vec<ParameterSpec>,
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dimension; rejects empty value lists and inverted ranges.
    pub fn add(
        mut self,
        name: impl Into<String>,
        domain: ParameterDomain,
    ) -> Result<Self, BacktestError> {
        let name = name.into();
        match &domain {
            ParameterDomain::IntValues(v) if v.is_empty() => {
                return Err(BacktestError::configuration(format!(
                    "parameter '{}' has an empty value list",
                    name
                )));
            }
            ParameterDomain::FloatValues(v) if v.is_empty() => {
                return Err(BacktestError::configuration(format!(
                    "parameter '{}' has an empty value list",
                    name
                )));
            }
            ParameterDomain::Categorical(v) if v.is_empty() => {
                return Err(BacktestError::configuration(format!(
                    "parameter '{}' has an empty value list",
                    name
                )));
            }
            ParameterDomain::IntRange { min, max } if min > max => {
                return Err(BacktestError::configuration(format!(
                    "parameter '{}' has min {} > max {}",
                    name, min, max
                )));
            }
            ParameterDomain::FloatRange { min, max } if min > max => {
                return Err(BacktestError::configuration(format!(
                    "parameter '{}' has min {} > max {}",
                    name, min, max
                )));
            }
            _ => {}
        }
        self.params.push(ParameterSpec { name, domain });
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.params.len()
    }

    /// Number of grid combinations, None when a continuous float range
    /// makes exhaustive enumeration impossible.
    pub fn grid_size(&self) -> Option<usize> {
        self.params
            .iter()
            .map(|p| match &p.domain {
                ParameterDomain::IntValues(v) => Some(v.len()),
                ParameterDomain::IntRange { min, max } => Some((max - min + 1) as usize),
                ParameterDomain::FloatValues(v) => Some(v.len()),
                ParameterDomain::FloatRange { .. } => None,
                ParameterDomain::Categorical(v) => Some(v.len()),
            })
            .product()
    }

    /// Cartesian product of all discrete values.
    pub fn grid(&self) -> Result<Vec<TrialParams>, BacktestError> {
        if self.params.is_empty() {
            return Err(BacktestError::configuration(
                "parameter space is empty; nothing to sweep",
            ));
        }
        let mut axes: Vec<Vec<ParamValue>> = Vec::with_capacity(self.params.len());
        for p in &self.params {
            let values = match &p.domain {
                ParameterDomain::IntValues(v) => v.iter().map(|&x| ParamValue::Int(x)).collect(),
                ParameterDomain::IntRange { min, max } => {
                    (*min..=*max).map(ParamValue::Int).collect()
                }
                ParameterDomain::FloatValues(v) => {
                    v.iter().map(|&x| ParamValue::Float(x)).collect()
                }
                ParameterDomain::FloatRange { .. } => {
                    return Err(BacktestError::configuration(format!(
                        "parameter '{}' is a continuous range; grid search needs discrete values",
                        p.name
                    )));
                }
                ParameterDomain::Categorical(v) => {
                    v.iter().map(|x| ParamValue::Text(x.clone())).collect()
                }
            };
            axes.push(values);
        }

        Ok(axes
            .into_iter()
            .multi_cartesian_product()
            .map(|combo| {
                self.params
                    .iter()
                    .map(|p| p.name.clone())
                    .zip(combo)
                    .collect()
            })
            .collect())
    }

    /// Sample uniformly, one value per dimension.
    pub fn sample(&self, rng: &mut StdRng) -> TrialParams {
        self.params
            .iter()
            .map(|p| {
                let value = match &p.domain {
                    ParameterDomain::IntValues(v) => {
                        ParamValue::Int(v[rng.random_range(0..v.len())])
                    }
                    ParameterDomain::IntRange { min, max } => {
                        ParamValue::Int(rng.random_range(*min..=*max))
                    }
                    ParameterDomain::FloatValues(v) => {
                        ParamValue::Float(v[rng.random_range(0..v.len())])
                    }
                    ParameterDomain::FloatRange { min, max } => {
                        ParamValue::Float(rng.random_range(*min..*max))
                    }
                    ParameterDomain::Categorical(v) => {
                        ParamValue::Text(v[rng.random_range(0..v.len())].clone())
                    }
                };
                (p.name.clone(), value)
            })
            .collect()
    }
}

/// Overlay one trial's parameters onto a base configuration.
/// Unknown names and type mismatches are configuration errors so a typo
/// fails the whole sweep up front instead of silently tuning nothing.
pub fn apply_params(
    base: &StrategyConfig,
    params: &TrialParams,
) -> Result<StrategyConfig, BacktestError> {
    let mut config = base.clone();

    for (name, value) in params {
        let type_err = || {
            BacktestError::configuration(format!(
                "parameter '{}' has incompatible value '{}'",
                name, value
            ))
        };
        match name.as_str() {
            "lookback_period" => {
                config.lookback_period = value.as_int().ok_or_else(type_err)? as usize;
            }
            "position_count" => {
                config.position_count = value.as_int().ok_or_else(type_err)? as usize;
            }
            "optimization_lookback" => {
                config.optimization_lookback = value.as_int().ok_or_else(type_err)? as usize;
            }
            "absolute_threshold" => {
                config.absolute_threshold = value.as_float().ok_or_else(type_err)?;
            }
            "strength_scale_range" => {
                config.strength_scale_range = value.as_float().ok_or_else(type_err)?;
            }
            "weight_min" => config.weight_min = value.as_float().ok_or_else(type_err)?,
            "weight_max" => config.weight_max = value.as_float().ok_or_else(type_err)?,
            "risk_free_rate" => config.risk_free_rate = value.as_float().ok_or_else(type_err)?,
            "commission" => config.commission = value.as_float().ok_or_else(type_err)?,
            "slippage" => config.slippage = value.as_float().ok_or_else(type_err)?,
            "rebalance_frequency" => {
                config.rebalance_frequency =
                    RebalanceFrequency::parse(value.as_text().ok_or_else(type_err)?)?;
            }
            "strength_method" => {
                config.strength_method = match value.as_text().ok_or_else(type_err)? {
                    "binary" => StrengthMethod::Binary,
                    "linear" => StrengthMethod::Linear,
                    "proportional" => StrengthMethod::Proportional,
                    "momentum_ratio" => StrengthMethod::MomentumRatio,
                    other => {
                        return Err(BacktestError::configuration(format!(
                            "unknown strength method '{}'",
                            other
                        )));
                    }
                };
            }
            "optimization_method" => {
                config.optimization_method = match value.as_text().ok_or_else(type_err)? {
                    "momentum_based" => OptimizationMethod::MomentumBased,
                    "equal_weight" => OptimizationMethod::EqualWeight,
                    "inverse_volatility" => OptimizationMethod::InverseVolatility,
                    "minimum_variance" => OptimizationMethod::MinimumVariance,
                    "maximum_sharpe" => OptimizationMethod::MaximumSharpe,
                    "risk_parity" => OptimizationMethod::RiskParity,
                    "maximum_diversification" => OptimizationMethod::MaximumDiversification,
                    "hierarchical_risk_parity" => OptimizationMethod::HierarchicalRiskParity,
                    other => {
                        return Err(BacktestError::configuration(format!(
                            "unknown optimization method '{}'",
                            other
                        )));
                    }
                };
            }
            other => {
                return Err(BacktestError::configuration(format!(
                    "unknown tunable parameter '{}'",
                    other
                )));
            }
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn two_dim_space() -> ParameterSpace {
        ParameterSpace::new()
            .add("lookback_period", ParameterDomain::IntValues(vec![60, 120, 180]))
            .unwrap()
            .add("position_count", ParameterDomain::IntValues(vec![1, 2]))
            .unwrap()
    }

    #[test]
    fn test_grid_is_full_cartesian_product() {
        let grid = two_dim_space().grid().unwrap();
        assert_eq!(grid.len(), 6);
        assert_eq!(two_dim_space().grid_size(), Some(6));
        // All combinations are distinct.
        let mut seen = std::collections::HashSet::new();
        for params in &grid {
            let key = format!("{:?}", params);
            assert!(seen.insert(key));
        }
    }

    #[test]
    fn test_empty_value_list_rejected() {
        let err = ParameterSpace::new()
            .add("lookback_period", ParameterDomain::IntValues(vec![]))
            .unwrap_err();
        assert!(matches!(err, BacktestError::Configuration { .. }));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let err = ParameterSpace::new()
            .add(
                "absolute_threshold",
                ParameterDomain::FloatRange { min: 0.5, max: 0.1 },
            )
            .unwrap_err();
        assert!(matches!(err, BacktestError::Configuration { .. }));
    }

    #[test]
    fn test_grid_rejects_continuous_range() {
        let space = ParameterSpace::new()
            .add(
                "absolute_threshold",
                ParameterDomain::FloatRange { min: 0.0, max: 0.1 },
            )
            .unwrap();
        assert!(space.grid().is_err());
        assert_eq!(space.grid_size(), None);
    }

    #[test]
    fn test_sampling_is_deterministic_under_seed() {
        let space = ParameterSpace::new()
            .add(
                "absolute_threshold",
                ParameterDomain::FloatRange { min: 0.0, max: 0.2 },
            )
            .unwrap()
            .add("lookback_period", ParameterDomain::IntRange { min: 20, max: 252 })
            .unwrap();

        let draw = |seed: u64| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..10).map(|_| space.sample(&mut rng)).collect::<Vec<_>>()
        };
        assert_eq!(draw(42), draw(42));
        assert_ne!(draw(42), draw(43));
    }

    #[test]
    fn test_apply_params_overlays_config() {
        let mut params = TrialParams::new();
        params.insert("lookback_period".to_string(), ParamValue::Int(90));
        params.insert("absolute_threshold".to_string(), ParamValue::Float(0.05));
        params.insert(
            "optimization_method".to_string(),
            ParamValue::Text("risk_parity".to_string()),
        );

        let config = apply_params(&StrategyConfig::default(), &params).unwrap();
        assert_eq!(config.lookback_period, 90);
        assert_eq!(config.absolute_threshold, 0.05);
        assert_eq!(config.optimization_method, OptimizationMethod::RiskParity);
    }

    #[test]
    fn test_apply_params_rejects_unknown_name() {
        let mut params = TrialParams::new();
        params.insert("lookback".to_string(), ParamValue::Int(90));
        assert!(apply_params(&StrategyConfig::default(), &params).is_err());
    }

    #[test]
    fn test_apply_params_rejects_type_mismatch() {
        let mut params = TrialParams::new();
        params.insert(
            "lookback_period".to_string(),
            ParamValue::Text("long".to_string()),
        );
        assert!(apply_params(&StrategyConfig::default(), &params).is_err());
    }
}
