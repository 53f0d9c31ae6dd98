// Hyperparameter tuning
// Grid, random, and (degraded) Bayesian sweeps over strategy parameters,
// each trial a full backtest on shared read-only data.

pub mod space;
pub mod tuner;

pub use space::{apply_params, ParamValue, ParameterDomain, ParameterSpace, TrialParams};
pub use tuner::{ObjectiveMetric, SearchMethod, TrialResult, Tuner, TuningResult};
