// Boundary error taxonomy for the backtesting core

use thiserror::Error;

/// Errors surfaced across the crate boundary.
///
/// Everything recoverable inside a rebalance (optimizer fallback, a single
/// stale price, an undersized buy) is handled in place and logged; only the
/// conditions below abort a run.
#[derive(Debug, Clone, Error)]
pub enum BacktestError {
    /// Invalid configuration detected before the time loop starts.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A lookback window is not fully covered by available history.
    #[error("insufficient history for {symbol}: need {required} observations, have {available}")]
    InsufficientHistory {
        symbol: String,
        required: usize,
        available: usize,
    },

    /// No usable price data for the requested universe or window.
    #[error("data unavailable: {message}")]
    DataUnavailable { message: String },

    /// The optimizer could not produce weights even after fallback.
    #[error("optimization failed ({method}): {message}")]
    OptimizationFailed { method: String, message: String },

    /// A post-rebalance invariant was violated — indicates a bug, aborts
    /// with a diagnostic dump of the ledger.
    #[error("rebalance failed at {date}: {message}")]
    RebalanceFailed { date: String, message: String },

    /// Cooperative cancellation observed at a rebalance boundary.
    #[error("backtest cancelled at {date}")]
    Cancelled { date: String },
}

impl BacktestError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn data_unavailable(message: impl Into<String>) -> Self {
        Self::DataUnavailable {
            message: message.into(),
        }
    }
}
