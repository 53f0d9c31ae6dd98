// Momentum calculator - lookback returns with optional volatility adjustment
//
// All scores are deterministic functions of the close window handed in by
// the aligner; leading-edge gaps never reach this module.

use serde::{Deserialize, Serialize};

use crate::data::AlignedUniverse;
use crate::error::BacktestError;

/// Trading days per year, used to annualize daily volatility.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Which momentum formula to apply over the lookback window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MomentumMode {
    /// `P_t / P_{t-L} - 1`
    SimpleReturn,
    /// `(MA_fast - MA_slow) / MA_slow`, both averages over the window tail.
    MaCrossover { fast: usize, slow: usize },
}

/// Momentum score for one symbol at one rebalance timestamp.
#[derive(Debug, Clone, Copy)]
pub struct MomentumScore {
    /// The (possibly volatility-adjusted) score used for filter and rank.
    pub score: f64,
    /// The raw lookback return before any adjustment.
    pub raw: f64,
    /// Annualized realized volatility over the lookback window.
    pub volatility: f64,
}

/// Simple lookback return over a dense close window.
/// The window must hold `lookback + 1` closes (entry and exit prices).
pub fn simple_momentum(closes: &[f64], lookback: usize) -> Option<f64> {
    if closes.len() < lookback + 1 {
        return None;
    }
    let last = *closes.last().unwrap();
    let base = closes[closes.len() - 1 - lookback];
    if base <= 0.0 {
        return None;
    }
    Some(last / base - 1.0)
}

/// Moving-average crossover momentum: relative spread of the fast average
/// over the slow average, both taken over the tail of the window.
pub fn ma_crossover_momentum(closes: &[f64], fast: usize, slow: usize) -> Option<f64> {
    if fast == 0 || slow == 0 || fast >= slow || closes.len() < slow {
        return None;
    }
    let tail_mean = |n: usize| closes[closes.len() - n..].iter().sum::<f64>() / n as f64;
    let ma_fast = tail_mean(fast);
    let ma_slow = tail_mean(slow);
    if ma_slow <= 0.0 {
        return None;
    }
    Some((ma_fast - ma_slow) / ma_slow)
}

/// Annualized standard deviation of daily returns over the window.
pub fn realized_volatility(closes: &[f64]) -> f64 {
    if closes.len() < 3 {
        return 0.0;
    }
    let returns: Vec<f64> = closes.windows(2).map(|w| w[1] / w[0] - 1.0).collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns
        .iter()
        .map(|r| (r - mean).powi(2))
        .sum::<f64>()
        / returns.len() as f64;
    variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Momentum for `symbol` at calendar index `end_idx`.
///
/// Fails with `InsufficientHistory` when the lookback window is not fully
/// covered by available data up to `end_idx`. Intra-window staleness has
/// already been forward-filled by the aligner; an uncovered leading edge
/// fails here rather than guessing.
pub fn momentum_at(
    universe: &AlignedUniverse,
    symbol: &str,
    end_idx: usize,
    lookback: usize,
    mode: MomentumMode,
    volatility_adjusted: bool,
) -> Result<MomentumScore, BacktestError> {
    let window_len = lookback + 1;
    let closes = universe
        .close_window(symbol, end_idx, window_len)
        .ok_or_else(|| BacktestError::InsufficientHistory {
            symbol: symbol.to_string(),
            required: window_len,
            available: universe.history_len(symbol, end_idx),
        })?;

    let raw = match mode {
        MomentumMode::SimpleReturn => simple_momentum(closes, lookback),
        MomentumMode::MaCrossover { fast, slow } => ma_crossover_momentum(closes, fast, slow),
    }
    .ok_or_else(|| BacktestError::InsufficientHistory {
        symbol: symbol.to_string(),
        required: window_len,
        available: closes.len(),
    })?;

    let volatility = realized_volatility(closes);
    let score = if volatility_adjusted {
        raw / volatility.max(1e-6)
    } else {
        raw
    };

    Ok(MomentumScore {
        score,
        raw,
        volatility,
    })
}
