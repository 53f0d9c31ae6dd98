// Benchmark series construction

use crate::backtesting::metrics::EquityCurve;
use crate::data::AlignedUniverse;

/// How benchmark frictions are modelled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BenchmarkMode {
    /// No costs — models an index fund. The default.
    Passive,
    /// One-time entry and one-time exit cost of `commission + slippage`
    /// each, applied to the indexed series.
    Realistic {
        commission: f64,
        slippage: f64,
    },
}

impl BenchmarkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passive => "passive",
            Self::Realistic { .. } => "realistic",
        }
    }
}

/// Benchmark equity indexed to `initial_capital` on the first date the
/// symbol has a price. None when the symbol never trades in the window.
pub fn benchmark_curve(
    universe: &AlignedUniverse,
    symbol: &str,
    initial_capital: f64,
    mode: BenchmarkMode,
) -> Option<EquityCurve> {
    let mut base: Option<f64> = None;
    let mut curve = EquityCurve::new();

    for idx in 0..universe.len() {
        let Some(price) = universe.mark_close(symbol, idx) else {
            continue;
        };
        let base_price = *base.get_or_insert(price);
        curve.add_point(universe.date_at(idx), initial_capital * price / base_price);
    }

    if curve.is_empty() {
        return None;
    }

    if let BenchmarkMode::Realistic {
        commission,
        slippage,
    } = mode
    {
        let entry_cost = commission + slippage;
        for value in &mut curve.values {
            *value *= 1.0 - entry_cost;
        }
        if let Some(last) = curve.values.last_mut() {
            *last *= 1.0 - entry_cost;
        }
    }

    Some(curve)
}
