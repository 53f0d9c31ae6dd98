// Allocation history - one snapshot of the book per timestep

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::backtesting::position::Position;

/// Per-symbol slice of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldingSnapshot {
    pub symbol: String,
    pub quantity: f64,
    pub price: f64,
    pub value: f64,
    /// Percent of portfolio value, 0-100.
    pub pct: f64,
}

/// State of the book at one timestep, taken after mark-to-market and
/// before any rebalance executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub date: NaiveDate,
    pub portfolio_value: f64,
    pub cash: f64,
    pub holdings: Vec<HoldingSnapshot>,
}

impl PositionSnapshot {
    /// Capture the book. Holdings come out in the iteration order of the
    /// positions map (sorted, since the engine keys a BTreeMap).
    pub fn capture<'a>(
        date: NaiveDate,
        cash: f64,
        positions: impl Iterator<Item = &'a Position>,
    ) -> Self {
        let holdings: Vec<HoldingSnapshot> = positions
            .map(|p| HoldingSnapshot {
                symbol: p.symbol.clone(),
                quantity: p.quantity,
                price: p.current_price,
                value: p.market_value(),
                pct: 0.0,
            })
            .collect();
        let portfolio_value = cash + holdings.iter().map(|h| h.value).sum::<f64>();

        let mut snapshot = Self {
            date,
            portfolio_value,
            cash,
            holdings,
        };
        if portfolio_value > 0.0 {
            for h in &mut snapshot.holdings {
                h.pct = h.value / portfolio_value * 100.0;
            }
        }
        snapshot
    }

    /// Accounting identity: cash plus market value equals portfolio value.
    pub fn is_consistent(&self, tolerance: f64) -> bool {
        let total = self.cash + self.holdings.iter().map(|h| h.value).sum::<f64>();
        (total - self.portfolio_value).abs() < tolerance
    }
}
