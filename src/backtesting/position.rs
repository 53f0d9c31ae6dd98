// Position tracking for open holdings
// Quantities are fractional shares; the engine's positions map is the
// only owner and the only mutator.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Fractional shares held; always > 0 while the position is open.
    pub quantity: f64,
    /// Average execution price across the entry fills.
    pub entry_price: f64,
    pub entry_date: NaiveDate,
    /// Last mark-to-market close.
    pub current_price: f64,
    /// Cumulative entry-side commission, allocated pro rata on reduction.
    pub entry_commission: f64,
    /// Cumulative entry-side slippage cost, allocated pro rata on reduction.
    pub entry_slippage: f64,
}

impl Position {
    pub fn open(
        symbol: String,
        quantity: f64,
        entry_price: f64,
        entry_date: NaiveDate,
        commission: f64,
        slippage: f64,
    ) -> Self {
        Self {
            symbol,
            quantity,
            entry_price,
            entry_date,
            current_price: entry_price,
            entry_commission: commission,
            entry_slippage: slippage,
        }
    }

    pub fn market_value(&self) -> f64 {
        self.quantity * self.current_price
    }

    pub fn unrealized_pnl(&self) -> f64 {
        (self.current_price - self.entry_price) * self.quantity
    }

    /// Fold an additional fill into the position: quantity adds, the entry
    /// price becomes the fill-weighted average, frictions accumulate.
    pub fn increase(&mut self, quantity: f64, price: f64, commission: f64, slippage: f64) {
        let total = self.quantity + quantity;
        self.entry_price = (self.entry_price * self.quantity + price * quantity) / total;
        self.quantity = total;
        self.entry_commission += commission;
        self.entry_slippage += slippage;
        self.current_price = price;
    }

    /// Remove `quantity` shares and return the pro-rata share of entry-side
    /// frictions carried by them, as `(commission, slippage)`.
    pub fn reduce(&mut self, quantity: f64) -> (f64, f64) {
        let fraction = (quantity / self.quantity).clamp(0.0, 1.0);
        let commission = self.entry_commission * fraction;
        let slippage = self.entry_slippage * fraction;
        self.quantity -= quantity;
        self.entry_commission -= commission;
        self.entry_slippage -= slippage;
        (commission, slippage)
    }

    pub fn mark(&mut self, price: f64) {
        self.current_price = price;
    }
}
