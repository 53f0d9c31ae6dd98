// Trade record - one closed (or partially closed) round trip
// Immutable after creation; only read by metrics and result consumers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    /// Shares closed by this trade (positive; the core is long-only).
    pub quantity: f64,
    /// Average entry execution price of the closed shares.
    pub entry_price: f64,
    /// Exit execution price (slippage already applied).
    pub exit_price: f64,
    /// Net profit after all commissions on both legs.
    pub pnl: f64,
    /// `pnl` relative to the entry cost basis, as a fraction.
    pub pnl_pct: f64,
    /// Total commission across entry (pro rata) and exit legs.
    pub commission: f64,
    /// Total slippage cost across entry (pro rata) and exit legs.
    pub slippage: f64,
}

impl Trade {
    #[allow(clippy::too_many_arguments)]
    pub fn close(
        symbol: String,
        entry_date: NaiveDate,
        exit_date: NaiveDate,
        quantity: f64,
        entry_price: f64,
        exit_price: f64,
        commission: f64,
        slippage: f64,
    ) -> Self {
        // Entry/exit prices are execution prices, so slippage is already
        // inside the price difference; commission is the only explicit
        // deduction here. `slippage` stays informational.
        let pnl = (exit_price - entry_price) * quantity - commission;
        let cost_basis = entry_price * quantity;
        let pnl_pct = if cost_basis > 0.0 { pnl / cost_basis } else { 0.0 };
        Self {
            symbol,
            entry_date,
            exit_date,
            quantity,
            entry_price,
            exit_price,
            pnl,
            pnl_pct,
            commission,
            slippage,
        }
    }

    pub fn holding_days(&self) -> i64 {
        (self.exit_date - self.entry_date).num_days()
    }

    pub fn is_winner(&self) -> bool {
        self.pnl > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_pnl_accounts_for_commission() {
        let trade = Trade::close(
            "A".into(),
            d(2024, 1, 2),
            d(2024, 2, 2),
            100.0,
            100.0,
            110.0,
            25.0,
            10.0,
        );
        assert!((trade.pnl - 975.0).abs() < 1e-9);
        assert!((trade.pnl_pct - 0.0975).abs() < 1e-9);
        assert_eq!(trade.holding_days(), 31);
        assert!(trade.is_winner());
    }

    #[test]
    fn test_losing_trade() {
        let trade = Trade::close(
            "A".into(),
            d(2024, 1, 2),
            d(2024, 1, 9),
            10.0,
            100.0,
            95.0,
            2.0,
            1.0,
        );
        assert!((trade.pnl + 52.0).abs() < 1e-9);
        assert!(!trade.is_winner());
    }
}
