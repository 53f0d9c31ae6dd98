// Unified trading calendar across the universe
// Union of all symbols' trading dates; per symbol the close column is
// forward-filled after inception, with the fill run length tracked so a
// symbol that has gone stale can be excluded from a rebalance.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::data::series::PriceSeries;
use crate::error::BacktestError;

/// Longest forward-fill run still considered tradable. Beyond this the
/// symbol is excluded from the rebalance at that date.
pub const MAX_FFILL_DAYS: usize = 5;

struct AlignedColumn {
    /// Close per calendar index; meaningless before `first_valid`.
    closes: Vec<f64>,
    /// Consecutive forward-fill count at each index (0 = fresh observation).
    gap_runs: Vec<u32>,
    /// Calendar index of the symbol's first observation.
    first_valid: usize,
}

/// The engine's read-only view of the universe: one calendar, one close
/// column per symbol.
pub struct AlignedUniverse {
    dates: Vec<NaiveDate>,
    symbols: Vec<String>,
    columns: HashMap<String, AlignedColumn>,
}

impl AlignedUniverse {
    /// Align a set of series onto the union of their trading dates.
    pub fn build(series: &HashMap<String, PriceSeries>) -> Result<Self, BacktestError> {
        if series.is_empty() {
            return Err(BacktestError::data_unavailable(
                "cannot align an empty universe",
            ));
        }

        let mut dates: Vec<NaiveDate> = series
            .values()
            .flat_map(|s| s.dates.iter().copied())
            .collect();
        dates.sort_unstable();
        dates.dedup();

        let mut symbols: Vec<String> = series.keys().cloned().collect();
        symbols.sort();

        let mut columns = HashMap::new();
        for symbol in &symbols {
            let s = &series[symbol];
            let mut closes = vec![f64::NAN; dates.len()];
            let mut gap_runs = vec![0u32; dates.len()];
            let first_valid = dates.partition_point(|&d| d < s.inception());

            let mut cursor = 0usize; // next unread row of the source series
            let mut last_close = f64::NAN;
            let mut run = 0u32;
            for (idx, &date) in dates.iter().enumerate().skip(first_valid) {
                if cursor < s.dates.len() && s.dates[cursor] == date {
                    last_close = s.close[cursor];
                    cursor += 1;
                    run = 0;
                } else {
                    run += 1;
                }
                closes[idx] = last_close;
                gap_runs[idx] = run;
            }

            columns.insert(
                symbol.clone(),
                AlignedColumn {
                    closes,
                    gap_runs,
                    first_valid,
                },
            );
        }

        Ok(Self {
            dates,
            symbols,
            columns,
        })
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Symbols in deterministic (sorted) order.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn date_at(&self, idx: usize) -> NaiveDate {
        self.dates[idx]
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.columns.contains_key(symbol)
    }

    /// Tradable close at a calendar index: None before inception or once
    /// the forward-fill run exceeds `MAX_FFILL_DAYS`.
    pub fn close(&self, symbol: &str, idx: usize) -> Option<f64> {
        let col = self.columns.get(symbol)?;
        if idx < col.first_valid || col.gap_runs[idx] as usize > MAX_FFILL_DAYS {
            return None;
        }
        Some(col.closes[idx])
    }

    /// Forward-filled close regardless of staleness; still None before
    /// inception. Used for marking existing positions to market.
    pub fn mark_close(&self, symbol: &str, idx: usize) -> Option<f64> {
        let col = self.columns.get(symbol)?;
        if idx < col.first_valid {
            return None;
        }
        Some(col.closes[idx])
    }

    /// Number of calendar observations available up to and including `idx`.
    pub fn history_len(&self, symbol: &str, idx: usize) -> usize {
        match self.columns.get(symbol) {
            Some(col) if idx >= col.first_valid => idx - col.first_valid + 1,
            _ => 0,
        }
    }

    /// `len` closes ending at `end_idx` inclusive, or None when the window
    /// reaches past the symbol's inception (leading-edge gaps are never
    /// guessed at).
    pub fn close_window(&self, symbol: &str, end_idx: usize, len: usize) -> Option<&[f64]> {
        let col = self.columns.get(symbol)?;
        if len == 0 || end_idx + 1 < len || end_idx + 1 - len < col.first_valid {
            return None;
        }
        if end_idx >= col.closes.len() {
            return None;
        }
        Some(&col.closes[end_idx + 1 - len..=end_idx])
    }

    /// `len` daily simple returns ending at `end_idx` (needs `len + 1` closes).
    pub fn returns_window(&self, symbol: &str, end_idx: usize, len: usize) -> Option<Vec<f64>> {
        let closes = self.close_window(symbol, end_idx, len + 1)?;
        Some(
            closes
                .windows(2)
                .map(|w| w[1] / w[0] - 1.0)
                .collect(),
        )
    }
}
