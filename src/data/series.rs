// Per-symbol OHLCV series, columnar, indexed by trading date

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::BacktestError;

/// Coarse asset-class tag carried as metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetClass {
    Equity,
    Bond,
    Commodity,
    Cash,
    Crypto,
    Other,
}

/// One trading day of OHLCV.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Ordered price history for one symbol.
///
/// Columns are parallel vectors; `dates` is strictly increasing and unique,
/// closes are strictly positive. Gaps are allowed only at source-level
/// holidays — the aligner decides what to do about them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSeries {
    pub symbol: String,
    pub asset_class: AssetClass,
    /// IANA timezone label of the source exchange, informational.
    pub timezone: String,
    pub dates: Vec<NaiveDate>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

impl PriceSeries {
    /// Build a validated series from date/bar rows.
    pub fn new(
        symbol: impl Into<String>,
        asset_class: AssetClass,
        rows: Vec<(NaiveDate, Bar)>,
    ) -> Result<Self, BacktestError> {
        let symbol = symbol.into();
        if rows.is_empty() {
            return Err(BacktestError::data_unavailable(format!(
                "empty price series for {}",
                symbol
            )));
        }

        let mut dates = Vec::with_capacity(rows.len());
        let mut open = Vec::with_capacity(rows.len());
        let mut high = Vec::with_capacity(rows.len());
        let mut low = Vec::with_capacity(rows.len());
        let mut close = Vec::with_capacity(rows.len());
        let mut volume = Vec::with_capacity(rows.len());

        for (date, bar) in rows {
            if let Some(&prev) = dates.last() {
                if date <= prev {
                    return Err(BacktestError::data_unavailable(format!(
                        "{}: price index not strictly increasing at {}",
                        symbol, date
                    )));
                }
            }
            if !(bar.close > 0.0) || !bar.close.is_finite() {
                return Err(BacktestError::data_unavailable(format!(
                    "{}: non-positive close {} on {}",
                    symbol, bar.close, date
                )));
            }
            dates.push(date);
            open.push(bar.open);
            high.push(bar.high);
            low.push(bar.low);
            close.push(bar.close);
            volume.push(bar.volume);
        }

        Ok(Self {
            symbol,
            asset_class,
            timezone: "America/New_York".to_string(),
            dates,
            open,
            high,
            low,
            close,
            volume,
        })
    }

    /// Convenience constructor from bare closes on consecutive dates,
    /// used widely in tests.
    pub fn from_closes(
        symbol: impl Into<String>,
        start: NaiveDate,
        closes: &[f64],
    ) -> Result<Self, BacktestError> {
        let rows = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                (
                    start + chrono::Duration::days(i as i64),
                    Bar {
                        open: c,
                        high: c,
                        low: c,
                        close: c,
                        volume: 0.0,
                    },
                )
            })
            .collect();
        Self::new(symbol, AssetClass::Equity, rows)
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// First date with data (inception).
    pub fn inception(&self) -> NaiveDate {
        self.dates[0]
    }

    /// Most recent date with data.
    pub fn latest(&self) -> NaiveDate {
        *self.dates.last().unwrap()
    }

    /// Close on an exact date, if the source has a bar there.
    pub fn close_on(&self, date: NaiveDate) -> Option<f64> {
        self.dates
            .binary_search(&date)
            .ok()
            .map(|idx| self.close[idx])
    }

    /// Restrict the series to `[start, end]` inclusive.
    pub fn slice(&self, start: NaiveDate, end: NaiveDate) -> Self {
        let from = self.dates.partition_point(|&d| d < start);
        let to = self.dates.partition_point(|&d| d <= end);
        Self {
            symbol: self.symbol.clone(),
            asset_class: self.asset_class,
            timezone: self.timezone.clone(),
            dates: self.dates[from..to].to_vec(),
            open: self.open[from..to].to_vec(),
            high: self.high[from..to].to_vec(),
            low: self.low[from..to].to_vec(),
            close: self.close[from..to].to_vec(),
            volume: self.volume[from..to].to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_from_closes_builds_consecutive_dates() {
        let s = PriceSeries::from_closes("A", d(2024, 1, 1), &[100.0, 101.0, 102.0]).unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s.inception(), d(2024, 1, 1));
        assert_eq!(s.latest(), d(2024, 1, 3));
        assert_eq!(s.close_on(d(2024, 1, 2)), Some(101.0));
        assert_eq!(s.close_on(d(2024, 1, 10)), None);
    }

    #[test]
    fn test_rejects_non_monotonic_dates() {
        let bar = Bar {
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 0.0,
        };
        let rows = vec![(d(2024, 1, 2), bar), (d(2024, 1, 2), bar)];
        assert!(PriceSeries::new("A", AssetClass::Equity, rows).is_err());
    }

    #[test]
    fn test_rejects_non_positive_close() {
        let bad = Bar {
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 0.0,
            volume: 0.0,
        };
        assert!(PriceSeries::new("A", AssetClass::Equity, vec![(d(2024, 1, 2), bad)]).is_err());
    }

    #[test]
    fn test_slice_inclusive() {
        let s = PriceSeries::from_closes("A", d(2024, 1, 1), &[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        let cut = s.slice(d(2024, 1, 2), d(2024, 1, 4));
        assert_eq!(cut.close, vec![2.0, 3.0, 4.0]);
    }
}
