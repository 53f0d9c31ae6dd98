// Generic CSV loader for Yahoo Finance format (Date,Open,High,Low,Close,Volume,...)
// Returns a validated PriceSeries, oldest first

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::ReaderBuilder;

use crate::data::series::{AssetClass, Bar, PriceSeries};
use crate::data::source::{DataError, DataSource, Timeframe};
use crate::error::BacktestError;

/// Load a Yahoo-style CSV into a PriceSeries.
/// filename: path to CSV (e.g., "data/SPY.csv")
pub fn load_csv_series(filename: &Path, symbol: &str) -> Result<PriceSeries, BacktestError> {
    let file = File::open(filename).map_err(|e| {
        BacktestError::data_unavailable(format!("{}: {}", filename.display(), e))
    })?;
    let mut rdr = ReaderBuilder::new()
        .flexible(true)      // Handles varying column counts
        .trim(csv::Trim::All)
        .has_headers(true)
        .from_reader(file);

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result
            .map_err(|e| BacktestError::data_unavailable(format!("{}: {}", symbol, e)))?;
        if record.len() < 5 {
            continue; // Skip short rows
        }

        // Yahoo timestamps may carry a time/offset suffix; keep the date part.
        let date_str = record[0].split_whitespace().next().unwrap_or("");
        let date = match NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
            Ok(d) => d,
            Err(_) => {
                log::debug!("{}: skipping unparsable date '{}'", symbol, date_str);
                continue;
            }
        };

        let field = |i: usize| -> Option<f64> {
            let s = record.get(i)?.trim();
            if s.is_empty() || s == "null" || s == "N/A" {
                return None;
            }
            s.parse().ok()
        };

        let close = match field(4) {
            Some(c) if c > 0.0 => c,
            _ => {
                log::debug!("{}: skipping bad close on {}", symbol, date);
                continue;
            }
        };

        rows.push((
            date,
            Bar {
                open: field(1).unwrap_or(close),
                high: field(2).unwrap_or(close),
                low: field(3).unwrap_or(close),
                close,
                volume: field(5).unwrap_or(0.0),
            },
        ));
    }

    if rows.is_empty() {
        return Err(BacktestError::data_unavailable(format!(
            "{}: no valid rows parsed — check CSV format",
            filename.display()
        )));
    }
    rows.sort_by_key(|(d, _)| *d);
    rows.dedup_by_key(|(d, _)| *d);
    PriceSeries::new(symbol, AssetClass::Equity, rows)
}

/// DataSource backed by a directory of `<SYMBOL>.csv` files.
///
/// Files are read eagerly on construction so tuner trials can share one
/// instance for concurrent reads.
pub struct CsvDataSource {
    series: HashMap<String, PriceSeries>,
}

impl CsvDataSource {
    pub fn load(dir: impl Into<PathBuf>, symbols: &[String]) -> Result<Self, BacktestError> {
        let dir = dir.into();
        let mut series = HashMap::new();
        for symbol in symbols {
            let path = dir.join(format!("{}.csv", symbol));
            match load_csv_series(&path, symbol) {
                Ok(s) => {
                    series.insert(symbol.clone(), s);
                }
                Err(e) => log::warn!("skipping {}: {}", symbol, e),
            }
        }
        if series.is_empty() {
            return Err(BacktestError::data_unavailable(format!(
                "no loadable symbols in {}",
                dir.display()
            )));
        }
        Ok(Self { series })
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.series.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

impl DataSource for CsvDataSource {
    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        _timeframe: Timeframe,
    ) -> Result<PriceSeries, DataError> {
        let series = self
            .series
            .get(symbol)
            .ok_or_else(|| DataError::NotFound(symbol.to_string()))?;
        let sliced = series.slice(start, end);
        if sliced.is_empty() {
            return Err(DataError::NotFound(symbol.to_string()));
        }
        Ok(sliced)
    }

    fn get_data_range(&self, symbol: &str) -> Result<(NaiveDate, NaiveDate), DataError> {
        self.series
            .get(symbol)
            .map(|s| (s.inception(), s.latest()))
            .ok_or_else(|| DataError::NotFound(symbol.to_string()))
    }
}
