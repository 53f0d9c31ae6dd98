// Consumed data-source interface
// The core never fetches prices itself; rate limiting, retry, and caching
// are the source's problem. A source shared across tuner trials must be
// safe for concurrent reads.

use std::collections::HashMap;

use chrono::NaiveDate;
use thiserror::Error;

use crate::data::series::PriceSeries;

/// Bar granularity requested from a source. The core only consumes daily
/// bars; intraday values exist for sources that serve other callers too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    Daily,
    Hourly,
    Minute,
}

#[derive(Debug, Clone, Error)]
pub enum DataError {
    #[error("symbol {0} not found")]
    NotFound(String),
    #[error("rate limited by source, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("network error: {0}")]
    NetworkError(String),
}

/// Result of a multi-symbol fetch: partial failure returns whatever was
/// available, and the caller decides whether missing symbols are fatal.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub series: HashMap<String, PriceSeries>,
    pub missing: Vec<(String, DataError)>,
}

pub trait DataSource {
    /// Fetch one symbol over an inclusive date range.
    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        timeframe: Timeframe,
    ) -> Result<PriceSeries, DataError>;

    /// Fetch several symbols; missing ones are reported, not fatal.
    fn fetch_multiple(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
        timeframe: Timeframe,
    ) -> FetchOutcome {
        let mut series = HashMap::new();
        let mut missing = Vec::new();
        for symbol in symbols {
            match self.fetch(symbol, start, end, timeframe) {
                Ok(s) => {
                    series.insert(symbol.clone(), s);
                }
                Err(e) => missing.push((symbol.clone(), e)),
            }
        }
        FetchOutcome { series, missing }
    }

    /// (earliest, latest) available dates for a symbol — drives the
    /// "longest available" window mode.
    fn get_data_range(&self, symbol: &str) -> Result<(NaiveDate, NaiveDate), DataError>;
}
