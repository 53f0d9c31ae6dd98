// Price data model and alignment
// Provides the per-symbol OHLCV series, the consumed DataSource interface,
// the CSV-backed implementation, and the unified trading calendar.

pub mod align;
pub mod csv_loader;
pub mod series;
pub mod source;

pub use align::{AlignedUniverse, MAX_FFILL_DAYS};
pub use csv_loader::{load_csv_series, CsvDataSource};
pub use series::{AssetClass, Bar, PriceSeries};
pub use source::{DataError, DataSource, FetchOutcome, Timeframe};
