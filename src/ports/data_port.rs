//! Price data access port.

use crate::domain::error::FluxbackError;
use crate::domain::timeseries::TimeSeries;

pub trait DataPort {
    /// The full validated series for `symbol`.
    fn fetch_series(&self, symbol: &str) -> Result<TimeSeries, FluxbackError>;

    fn list_symbols(&self) -> Result<Vec<String>, FluxbackError>;
}
