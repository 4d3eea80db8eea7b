//! Batch runs: many strategies over one series.
//!
//! Each run owns its indicator state and portfolio, so runs share nothing
//! mutable and can execute in parallel. Results come back in input order.

use rayon::prelude::*;
use tracing::info;

use super::backtest::{BacktestConfig, BacktestResult, run_backtest};
use super::error::FluxbackError;
use super::indicator::IndicatorRegistry;
use super::strategy::Strategy;
use super::timeseries::TimeSeries;

pub fn run_batch(
    series: &TimeSeries,
    strategies: &[Strategy],
    registry: &IndicatorRegistry,
    config: &BacktestConfig,
) -> Vec<Result<BacktestResult, FluxbackError>> {
    info!(strategies = strategies.len(), bars = series.len(), "batch started");
    let results: Vec<_> = strategies
        .par_iter()
        .map(|strategy| run_backtest(series, strategy, registry, config))
        .collect();
    let failed = results.iter().filter(|r| r.is_err()).count();
    info!(completed = results.len() - failed, failed, "batch finished");
    results
}
