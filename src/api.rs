//! The two boundary operations external collaborators call.
//!
//! Both take and return in-memory values only. Each call builds its own
//! [`IndicatorRegistry`], so calls are independent and may run concurrently.

use crate::domain::backtest::{self, BacktestConfig, BacktestResult};
use crate::domain::error::FluxbackError;
use crate::domain::indicator::{IndicatorDescriptor, IndicatorRegistry};
use crate::domain::strategy::Strategy;
use crate::domain::timeseries::TimeSeries;

/// Parse a YAML strategy and CSV OHLCV text, then run one backtest with the
/// default engine configuration and the strategy's `execution:` overrides.
pub fn run_backtest(strategy_yaml: &str, data_csv: &str) -> Result<BacktestResult, FluxbackError> {
    let registry = IndicatorRegistry::with_builtins();
    let strategy = Strategy::parse(strategy_yaml, &registry)?;
    let series = TimeSeries::load(data_csv)?;
    backtest::run_backtest(&series, &strategy, &registry, &BacktestConfig::default())
}

/// Every built-in indicator, sorted by name.
pub fn list_indicators() -> Vec<IndicatorDescriptor> {
    IndicatorRegistry::with_builtins().descriptors()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_include_core_indicators() {
        let names: Vec<String> = list_indicators().into_iter().map(|d| d.name).collect();
        for expected in ["SMA", "EMA", "RSI", "BOLLINGER", "MACD", "LAG"] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn strategy_errors_come_before_data_errors() {
        let err = run_backtest("strategy: [", "not,a,csv").unwrap_err();
        assert!(matches!(err, FluxbackError::StrategyFormat { .. }));
    }
}
