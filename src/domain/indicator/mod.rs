//! Technical indicators.
//!
//! Every indicator is an incremental state machine fed one bar at a time
//! through [`RollingIndicator::update`]. The per-run wrapper
//! [`IndicatorState`] gates output on the indicator's minimum lookback so
//! rules never see a value computed from fewer bars than it needs.
//!
//! - `IndicatorValue`: the different output shapes
//! - `IndicatorSpec`: canonical name + resolved parameters (instance identity)
//! - `IndicatorDescriptor`: registry metadata (parameter schema, outputs)
//! - `IndicatorRegistry`: name -> factory lookup, see [`registry`]

pub mod registry;

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod lag;
pub mod macd;
pub mod obv;
pub mod roc;
pub mod rsi;
pub mod rvol;
pub mod sma;
pub mod stddev;
pub mod stochastic;
pub mod vwap;
pub mod wma;

pub use registry::IndicatorRegistry;

use serde::Serialize;
use std::fmt;

use crate::domain::ohlcv::Bar;
use crate::domain::timeseries::TimeSeries;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IndicatorValue {
    Simple(f64),
    Macd {
        line: f64,
        signal: f64,
        histogram: f64,
    },
    Stochastic {
        k: f64,
        d: f64,
    },
    Bollinger {
        upper: f64,
        middle: f64,
        lower: f64,
    },
}

impl IndicatorValue {
    /// Output by position, in the order the descriptor lists its outputs.
    pub fn output(&self, index: usize) -> Option<f64> {
        match (self, index) {
            (IndicatorValue::Simple(v), 0) => Some(*v),
            (IndicatorValue::Macd { line, .. }, 0) => Some(*line),
            (IndicatorValue::Macd { signal, .. }, 1) => Some(*signal),
            (IndicatorValue::Macd { histogram, .. }, 2) => Some(*histogram),
            (IndicatorValue::Stochastic { k, .. }, 0) => Some(*k),
            (IndicatorValue::Stochastic { d, .. }, 1) => Some(*d),
            (IndicatorValue::Bollinger { upper, .. }, 0) => Some(*upper),
            (IndicatorValue::Bollinger { middle, .. }, 1) => Some(*middle),
            (IndicatorValue::Bollinger { lower, .. }, 2) => Some(*lower),
            _ => None,
        }
    }
}

/// An incremental indicator. Implementations keep O(1) amortized state per
/// bar and return `None` until they have enough history.
pub trait RollingIndicator: Send {
    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Integer,
    Number,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub default: f64,
    pub min: f64,
}

impl ParamSpec {
    pub fn integer(name: &str, default: usize, min: usize) -> Self {
        ParamSpec {
            name: name.to_string(),
            kind: ParamKind::Integer,
            default: default as f64,
            min: min as f64,
        }
    }

    pub fn number(name: &str, default: f64, min: f64) -> Self {
        ParamSpec {
            name: name.to_string(),
            kind: ParamKind::Number,
            default,
            min,
        }
    }
}

/// Stateless registry metadata for one indicator kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorDescriptor {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub outputs: Vec<String>,
}

impl IndicatorDescriptor {
    pub fn new(name: &str, description: &str, params: Vec<ParamSpec>, outputs: &[&str]) -> Self {
        IndicatorDescriptor {
            name: name.to_string(),
            description: description.to_string(),
            params,
            outputs: outputs.iter().map(|o| o.to_string()).collect(),
        }
    }

    pub fn output_index(&self, output: &str) -> Option<usize> {
        self.outputs.iter().position(|o| o.eq_ignore_ascii_case(output))
    }
}

/// Integer parameter at `index`, falling back to `default`. Parameters reach
/// factories already validated by the registry.
pub(crate) fn int_param(params: &[f64], index: usize, default: usize) -> usize {
    params
        .get(index)
        .map(|p| p.max(1.0) as usize)
        .unwrap_or(default)
}

pub(crate) fn num_param(params: &[f64], index: usize, default: f64) -> f64 {
    params.get(index).copied().unwrap_or(default)
}

/// Canonical identity of an indicator instance: two references with equal
/// specs share one state during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSpec {
    pub name: String,
    pub params: Vec<f64>,
}

impl fmt::Display for IndicatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.params.is_empty() {
            let args: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
            write!(f, "({})", args.join(","))?;
        }
        Ok(())
    }
}

/// Per-run rolling state for one [`IndicatorSpec`].
pub struct IndicatorState {
    spec: IndicatorSpec,
    inner: Box<dyn RollingIndicator>,
    min_lookback: usize,
    bars_seen: usize,
}

impl IndicatorState {
    pub fn new(spec: IndicatorSpec, inner: Box<dyn RollingIndicator>, min_lookback: usize) -> Self {
        IndicatorState {
            spec,
            inner,
            min_lookback: min_lookback.max(1),
            bars_seen: 0,
        }
    }

    pub fn spec(&self) -> &IndicatorSpec {
        &self.spec
    }

    pub fn min_lookback(&self) -> usize {
        self.min_lookback
    }

    /// Feed bar `index` of `series`. Bars must be fed in order starting at 0;
    /// anything else is a caller bug and yields `None` without touching state.
    pub fn step(&mut self, series: &TimeSeries, index: usize) -> Option<IndicatorValue> {
        if index != self.bars_seen {
            return None;
        }
        let bar = series.get(index)?;
        self.bars_seen += 1;
        let value = self.inner.update(bar);
        if self.bars_seen < self.min_lookback {
            None
        } else {
            value
        }
    }
}

impl fmt::Debug for IndicatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndicatorState")
            .field("spec", &self.spec)
            .field("min_lookback", &self.min_lookback)
            .field("bars_seen", &self.bars_seen)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::NaiveDate;

    pub fn bar(i: usize, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar {
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                + chrono::Duration::days(i as i64),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn make_bars(prices: &[f64]) -> Vec<Bar> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &close)| bar(i, close, close, close, close, 1000.0))
            .collect()
    }

    /// Feed every bar and collect the raw (ungated) outputs.
    pub fn run(ind: &mut dyn RollingIndicator, bars: &[Bar]) -> Vec<Option<IndicatorValue>> {
        bars.iter().map(|b| ind.update(b)).collect()
    }

    pub fn simple(v: &Option<IndicatorValue>) -> f64 {
        match v {
            Some(IndicatorValue::Simple(x)) => *x,
            other => panic!("expected Simple value, got {other:?}"),
        }
    }
}
