//! MACD (Moving Average Convergence Divergence) indicator.
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of MACD Line
//! Histogram = MACD Line - Signal Line
//!
//! Default parameters: fast=12, slow=26, signal=9
//! First value at bar max(fast, slow) - 1 + signal - 1.

use super::ema::EmaCore;
use super::{IndicatorDescriptor, IndicatorValue, ParamSpec, RollingIndicator, int_param};
use crate::domain::ohlcv::Bar;

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

pub struct Macd {
    fast: EmaCore,
    slow: EmaCore,
    signal: EmaCore,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Macd {
            fast: EmaCore::new(fast),
            slow: EmaCore::new(slow),
            signal: EmaCore::new(signal),
        }
    }
}

impl RollingIndicator for Macd {
    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        let fast = self.fast.push(bar.close);
        let slow = self.slow.push(bar.close);
        let line = fast? - slow?;
        let signal = self.signal.push(line)?;
        Some(IndicatorValue::Macd {
            line,
            signal,
            histogram: line - signal,
        })
    }
}

pub fn descriptor() -> IndicatorDescriptor {
    IndicatorDescriptor::new(
        "MACD",
        "Moving average convergence divergence",
        vec![
            ParamSpec::integer("fast", DEFAULT_FAST, 1),
            ParamSpec::integer("slow", DEFAULT_SLOW, 1),
            ParamSpec::integer("signal", DEFAULT_SIGNAL, 1),
        ],
        &["line", "signal", "histogram"],
    )
}

pub fn min_lookback(params: &[f64]) -> usize {
    let fast = int_param(params, 0, DEFAULT_FAST);
    let slow = int_param(params, 1, DEFAULT_SLOW);
    let signal = int_param(params, 2, DEFAULT_SIGNAL);
    fast.max(slow) + signal - 1
}

pub fn build(params: &[f64]) -> Box<dyn RollingIndicator> {
    Box::new(Macd::new(
        int_param(params, 0, DEFAULT_FAST),
        int_param(params, 1, DEFAULT_SLOW),
        int_param(params, 2, DEFAULT_SIGNAL),
    ))
}
