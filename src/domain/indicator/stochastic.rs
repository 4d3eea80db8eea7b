//! Stochastic oscillator.
//!
//! %K = 100 * (close - lowest low) / (highest high - lowest low) over k bars,
//! 50 when the range is flat. %D = SMA(d) of %K.

use super::{IndicatorDescriptor, IndicatorValue, ParamSpec, RollingIndicator, int_param};
use crate::domain::indicator_helpers::{MonotonicWindow, RollingWindow};
use crate::domain::ohlcv::Bar;

pub const DEFAULT_K: usize = 14;
pub const DEFAULT_D: usize = 3;

pub struct Stochastic {
    k_period: usize,
    seen: usize,
    highest: MonotonicWindow,
    lowest: MonotonicWindow,
    k_values: RollingWindow,
}

impl Stochastic {
    pub fn new(k_period: usize, d_period: usize) -> Self {
        Stochastic {
            k_period: k_period.max(1),
            seen: 0,
            highest: MonotonicWindow::max(k_period),
            lowest: MonotonicWindow::min(k_period),
            k_values: RollingWindow::new(d_period),
        }
    }
}

impl RollingIndicator for Stochastic {
    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        self.seen += 1;
        let hh = self.highest.push(bar.high);
        let ll = self.lowest.push(bar.low);
        if self.seen < self.k_period {
            return None;
        }
        let range = hh - ll;
        let k = if range > 0.0 {
            100.0 * (bar.close - ll) / range
        } else {
            50.0
        };
        self.k_values.push(k);
        self.k_values.is_full().then(|| IndicatorValue::Stochastic {
            k,
            d: self.k_values.mean(),
        })
    }
}

pub fn descriptor() -> IndicatorDescriptor {
    IndicatorDescriptor::new(
        "STOCHASTIC",
        "Stochastic oscillator %K with %D smoothing",
        vec![
            ParamSpec::integer("k_period", DEFAULT_K, 1),
            ParamSpec::integer("d_period", DEFAULT_D, 1),
        ],
        &["k", "d"],
    )
}

pub fn min_lookback(params: &[f64]) -> usize {
    int_param(params, 0, DEFAULT_K) + int_param(params, 1, DEFAULT_D) - 1
}

pub fn build(params: &[f64]) -> Box<dyn RollingIndicator> {
    Box::new(Stochastic::new(
        int_param(params, 0, DEFAULT_K),
        int_param(params, 1, DEFAULT_D),
    ))
}
