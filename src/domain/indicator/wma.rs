//! Weighted Moving Average indicator.
//!
//! Linear weights 1..n, newest bar weighted n. Denominator n(n+1)/2.
//! After the window fills, the weighted sum updates as W' = W - S + n*x.

use super::{IndicatorDescriptor, IndicatorValue, ParamSpec, RollingIndicator, int_param};
use crate::domain::indicator_helpers::RollingWindow;
use crate::domain::ohlcv::Bar;

pub const DEFAULT_PERIOD: usize = 20;

pub struct Wma {
    window: RollingWindow,
    weighted_sum: f64,
    denominator: f64,
}

impl Wma {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Wma {
            window: RollingWindow::new(period),
            weighted_sum: 0.0,
            denominator: (period * (period + 1)) as f64 / 2.0,
        }
    }
}

impl RollingIndicator for Wma {
    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        let n = self.window.capacity() as f64;
        if self.window.is_full() {
            let prev_sum = self.window.sum();
            self.window.push(bar.close);
            self.weighted_sum = self.weighted_sum - prev_sum + n * bar.close;
        } else {
            self.window.push(bar.close);
            if self.window.is_full() {
                self.weighted_sum = self
                    .window
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (i + 1) as f64 * v)
                    .sum();
            }
        }
        self.window
            .is_full()
            .then(|| IndicatorValue::Simple(self.weighted_sum / self.denominator))
    }
}

pub fn descriptor() -> IndicatorDescriptor {
    IndicatorDescriptor::new(
        "WMA",
        "Linearly weighted moving average of close",
        vec![ParamSpec::integer("period", DEFAULT_PERIOD, 1)],
        &["value"],
    )
}

pub fn min_lookback(params: &[f64]) -> usize {
    int_param(params, 0, DEFAULT_PERIOD)
}

pub fn build(params: &[f64]) -> Box<dyn RollingIndicator> {
    Box::new(Wma::new(int_param(params, 0, DEFAULT_PERIOD)))
}
