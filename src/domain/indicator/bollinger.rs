//! Bollinger Bands.
//!
//! Middle = SMA(n), Upper = Middle + k * stddev, Lower = Middle - k * stddev,
//! where stddev is the population standard deviation over the same window.

use super::{
    IndicatorDescriptor, IndicatorValue, ParamSpec, RollingIndicator, int_param, num_param,
};
use crate::domain::indicator_helpers::RollingWindow;
use crate::domain::ohlcv::Bar;

pub const DEFAULT_PERIOD: usize = 20;
pub const DEFAULT_MULT: f64 = 2.0;

pub struct Bollinger {
    window: RollingWindow,
    mult: f64,
}

impl Bollinger {
    pub fn new(period: usize, mult: f64) -> Self {
        Bollinger {
            window: RollingWindow::new(period),
            mult,
        }
    }
}

impl RollingIndicator for Bollinger {
    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        self.window.push(bar.close);
        if !self.window.is_full() {
            return None;
        }
        let middle = self.window.mean();
        let band = self.mult * self.window.variance().sqrt();
        Some(IndicatorValue::Bollinger {
            upper: middle + band,
            middle,
            lower: middle - band,
        })
    }
}

pub fn descriptor() -> IndicatorDescriptor {
    IndicatorDescriptor::new(
        "BOLLINGER",
        "Bollinger bands around the SMA of close",
        vec![
            ParamSpec::integer("period", DEFAULT_PERIOD, 1),
            ParamSpec::number("mult", DEFAULT_MULT, 0.0),
        ],
        &["upper", "middle", "lower"],
    )
}

pub fn min_lookback(params: &[f64]) -> usize {
    int_param(params, 0, DEFAULT_PERIOD)
}

pub fn build(params: &[f64]) -> Box<dyn RollingIndicator> {
    Box::new(Bollinger::new(
        int_param(params, 0, DEFAULT_PERIOD),
        num_param(params, 1, DEFAULT_MULT),
    ))
}
