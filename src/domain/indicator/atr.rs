//! Average True Range.
//!
//! The first bar's true range is high - low. The first ATR is the mean of the
//! first n true ranges, then Wilder smoothing: ATR = (prev * (n-1) + TR) / n.

use super::{IndicatorDescriptor, IndicatorValue, ParamSpec, RollingIndicator, int_param};
use crate::domain::ohlcv::Bar;

pub const DEFAULT_PERIOD: usize = 14;

pub struct Atr {
    period: usize,
    count: usize,
    prev_close: Option<f64>,
    atr: f64,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Atr {
            period: period.max(1),
            count: 0,
            prev_close: None,
            atr: 0.0,
        }
    }
}

impl RollingIndicator for Atr {
    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        let tr = match self.prev_close.replace(bar.close) {
            Some(prev) => bar.true_range(prev),
            None => bar.range(),
        };
        self.count += 1;
        let n = self.period as f64;
        if self.count < self.period {
            self.atr += tr;
            return None;
        }
        if self.count == self.period {
            self.atr = (self.atr + tr) / n;
        } else {
            self.atr = (self.atr * (n - 1.0) + tr) / n;
        }
        Some(IndicatorValue::Simple(self.atr))
    }
}

pub fn descriptor() -> IndicatorDescriptor {
    IndicatorDescriptor::new(
        "ATR",
        "Average true range with Wilder smoothing",
        vec![ParamSpec::integer("period", DEFAULT_PERIOD, 1)],
        &["value"],
    )
}

pub fn min_lookback(params: &[f64]) -> usize {
    int_param(params, 0, DEFAULT_PERIOD)
}

pub fn build(params: &[f64]) -> Box<dyn RollingIndicator> {
    Box::new(Atr::new(int_param(params, 0, DEFAULT_PERIOD)))
}
