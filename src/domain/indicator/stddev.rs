//! Rolling population standard deviation of close.

use super::{IndicatorDescriptor, IndicatorValue, ParamSpec, RollingIndicator, int_param};
use crate::domain::indicator_helpers::RollingWindow;
use crate::domain::ohlcv::Bar;

pub const DEFAULT_PERIOD: usize = 20;

pub struct Stddev {
    window: RollingWindow,
}

impl Stddev {
    pub fn new(period: usize) -> Self {
        Stddev {
            window: RollingWindow::new(period),
        }
    }
}

impl RollingIndicator for Stddev {
    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        self.window.push(bar.close);
        self.window
            .is_full()
            .then(|| IndicatorValue::Simple(self.window.variance().sqrt()))
    }
}

pub fn descriptor() -> IndicatorDescriptor {
    IndicatorDescriptor::new(
        "STDDEV",
        "Population standard deviation of close",
        vec![ParamSpec::integer("period", DEFAULT_PERIOD, 1)],
        &["value"],
    )
}

pub fn min_lookback(params: &[f64]) -> usize {
    int_param(params, 0, DEFAULT_PERIOD)
}

pub fn build(params: &[f64]) -> Box<dyn RollingIndicator> {
    Box::new(Stddev::new(int_param(params, 0, DEFAULT_PERIOD)))
}
