//! Close from n bars ago. `LAG(1)` is the previous close.

use super::{IndicatorDescriptor, IndicatorValue, ParamSpec, RollingIndicator, int_param};
use crate::domain::indicator_helpers::RollingWindow;
use crate::domain::ohlcv::Bar;

pub const DEFAULT_PERIOD: usize = 1;

pub struct Lag {
    window: RollingWindow,
}

impl Lag {
    pub fn new(period: usize) -> Self {
        Lag {
            window: RollingWindow::new(period.max(1) + 1),
        }
    }
}

impl RollingIndicator for Lag {
    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        self.window.push(bar.close);
        if self.window.is_full() {
            self.window.oldest().map(IndicatorValue::Simple)
        } else {
            None
        }
    }
}

pub fn descriptor() -> IndicatorDescriptor {
    IndicatorDescriptor::new(
        "LAG",
        "Close price n bars ago",
        vec![ParamSpec::integer("period", DEFAULT_PERIOD, 1)],
        &["value"],
    )
}

pub fn min_lookback(params: &[f64]) -> usize {
    int_param(params, 0, DEFAULT_PERIOD) + 1
}

pub fn build(params: &[f64]) -> Box<dyn RollingIndicator> {
    Box::new(Lag::new(int_param(params, 0, DEFAULT_PERIOD)))
}
