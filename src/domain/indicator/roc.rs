//! Rate of Change indicator.
//!
//! ROC = ((close - close[n bars ago]) / close[n bars ago]) * 100.
//! Needs n + 1 bars. A zero reference price yields 0.

use super::{IndicatorDescriptor, IndicatorValue, ParamSpec, RollingIndicator, int_param};
use crate::domain::indicator_helpers::RollingWindow;
use crate::domain::ohlcv::Bar;

pub const DEFAULT_PERIOD: usize = 10;

pub struct Roc {
    window: RollingWindow,
}

impl Roc {
    pub fn new(period: usize) -> Self {
        Roc {
            window: RollingWindow::new(period.max(1) + 1),
        }
    }
}

impl RollingIndicator for Roc {
    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        self.window.push(bar.close);
        if !self.window.is_full() {
            return None;
        }
        let past = self.window.oldest()?;
        let roc = if past == 0.0 {
            0.0
        } else {
            (bar.close - past) / past * 100.0
        };
        Some(IndicatorValue::Simple(roc))
    }
}

pub fn descriptor() -> IndicatorDescriptor {
    IndicatorDescriptor::new(
        "ROC",
        "Percent change of close over n bars",
        vec![ParamSpec::integer("period", DEFAULT_PERIOD, 1)],
        &["value"],
    )
}

pub fn min_lookback(params: &[f64]) -> usize {
    int_param(params, 0, DEFAULT_PERIOD) + 1
}

pub fn build(params: &[f64]) -> Box<dyn RollingIndicator> {
    Box::new(Roc::new(int_param(params, 0, DEFAULT_PERIOD)))
}
