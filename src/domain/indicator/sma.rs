//! Simple Moving Average: mean of the last n closes.

use super::{IndicatorDescriptor, IndicatorValue, ParamSpec, RollingIndicator, int_param};
use crate::domain::indicator_helpers::RollingWindow;
use crate::domain::ohlcv::Bar;

pub const DEFAULT_PERIOD: usize = 20;

pub struct Sma {
    window: RollingWindow,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Sma {
            window: RollingWindow::new(period),
        }
    }
}

impl RollingIndicator for Sma {
    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        self.window.push(bar.close);
        self.window
            .is_full()
            .then(|| IndicatorValue::Simple(self.window.mean()))
    }
}

pub fn descriptor() -> IndicatorDescriptor {
    IndicatorDescriptor::new(
        "SMA",
        "Simple moving average of close",
        vec![ParamSpec::integer("period", DEFAULT_PERIOD, 1)],
        &["value"],
    )
}

pub fn min_lookback(params: &[f64]) -> usize {
    int_param(params, 0, DEFAULT_PERIOD)
}

pub fn build(params: &[f64]) -> Box<dyn RollingIndicator> {
    Box::new(Sma::new(int_param(params, 0, DEFAULT_PERIOD)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::*;

    #[test]
    fn sma_warmup_and_values() {
        let bars = make_bars(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let out = run(&mut Sma::new(3), &bars);
        assert!(out[0].is_none());
        assert!(out[1].is_none());
        assert!((simple(&out[2]) - 2.0).abs() < 1e-12);
        assert!((simple(&out[3]) - 3.0).abs() < 1e-12);
        assert!((simple(&out[4]) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn sma_period_1_is_close() {
        let bars = make_bars(&[7.0, 9.0]);
        let out = run(&mut Sma::new(1), &bars);
        assert!((simple(&out[1]) - 9.0).abs() < f64::EPSILON);
    }
}
