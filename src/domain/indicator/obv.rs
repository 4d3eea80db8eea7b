//! On-Balance Volume.
//!
//! Starts at 0 on the first bar; adds volume on an up close, subtracts it on a
//! down close, unchanged otherwise.

use super::{IndicatorDescriptor, IndicatorValue, RollingIndicator};
use crate::domain::ohlcv::Bar;

#[derive(Default)]
pub struct Obv {
    prev_close: Option<f64>,
    obv: f64,
}

impl RollingIndicator for Obv {
    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        if let Some(prev) = self.prev_close.replace(bar.close) {
            if bar.close > prev {
                self.obv += bar.volume;
            } else if bar.close < prev {
                self.obv -= bar.volume;
            }
        }
        Some(IndicatorValue::Simple(self.obv))
    }
}

pub fn descriptor() -> IndicatorDescriptor {
    IndicatorDescriptor::new("OBV", "On-balance volume", vec![], &["value"])
}

pub fn min_lookback(_params: &[f64]) -> usize {
    1
}

pub fn build(_params: &[f64]) -> Box<dyn RollingIndicator> {
    Box::new(Obv::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::*;

    #[test]
    fn obv_accumulates() {
        let bars = vec![
            bar(0, 10.0, 10.0, 10.0, 10.0, 100.0),
            bar(1, 11.0, 11.0, 11.0, 11.0, 200.0),
            bar(2, 10.5, 10.5, 10.5, 10.5, 50.0),
            bar(3, 10.5, 10.5, 10.5, 10.5, 999.0),
        ];
        let out = run(&mut Obv::default(), &bars);
        assert!(simple(&out[0]).abs() < f64::EPSILON);
        assert!((simple(&out[1]) - 200.0).abs() < f64::EPSILON);
        assert!((simple(&out[2]) - 150.0).abs() < f64::EPSILON);
        assert!((simple(&out[3]) - 150.0).abs() < f64::EPSILON);
    }
}
