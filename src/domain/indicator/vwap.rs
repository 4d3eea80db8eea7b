//! Rolling volume-weighted average price over the last n bars.
//!
//! VWAP = sum(close * volume) / sum(volume). With zero volume in the window
//! the current close is returned.

use super::{IndicatorDescriptor, IndicatorValue, ParamSpec, RollingIndicator, int_param};
use crate::domain::indicator_helpers::RollingWindow;
use crate::domain::ohlcv::Bar;

pub const DEFAULT_PERIOD: usize = 20;

pub struct Vwap {
    notional: RollingWindow,
    volume: RollingWindow,
}

impl Vwap {
    pub fn new(period: usize) -> Self {
        Vwap {
            notional: RollingWindow::new(period),
            volume: RollingWindow::new(period),
        }
    }
}

impl RollingIndicator for Vwap {
    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        self.notional.push(bar.close * bar.volume);
        self.volume.push(bar.volume);
        if !self.volume.is_full() {
            return None;
        }
        let vol = self.volume.sum();
        let vwap = if vol > 0.0 {
            self.notional.sum() / vol
        } else {
            bar.close
        };
        Some(IndicatorValue::Simple(vwap))
    }
}

pub fn descriptor() -> IndicatorDescriptor {
    IndicatorDescriptor::new(
        "VWAP",
        "Rolling volume-weighted average close",
        vec![ParamSpec::integer("period", DEFAULT_PERIOD, 1)],
        &["value"],
    )
}

pub fn min_lookback(params: &[f64]) -> usize {
    int_param(params, 0, DEFAULT_PERIOD)
}

pub fn build(params: &[f64]) -> Box<dyn RollingIndicator> {
    Box::new(Vwap::new(int_param(params, 0, DEFAULT_PERIOD)))
}
