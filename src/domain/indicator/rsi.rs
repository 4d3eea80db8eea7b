//! RSI (Relative Strength Index) indicator.
//!
//! Uses Wilder's smoothing for average gain/loss calculation:
//! - First average: simple mean of gains/losses over the first n changes
//! - Subsequent: avg = (prev_avg * (n-1) + current) / n
//!
//! Formula: RSI = 100 - (100 / (1 + avg_gain / avg_loss))
//! If avg_loss == 0: RSI = 100
//!
//! Needs n + 1 bars (n price changes) before the first value.

use super::{IndicatorDescriptor, IndicatorValue, ParamSpec, RollingIndicator, int_param};
use crate::domain::ohlcv::Bar;

pub const DEFAULT_PERIOD: usize = 14;

pub struct Rsi {
    period: usize,
    prev_close: Option<f64>,
    changes: usize,
    avg_gain: f64,
    avg_loss: f64,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Rsi {
            period: period.max(1),
            prev_close: None,
            changes: 0,
            avg_gain: 0.0,
            avg_loss: 0.0,
        }
    }

    fn value(&self) -> f64 {
        if self.avg_loss == 0.0 {
            100.0
        } else {
            100.0 - (100.0 / (1.0 + self.avg_gain / self.avg_loss))
        }
    }
}

impl RollingIndicator for Rsi {
    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        let prev = self.prev_close.replace(bar.close)?;
        let change = bar.close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        let n = self.period as f64;

        self.changes += 1;
        if self.changes <= self.period {
            // accumulate the seed sums, then convert to means on the nth change
            self.avg_gain += gain;
            self.avg_loss += loss;
            if self.changes < self.period {
                return None;
            }
            self.avg_gain /= n;
            self.avg_loss /= n;
        } else {
            self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
            self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
        }
        Some(IndicatorValue::Simple(self.value()))
    }
}

pub fn descriptor() -> IndicatorDescriptor {
    IndicatorDescriptor::new(
        "RSI",
        "Relative strength index with Wilder smoothing",
        vec![ParamSpec::integer("period", DEFAULT_PERIOD, 1)],
        &["value"],
    )
}

pub fn min_lookback(params: &[f64]) -> usize {
    int_param(params, 0, DEFAULT_PERIOD) + 1
}

pub fn build(params: &[f64]) -> Box<dyn RollingIndicator> {
    Box::new(Rsi::new(int_param(params, 0, DEFAULT_PERIOD)))
}
