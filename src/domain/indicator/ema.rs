//! Exponential Moving Average indicator.
//!
//! k = 2/(n+1), seed with first SMA, then EMA[i] = C[i]*k + EMA[i-1]*(1-k).
//! Warmup: first (n-1) bars produce nothing.

use super::{IndicatorDescriptor, IndicatorValue, ParamSpec, RollingIndicator, int_param};
use crate::domain::ohlcv::Bar;

pub const DEFAULT_PERIOD: usize = 20;

/// SMA-seeded EMA over an arbitrary value stream. Reused by MACD for both
/// the price averages and the signal line.
#[derive(Debug, Clone)]
pub struct EmaCore {
    period: usize,
    k: f64,
    count: usize,
    seed_sum: f64,
    ema: f64,
}

impl EmaCore {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        EmaCore {
            period,
            k: 2.0 / (period as f64 + 1.0),
            count: 0,
            seed_sum: 0.0,
            ema: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) -> Option<f64> {
        self.count += 1;
        if self.count < self.period {
            self.seed_sum += value;
            return None;
        }
        if self.count == self.period {
            self.seed_sum += value;
            self.ema = self.seed_sum / self.period as f64;
        } else {
            self.ema = value * self.k + self.ema * (1.0 - self.k);
        }
        Some(self.ema)
    }
}

pub struct Ema {
    core: EmaCore,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Ema {
            core: EmaCore::new(period),
        }
    }
}

impl RollingIndicator for Ema {
    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        self.core.push(bar.close).map(IndicatorValue::Simple)
    }
}

pub fn descriptor() -> IndicatorDescriptor {
    IndicatorDescriptor::new(
        "EMA",
        "Exponential moving average of close, seeded with the SMA",
        vec![ParamSpec::integer("period", DEFAULT_PERIOD, 1)],
        &["value"],
    )
}

pub fn min_lookback(params: &[f64]) -> usize {
    int_param(params, 0, DEFAULT_PERIOD)
}

pub fn build(params: &[f64]) -> Box<dyn RollingIndicator> {
    Box::new(Ema::new(int_param(params, 0, DEFAULT_PERIOD)))
}
