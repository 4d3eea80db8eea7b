//! Realized volatility: sample standard deviation of log returns over the
//! last n returns, annualized by sqrt(annualization). Needs n + 1 bars.

use super::{
    IndicatorDescriptor, IndicatorValue, ParamSpec, RollingIndicator, int_param, num_param,
};
use crate::domain::indicator_helpers::RollingWindow;
use crate::domain::ohlcv::Bar;

pub const DEFAULT_PERIOD: usize = 20;
pub const DEFAULT_ANNUALIZATION: f64 = 252.0;
/// One-minute bars over a trading year (390 minutes x 252 days).
pub const INTRADAY_ANNUALIZATION: f64 = 98_280.0;

pub struct RealizedVol {
    prev_close: Option<f64>,
    returns: RollingWindow,
    scale: f64,
}

impl RealizedVol {
    pub fn new(period: usize, annualization: f64) -> Self {
        RealizedVol {
            prev_close: None,
            returns: RollingWindow::new(period),
            scale: annualization.max(0.0).sqrt(),
        }
    }
}

impl RollingIndicator for RealizedVol {
    fn update(&mut self, bar: &Bar) -> Option<IndicatorValue> {
        let prev = self.prev_close.replace(bar.close)?;
        let log_return = if prev > 0.0 && bar.close > 0.0 {
            (bar.close / prev).ln()
        } else {
            0.0
        };
        self.returns.push(log_return);
        self.returns
            .is_full()
            .then(|| IndicatorValue::Simple(self.returns.sample_variance().sqrt() * self.scale))
    }
}

pub fn descriptor() -> IndicatorDescriptor {
    IndicatorDescriptor::new(
        "RVOL",
        "Annualized realized volatility of log returns",
        vec![
            ParamSpec::integer("period", DEFAULT_PERIOD, 2),
            ParamSpec::number("annualization", DEFAULT_ANNUALIZATION, 1.0),
        ],
        &["value"],
    )
}

pub fn min_lookback(params: &[f64]) -> usize {
    int_param(params, 0, DEFAULT_PERIOD) + 1
}

pub fn build(params: &[f64]) -> Box<dyn RollingIndicator> {
    Box::new(RealizedVol::new(
        int_param(params, 0, DEFAULT_PERIOD),
        num_param(params, 1, DEFAULT_ANNUALIZATION),
    ))
}
