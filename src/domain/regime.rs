//! Market regime classification.
//!
//! A rolling window over closes, volumes and bar ranges labels each bar as
//! trending, volatile or sideways. Labels feed per-regime trade statistics
//! and the optional "no entries in a volatile regime" switch.

use serde::Serialize;
use std::fmt;

use crate::domain::indicator_helpers::RollingWindow;
use crate::domain::ohlcv::Bar;

pub const DEFAULT_LOOKBACK: usize = 50;

const VOL_HIGH: f64 = 0.02;
const VOL_LOW: f64 = 0.005;
const VOLUME_Z_THRESHOLD: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Regime {
    Trend,
    Volatile,
    #[default]
    Sideways,
}

impl Regime {
    pub const ALL: [Regime; 3] = [Regime::Trend, Regime::Volatile, Regime::Sideways];

    pub fn as_str(self) -> &'static str {
        match self {
            Regime::Trend => "TREND",
            Regime::Volatile => "VOLATILE",
            Regime::Sideways => "SIDEWAYS",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incremental regime classifier, O(1) per bar.
#[derive(Debug, Clone)]
pub struct RegimeDetector {
    lookback: usize,
    bars_seen: usize,
    prev_close: Option<f64>,
    returns: RollingWindow,
    volumes: RollingWindow,
    ranges: RollingWindow,
    current: Regime,
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKBACK)
    }
}

impl RegimeDetector {
    pub fn new(lookback: usize) -> Self {
        let lookback = lookback.max(2);
        RegimeDetector {
            lookback,
            bars_seen: 0,
            prev_close: None,
            returns: RollingWindow::new(lookback - 1),
            volumes: RollingWindow::new(lookback),
            ranges: RollingWindow::new(lookback),
            current: Regime::Sideways,
        }
    }

    pub fn current(&self) -> Regime {
        self.current
    }

    /// Feed the next bar and return the regime as of that bar.
    pub fn update(&mut self, bar: &Bar) -> Regime {
        self.bars_seen += 1;
        if let Some(prev) = self.prev_close.replace(bar.close) {
            if prev > 0.0 && bar.close > 0.0 {
                self.returns.push((bar.close / prev).ln());
            }
        }
        self.volumes.push(bar.volume);
        self.ranges.push(bar.range());

        if self.bars_seen < self.lookback / 2 {
            return Regime::Sideways;
        }
        self.current = self.classify();
        self.current
    }

    fn classify(&self) -> Regime {
        let vol = if self.returns.is_empty() {
            0.0
        } else {
            self.returns.variance().sqrt()
        };
        if vol > VOL_HIGH && self.volume_zscore().abs() > VOLUME_Z_THRESHOLD {
            return Regime::Volatile;
        }
        if vol > VOL_LOW && self.ranges.mean() > 0.0 {
            return Regime::Trend;
        }
        Regime::Sideways
    }

    fn volume_zscore(&self) -> f64 {
        if self.volumes.len() < 2 {
            return 0.0;
        }
        let std = self.volumes.variance().sqrt();
        match self.volumes.newest() {
            Some(current) if std > 0.0 => (current - self.volumes.mean()) / std,
            _ => 0.0,
        }
    }
}
