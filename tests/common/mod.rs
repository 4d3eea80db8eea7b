#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use fluxback::domain::backtest::BacktestConfig;
use fluxback::domain::error::FluxbackError;
use fluxback::domain::indicator::IndicatorRegistry;
pub use fluxback::domain::ohlcv::Bar;
use fluxback::domain::strategy::Strategy;
use fluxback::domain::timeseries::TimeSeries;
use fluxback::ports::data_port::DataPort;
use std::collections::HashMap;
use std::io::Write;

pub struct MockDataPort {
    pub data: HashMap<String, Vec<Bar>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_series(&self, symbol: &str) -> Result<TimeSeries, FluxbackError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(FluxbackError::DataFormat {
                line: 0,
                reason: reason.clone(),
            });
        }
        TimeSeries::from_bars(self.data.get(symbol).cloned().unwrap_or_default())
    }

    fn list_symbols(&self) -> Result<Vec<String>, FluxbackError> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn day(i: usize) -> NaiveDateTime {
    date(2024, 1, 1).and_hms_opt(0, 0, 0).unwrap() + chrono::Duration::days(i as i64)
}

pub fn ohlc_bar(i: usize, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
    Bar {
        timestamp: day(i),
        open,
        high,
        low,
        close,
        volume,
    }
}

/// Flat bars: open = high = low = close.
pub fn make_bar(i: usize, close: f64) -> Bar {
    ohlc_bar(i, close, close, close, close, 1000.0)
}

pub fn make_series(closes: &[f64]) -> TimeSeries {
    TimeSeries::from_bars(closes.iter().enumerate().map(|(i, &c)| make_bar(i, c)).collect())
        .unwrap()
}

/// Deterministic wavy series with enough bars for the slower indicators.
pub fn wave_series(n: usize) -> TimeSeries {
    let bars = (0..n)
        .map(|i| {
            let x = i as f64;
            let close = 100.0 + (x * 0.21).sin() * 8.0 + (x * 0.05).cos() * 4.0 + x * 0.03;
            let open = close - (x * 0.7).sin();
            let high = open.max(close) + 0.5;
            let low = open.min(close) - 0.5;
            ohlc_bar(i, open, high, low, close, 1000.0 + (x * 0.3).sin().abs() * 500.0)
        })
        .collect();
    TimeSeries::from_bars(bars).unwrap()
}

pub fn to_csv(series: &TimeSeries) -> String {
    let mut out = String::from("timestamp,open,high,low,close,volume\n");
    for b in series.bars() {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            b.timestamp.format("%Y-%m-%d %H:%M:%S"),
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume
        ));
    }
    out
}

pub fn registry() -> IndicatorRegistry {
    IndicatorRegistry::with_builtins()
}

pub fn parse_strategy(yaml: &str) -> Strategy {
    Strategy::parse(yaml, &registry()).unwrap()
}

pub fn sample_config() -> BacktestConfig {
    BacktestConfig::default()
}

pub const LAG_STRATEGY: &str = r#"
strategy:
  name: Lag Momentum
  symbol: TEST
rules:
  - type: entry
    expression: "ABOVE(close, LAG(1))"
  - type: exit
    expression: "BELOW(close, LAG(1))"
"#;

pub const SMA_CROSS: &str = r#"
strategy:
  name: SMA Cross
indicators:
  - { id: fast, name: SMA, params: { period: 5 } }
  - { id: slow, name: SMA, params: { period: 20 } }
rules:
  - type: entry
    expression: "CROSS_ABOVE(fast, slow)"
  - type: exit
    expression: "CROSS_BELOW(fast, slow)"
risk:
  sizing: { fraction: 0.5 }
"#;

pub fn write_temp(content: &str, suffix: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}
