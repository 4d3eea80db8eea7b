//! Time series store: validated, ordered OHLCV bars.
//!
//! Accepts CSV text with a header naming `open, high, low, close, volume` and
//! one timestamp column (`timestamp`, `date`, `datetime` or `time`). Column
//! order is free and names are case-insensitive; extra columns are ignored.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;

use super::error::FluxbackError;
use super::ohlcv::Bar;

const TIMESTAMP_ALIASES: [&str; 4] = ["timestamp", "date", "datetime", "time"];

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    bars: Vec<Bar>,
}

/// Summary of a loaded series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesStats {
    pub bars: usize,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub first_close: f64,
    pub last_close: f64,
    pub lowest_low: f64,
    pub highest_high: f64,
    /// Mean close-to-close simple return.
    pub return_mean: f64,
    /// Sample standard deviation of those returns, 0 with fewer than two.
    pub return_stddev: f64,
}

struct Columns {
    timestamp: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: usize,
}

impl TimeSeries {
    /// Parse raw CSV text into a validated series.
    pub fn load(raw: &str) -> Result<Self, FluxbackError> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(raw.as_bytes());

        let headers = rdr
            .headers()
            .map_err(|e| FluxbackError::data(1, format!("unreadable header: {e}")))?
            .clone();
        let columns = locate_columns(&headers)?;

        let mut bars = Vec::new();
        for result in rdr.records() {
            let record = result.map_err(|e| {
                let line = e.position().map(|p| p.line() as usize).unwrap_or(0);
                FluxbackError::data(line, e.to_string())
            })?;
            let line = record.position().map(|p| p.line() as usize).unwrap_or(0);

            let field = |idx: usize| record.get(idx).unwrap_or("");
            let timestamp = parse_timestamp(field(columns.timestamp)).ok_or_else(|| {
                FluxbackError::data(
                    line,
                    format!("unrecognised timestamp '{}'", field(columns.timestamp)),
                )
            })?;

            let bar = Bar {
                timestamp,
                open: parse_number(field(columns.open), "open", line)?,
                high: parse_number(field(columns.high), "high", line)?,
                low: parse_number(field(columns.low), "low", line)?,
                close: parse_number(field(columns.close), "close", line)?,
                volume: parse_number(field(columns.volume), "volume", line)?,
            };

            validate_bar(&bar, line)?;
            if let Some(prev) = bars.last() {
                check_order(prev, &bar, line)?;
            }
            bars.push(bar);
        }

        if bars.is_empty() {
            return Err(FluxbackError::data(2, "no data rows"));
        }

        Ok(Self { bars })
    }

    /// Build a series from in-memory bars, enforcing the same invariants as
    /// [`TimeSeries::load`]. Line numbers in errors are 1-based bar positions.
    pub fn from_bars(bars: Vec<Bar>) -> Result<Self, FluxbackError> {
        if bars.is_empty() {
            return Err(FluxbackError::data(0, "no data rows"));
        }
        for (i, bar) in bars.iter().enumerate() {
            validate_bar(bar, i + 1)?;
            if i > 0 {
                check_order(&bars[i - 1], bar, i + 1)?;
            }
        }
        Ok(Self { bars })
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Bar> {
        self.bars.get(index)
    }

    pub fn stats(&self) -> Option<SeriesStats> {
        let first = self.bars.first()?;
        let last = self.bars.last()?;
        let returns: Vec<f64> = self
            .bars
            .windows(2)
            .map(|w| w[1].close / w[0].close - 1.0)
            .collect();
        let n = returns.len() as f64;
        let return_mean = if returns.is_empty() {
            0.0
        } else {
            returns.iter().sum::<f64>() / n
        };
        let return_stddev = if returns.len() < 2 {
            0.0
        } else {
            let ss: f64 = returns.iter().map(|r| (r - return_mean).powi(2)).sum();
            (ss / (n - 1.0)).sqrt()
        };
        Some(SeriesStats {
            bars: self.bars.len(),
            start: first.timestamp,
            end: last.timestamp,
            first_close: first.close,
            last_close: last.close,
            lowest_low: self.bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min),
            highest_high: self
                .bars
                .iter()
                .map(|b| b.high)
                .fold(f64::NEG_INFINITY, f64::max),
            return_mean,
            return_stddev,
        })
    }
}

fn locate_columns(headers: &csv::StringRecord) -> Result<Columns, FluxbackError> {
    let names: Vec<String> = headers.iter().map(|h| h.to_ascii_lowercase()).collect();
    let find = |name: &str| {
        names
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| FluxbackError::data(1, format!("missing column '{name}'")))
    };

    let timestamp = TIMESTAMP_ALIASES
        .iter()
        .find_map(|alias| names.iter().position(|h| h == alias))
        .ok_or_else(|| FluxbackError::data(1, "missing timestamp column"))?;

    Ok(Columns {
        timestamp,
        open: find("open")?,
        high: find("high")?,
        low: find("low")?,
        close: find("close")?,
        volume: find("volume")?,
    })
}

fn parse_number(raw: &str, column: &str, line: usize) -> Result<f64, FluxbackError> {
    let value: f64 = raw
        .parse()
        .map_err(|_| FluxbackError::data(line, format!("non-numeric {column} '{raw}'")))?;
    if !value.is_finite() {
        return Err(FluxbackError::data(
            line,
            format!("non-finite {column} '{raw}'"),
        ));
    }
    Ok(value)
}

/// Parse the timestamp formats accepted in data files.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        let secs: i64 = raw.parse().ok()?;
        return DateTime::from_timestamp(secs, 0).map(|dt| dt.naive_utc());
    }
    None
}

fn validate_bar(bar: &Bar, line: usize) -> Result<(), FluxbackError> {
    let prices = [bar.open, bar.high, bar.low, bar.close, bar.volume];
    if prices.iter().any(|v| !v.is_finite()) {
        return Err(FluxbackError::data(line, "non-finite value"));
    }
    if let Some(price) = [bar.open, bar.high, bar.low, bar.close]
        .into_iter()
        .find(|p| *p <= 0.0)
    {
        return Err(FluxbackError::data(
            line,
            format!("price {price} is not positive"),
        ));
    }
    if bar.volume < 0.0 {
        return Err(FluxbackError::data(line, "negative volume"));
    }
    if bar.high < bar.open.max(bar.close) {
        return Err(FluxbackError::data(
            line,
            format!("high {} below open/close", bar.high),
        ));
    }
    if bar.low > bar.open.min(bar.close) {
        return Err(FluxbackError::data(
            line,
            format!("low {} above open/close", bar.low),
        ));
    }
    Ok(())
}

fn check_order(prev: &Bar, bar: &Bar, line: usize) -> Result<(), FluxbackError> {
    if bar.timestamp == prev.timestamp {
        return Err(FluxbackError::data(
            line,
            format!("duplicate timestamp {}", bar.timestamp),
        ));
    }
    if bar.timestamp < prev.timestamp {
        return Err(FluxbackError::data(
            line,
            format!(
                "timestamp {} is earlier than previous {}",
                bar.timestamp, prev.timestamp
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ErrorKind;

    const HEADER: &str = "timestamp,open,high,low,close,volume\n";

    fn expect_line(raw: &str) -> usize {
        match TimeSeries::load(raw) {
            Err(FluxbackError::DataFormat { line, .. }) => line,
            other => panic!("expected DataFormat, got {other:?}"),
        }
    }

    #[test]
    fn loads_basic_file() {
        let raw = format!(
            "{HEADER}2024-01-01,10,11,9,10.5,1000\n2024-01-02,10.5,12,10,11,1500\n"
        );
        let series = TimeSeries::load(&raw).unwrap();
        assert_eq!(series.len(), 2);
        assert!((series.bars()[1].close - 11.0).abs() < f64::EPSILON);
    }

    #[test]
    fn header_is_case_insensitive_and_reorderable() {
        let raw = "Close, Volume ,DATE,Open,High,Low,extra\n10,5,2024-01-01,10,10,10,x\n";
        let series = TimeSeries::load(raw).unwrap();
        assert_eq!(series.len(), 1);
        assert!((series.bars()[0].volume - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn accepts_several_timestamp_formats() {
        for ts in [
            "2024-01-01T09:30:00",
            "2024-01-01 09:30:00.250",
            "2024-01-01T09:30",
            "2024-01-01T09:30:00Z",
            "2024-01-01T19:30:00+10:00",
            "1704101400",
        ] {
            assert!(parse_timestamp(ts).is_some(), "failed on {ts}");
        }
        let midnight = parse_timestamp("2024-01-01").unwrap();
        assert_eq!(midnight.to_string(), "2024-01-01 00:00:00");
    }

    #[test]
    fn rfc3339_offset_normalised_to_utc() {
        let a = parse_timestamp("2024-01-01T19:30:00+10:00").unwrap();
        let b = parse_timestamp("2024-01-01T09:30:00").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_column_rejected() {
        let raw = "timestamp,open,high,low,close\n2024-01-01,1,1,1,1\n";
        assert_eq!(expect_line(raw), 1);
    }

    #[test]
    fn non_numeric_value_reports_line() {
        let raw = format!("{HEADER}2024-01-01,1,1,1,1,1\n2024-01-02,1,abc,1,1,1\n");
        assert_eq!(expect_line(&raw), 3);
    }

    #[test]
    fn duplicate_timestamp_rejected() {
        let raw = format!("{HEADER}2024-01-01,1,1,1,1,1\n2024-01-01,1,1,1,1,1\n");
        assert_eq!(expect_line(&raw), 3);
    }

    #[test]
    fn decreasing_timestamp_rejected() {
        let raw = format!("{HEADER}2024-01-02,1,1,1,1,1\n2024-01-01,1,1,1,1,1\n");
        assert_eq!(expect_line(&raw), 3);
    }

    #[test]
    fn high_below_close_rejected() {
        let raw = format!("{HEADER}2024-01-01,10,10.5,9,11,1\n");
        assert_eq!(expect_line(&raw), 2);
    }

    #[test]
    fn negative_volume_rejected() {
        let raw = format!("{HEADER}2024-01-01,10,10,10,10,-1\n");
        assert_eq!(expect_line(&raw), 2);
    }

    #[test]
    fn non_positive_prices_rejected() {
        for row in [
            "2024-01-01,0,1,0,1,1",
            "2024-01-01,1,1,1,0,1",
            "2024-01-01,-2,-1,-3,-2,1",
        ] {
            let raw = format!("{HEADER}2023-12-31,1,1,1,1,1\n{row}\n");
            assert_eq!(expect_line(&raw), 3, "{row}");
        }

        let ts = parse_timestamp("2024-01-01").unwrap();
        let bar = Bar {
            timestamp: ts,
            open: 1.0,
            high: 1.0,
            low: 0.0,
            close: 1.0,
            volume: 1.0,
        };
        let err = TimeSeries::from_bars(vec![bar]).unwrap_err();
        assert!(err.to_string().contains("not positive"));
    }

    #[test]
    fn stats_summarise_returns() {
        let raw = format!(
            "{HEADER}2024-01-01,100,101,99,100,10\n2024-01-02,100,111,100,110,10\n2024-01-03,110,110,98,99,10\n"
        );
        let stats = TimeSeries::load(&raw).unwrap().stats().unwrap();
        assert_eq!(stats.bars, 3);
        assert_eq!(stats.start, parse_timestamp("2024-01-01").unwrap());
        assert_eq!(stats.end, parse_timestamp("2024-01-03").unwrap());
        assert_eq!(stats.lowest_low, 98.0);
        assert_eq!(stats.highest_high, 111.0);
        // returns +10% and -10%
        assert!(stats.return_mean.abs() < 1e-12);
        assert!((stats.return_stddev - 0.02f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn stats_of_single_bar() {
        let raw = format!("{HEADER}2024-01-01,5,5,5,5,0\n");
        let stats = TimeSeries::load(&raw).unwrap().stats().unwrap();
        assert_eq!(stats.bars, 1);
        assert_eq!(stats.start, stats.end);
        assert_eq!(stats.return_mean, 0.0);
        assert_eq!(stats.return_stddev, 0.0);
    }

    #[test]
    fn empty_body_rejected() {
        let err = TimeSeries::load(HEADER).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataFormat);
    }

    #[test]
    fn from_bars_checks_order() {
        let ts = parse_timestamp("2024-01-01").unwrap();
        let bar = Bar {
            timestamp: ts,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 0.0,
        };
        let err = TimeSeries::from_bars(vec![bar.clone(), bar]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataFormat);
    }
}
