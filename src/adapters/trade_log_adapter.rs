//! Closed-trade log as CSV, one row per round trip.

use std::path::Path;

use serde::Serialize;

use crate::domain::backtest::BacktestResult;
use crate::domain::error::FluxbackError;
use crate::domain::position::{ClosedTrade, Side};
use crate::domain::regime::Regime;
use crate::ports::report_port::ReportPort;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Serialize)]
struct TradeRow {
    entry_timestamp: String,
    exit_timestamp: String,
    side: Side,
    entry_price: f64,
    exit_price: f64,
    size: f64,
    pnl: f64,
    pnl_pct: f64,
    entry_regime: Regime,
    exit_regime: Regime,
    is_win: bool,
    exit_reason: String,
}

impl From<&ClosedTrade> for TradeRow {
    fn from(t: &ClosedTrade) -> Self {
        TradeRow {
            entry_timestamp: t.entry_time.format(TIMESTAMP_FORMAT).to_string(),
            exit_timestamp: t.exit_time.format(TIMESTAMP_FORMAT).to_string(),
            side: t.side,
            entry_price: t.entry_price,
            exit_price: t.exit_price,
            size: t.quantity,
            pnl: t.pnl,
            pnl_pct: t.return_pct,
            entry_regime: t.entry_regime,
            exit_regime: t.exit_regime,
            is_win: t.is_win(),
            exit_reason: t.exit_reason.to_string(),
        }
    }
}

pub struct TradeLogAdapter;

impl TradeLogAdapter {
    pub fn render(&self, trades: &[ClosedTrade]) -> Result<String, FluxbackError> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        write_rows(&mut wtr, trades)?;
        let bytes = wtr.into_inner().map_err(|e| report_error(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| report_error(e.to_string()))
    }
}

impl ReportPort for TradeLogAdapter {
    fn write(&self, result: &BacktestResult, output_path: &Path) -> Result<(), FluxbackError> {
        let mut wtr = csv::Writer::from_path(output_path).map_err(|e| {
            report_error(format!("failed to open {}: {e}", output_path.display()))
        })?;
        write_rows(&mut wtr, &result.trades)?;
        wtr.flush()?;
        Ok(())
    }
}

fn write_rows<W: std::io::Write>(
    wtr: &mut csv::Writer<W>,
    trades: &[ClosedTrade],
) -> Result<(), FluxbackError> {
    if trades.is_empty() {
        // serde only emits a header alongside the first record
        wtr.write_record([
            "entry_timestamp",
            "exit_timestamp",
            "side",
            "entry_price",
            "exit_price",
            "size",
            "pnl",
            "pnl_pct",
            "entry_regime",
            "exit_regime",
            "is_win",
            "exit_reason",
        ])
        .map_err(|e| report_error(e.to_string()))?;
    }
    for trade in trades {
        wtr.serialize(TradeRow::from(trade))
            .map_err(|e| report_error(e.to_string()))?;
    }
    Ok(())
}

fn report_error(reason: String) -> FluxbackError {
    FluxbackError::Report { reason }
}
