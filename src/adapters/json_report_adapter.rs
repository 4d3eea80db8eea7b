//! JSON report adapter implementing ReportPort.

use std::fs;
use std::path::Path;

use crate::domain::backtest::BacktestResult;
use crate::domain::error::FluxbackError;
use crate::ports::report_port::ReportPort;

pub struct JsonReportAdapter {
    pretty: bool,
}

impl JsonReportAdapter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    pub fn render(&self, result: &BacktestResult) -> Result<String, FluxbackError> {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(result)
        } else {
            serde_json::to_string(result)
        };
        rendered.map_err(|e| FluxbackError::Report {
            reason: format!("failed to serialize result: {e}"),
        })
    }
}

impl ReportPort for JsonReportAdapter {
    fn write(&self, result: &BacktestResult, output_path: &Path) -> Result<(), FluxbackError> {
        let json = self.render(result)?;
        fs::write(output_path, json).map_err(|e| FluxbackError::Report {
            reason: format!("failed to write {}: {e}", output_path.display()),
        })
    }
}
