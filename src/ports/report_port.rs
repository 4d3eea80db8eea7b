//! Report output port.

use std::path::Path;

use crate::domain::backtest::BacktestResult;
use crate::domain::error::FluxbackError;

/// Port for writing backtest results.
pub trait ReportPort {
    fn write(&self, result: &BacktestResult, output_path: &Path) -> Result<(), FluxbackError>;

    /// Default implementation: one output file per result, named by
    /// [`batch_path`] from the result's batch index and strategy name.
    fn write_batch(
        &self,
        results: &[(usize, BacktestResult)],
        output_path: &Path,
    ) -> Result<(), FluxbackError> {
        for (index, result) in results {
            self.write(result, &batch_path(output_path, *index, &result.strategy))?;
        }
        Ok(())
    }
}

/// `out/report.json`, entry 2, `trend` -> `out/report_2_trend.json`. The
/// index keeps entries that share a strategy name apart.
pub fn batch_path(path: &Path, index: usize, strategy: &str) -> std::path::PathBuf {
    suffixed_path(path, &format!("{index}_{strategy}"))
}

/// `out/report.json` + `trend` -> `out/report_trend.json`.
pub fn suffixed_path(path: &Path, suffix: &str) -> std::path::PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let safe: String = suffix
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{safe}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{safe}"),
    };
    path.with_file_name(name)
}
