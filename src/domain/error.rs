//! Domain error types.

/// A parse error with position information for rule parsing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Coarse classification of a [`FluxbackError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DataFormat,
    StrategyFormat,
    InsufficientData,
    InsufficientFunds,
    IndicatorNotFound,
    Config,
    Report,
    Io,
}

/// Top-level error type for fluxback.
#[derive(Debug, thiserror::Error)]
pub enum FluxbackError {
    #[error("data format error at line {line}: {reason}")]
    DataFormat { line: usize, reason: String },

    #[error("strategy format error: {reason}")]
    StrategyFormat { reason: String },

    #[error(transparent)]
    RuleParse(#[from] ParseError),

    #[error("insufficient data: have {bars} bars, need {minimum}")]
    InsufficientData { bars: usize, minimum: usize },

    #[error("insufficient funds: order needs {required:.2}, cash is {available:.2}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("unknown indicator '{name}'")]
    IndicatorNotFound { name: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("report error: {reason}")]
    Report { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FluxbackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FluxbackError::DataFormat { .. } => ErrorKind::DataFormat,
            FluxbackError::StrategyFormat { .. } | FluxbackError::RuleParse(_) => {
                ErrorKind::StrategyFormat
            }
            FluxbackError::InsufficientData { .. } => ErrorKind::InsufficientData,
            FluxbackError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            FluxbackError::IndicatorNotFound { .. } => ErrorKind::IndicatorNotFound,
            FluxbackError::ConfigParse { .. }
            | FluxbackError::ConfigMissing { .. }
            | FluxbackError::ConfigInvalid { .. } => ErrorKind::Config,
            FluxbackError::Report { .. } => ErrorKind::Report,
            FluxbackError::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn strategy(reason: impl Into<String>) -> Self {
        FluxbackError::StrategyFormat {
            reason: reason.into(),
        }
    }

    pub(crate) fn data(line: usize, reason: impl Into<String>) -> Self {
        FluxbackError::DataFormat {
            line,
            reason: reason.into(),
        }
    }
}

impl From<&FluxbackError> for std::process::ExitCode {
    fn from(err: &FluxbackError) -> Self {
        let code: u8 = match err.kind() {
            ErrorKind::Io | ErrorKind::Report => 1,
            ErrorKind::Config => 2,
            ErrorKind::InsufficientFunds => 3,
            ErrorKind::StrategyFormat | ErrorKind::IndicatorNotFound => 4,
            ErrorKind::DataFormat | ErrorKind::InsufficientData => 5,
        };
        std::process::ExitCode::from(code)
    }
}
