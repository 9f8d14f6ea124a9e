//! Domain error types.
//!
//! [`RegimeTraderError`] is the hard-failure type surfaced at configuration and
//! construction time. Failures inside a running backtest are recoverable and
//! travel as data: [`BacktestFailure`] inside an empty `BacktestResult`.

use std::fmt;

/// Top-level error type for regimetrader.
#[derive(Debug, thiserror::Error)]
pub enum RegimeTraderError {
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

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("no data for {symbol}")]
    NoData { symbol: String },

    #[error("insufficient data for {symbol}: have {bars} bars, need {minimum}")]
    InsufficientData {
        symbol: String,
        bars: usize,
        minimum: usize,
    },

    #[error("unsupported model: {reason}")]
    UnsupportedModel { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&RegimeTraderError> for std::process::ExitCode {
    fn from(err: &RegimeTraderError) -> Self {
        let code: u8 = match err {
            RegimeTraderError::Io(_) => 1,
            RegimeTraderError::ConfigParse { .. }
            | RegimeTraderError::ConfigMissing { .. }
            | RegimeTraderError::ConfigInvalid { .. } => 2,
            RegimeTraderError::Data { .. } => 3,
            RegimeTraderError::UnsupportedModel { .. } => 4,
            RegimeTraderError::NoData { .. } | RegimeTraderError::InsufficientData { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}

/// Error returned by an external collaborator behind one of the ports.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("indicator calculation failed: {reason}")]
    Indicators { reason: String },

    #[error("feature preparation failed: {reason}")]
    Features { reason: String },

    #[error("prediction failed: {reason}")]
    Prediction { reason: String },

    #[error("trade simulation failed: {reason}")]
    Simulation { reason: String },
}

/// Recoverable pipeline failure, recorded in a failed `BacktestResult`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BacktestFailure {
    #[error("insufficient data at {stage}: need {needed}, have {available}")]
    InsufficientData {
        stage: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("cannot align {signals} signals to a price index of {index} rows")]
    AlignmentMismatch { signals: usize, index: usize },

    #[error(transparent)]
    CollaboratorFailure(#[from] CollaboratorError),

    #[error("numeric degeneracy: {reason}")]
    NumericDegenerate { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    InsufficientData,
    AlignmentMismatch,
    CollaboratorFailure,
    NumericDegenerate,
}

impl BacktestFailure {
    pub fn category(&self) -> FailureCategory {
        match self {
            BacktestFailure::InsufficientData { .. } => FailureCategory::InsufficientData,
            BacktestFailure::AlignmentMismatch { .. } => FailureCategory::AlignmentMismatch,
            BacktestFailure::CollaboratorFailure(_) => FailureCategory::CollaboratorFailure,
            BacktestFailure::NumericDegenerate { .. } => FailureCategory::NumericDegenerate,
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureCategory::InsufficientData => "insufficient-data",
            FailureCategory::AlignmentMismatch => "alignment-mismatch",
            FailureCategory::CollaboratorFailure => "collaborator-failure",
            FailureCategory::NumericDegenerate => "numeric-degenerate",
        };
        f.write_str(name)
    }
}
