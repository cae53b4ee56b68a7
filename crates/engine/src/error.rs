//! Error taxonomy for the backtesting core
//!
//! Input problems are rejected before a run starts, strategy failures abort
//! only the run they occur in, and registry load failures drop the offending
//! external strategy while the rest of the table loads normally.

use std::path::PathBuf;
use thiserror::Error;

/// Rejected input: the run never starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("Insufficient candles: got {got}, need at least {required}")]
    InsufficientCandles { got: usize, required: usize },

    #[error("Candles out of order or duplicated at index {index}")]
    UnsortedCandles { index: usize },

    #[error("Invalid candle at index {index}: {reason}")]
    InvalidCandle { index: usize, reason: String },

    #[error("Invalid config field `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid parameters for strategy `{strategy}`: {source}")]
    InvalidParams {
        strategy: String,
        #[source]
        source: ParamError,
    },
}

/// A parameter map does not satisfy a strategy's schema.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParamError {
    #[error("Unknown parameter `{0}`")]
    Unknown(String),

    #[error("Missing required parameter `{0}`")]
    Missing(String),

    #[error("Parameter `{name}` expects {expected}, got {got}")]
    WrongType {
        name: String,
        expected: &'static str,
        got: String,
    },

    #[error("Parameter `{name}` = {value} is outside [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Parameter `{name}` = `{value}` is not one of {options:?}")]
    NotAnOption {
        name: String,
        value: String,
        options: Vec<String>,
    },

    #[error("Invalid parameter combination: {0}")]
    Constraint(String),

    #[error("Invalid schema for `{name}`: {reason}")]
    Schema { name: String, reason: String },
}

/// Raised by a strategy while evaluating a bar.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct StrategyError {
    pub message: String,
}

impl StrategyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure of a single backtest run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BacktestError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("Strategy error at bar {bar_index}: {message}")]
    Strategy { bar_index: usize, message: String },
}

/// An external strategy definition that could not be loaded.
///
/// Never fatal for the registry: the definition is skipped and the error is
/// kept as a diagnostic on the table.
#[derive(Error, Debug)]
pub enum RegistryLoadError {
    #[error("Cannot read strategy directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed strategy definition {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Strategy id `{id}` in {path} collides with a built-in strategy")]
    BuiltinCollision { id: String, path: PathBuf },

    #[error("Strategy id `{id}` in {path} is already defined by another file")]
    DuplicateId { id: String, path: PathBuf },

    #[error("Strategy `{id}` extends unknown base `{base}`")]
    UnknownBase { id: String, base: String },

    #[error("Strategy `{id}` failed validation: {reason}")]
    Validation { id: String, reason: String },
}

/// Lookups against the registry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Unknown strategy: {0}")]
    NotFound(String),
}

pub type InputResult<T> = Result<T, InputError>;
pub type ParamResult<T> = Result<T, ParamError>;
pub type BacktestOutcome<T> = Result<T, BacktestError>;
