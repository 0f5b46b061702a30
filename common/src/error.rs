//! Error taxonomy for the weighting engine

use thiserror::Error;

/// Errors surfaced to the immediate caller.
///
/// `UnknownLayer` is recoverable: registration falls back to the analyst
/// policy and logs a warning instead of propagating it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("invalid {field}: {value} is not a finite number")]
    InvalidValue { field: &'static str, value: f64 },

    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    #[error("unknown layer: {0}")]
    UnknownLayer(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Reject non-finite values before they reach any record.
    pub fn check_finite(field: &'static str, value: f64) -> Result<f64> {
        if value.is_finite() {
            Ok(value)
        } else {
            Err(EngineError::InvalidValue { field, value })
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
