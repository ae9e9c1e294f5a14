//! Error taxonomy shared by every session component.

use thiserror::Error;

/// Malformed grid data or an out-of-range request against a grid sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("expected {expected} rows, got {actual}")]
    Rows { expected: usize, actual: usize },

    #[error("row {row}: expected {expected} columns, got {actual}")]
    Columns {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("cell ({row}, {col}) holds {value}; only -1 and 1 are allowed")]
    Value { row: usize, col: usize, value: i64 },

    #[error("grid sequence is empty")]
    EmptySequence,

    #[error("index {index} is outside a sequence of {len} grids")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("tick interval must be non-zero")]
    ZeroInterval,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Remote call failed: timeout, unreachable host, non-success status or
    /// an undecodable body.
    #[error("{call} failed: {reason}")]
    Network { call: &'static str, reason: String },

    /// Camera unavailable or access denied.
    #[error("media source unavailable: {0}")]
    Resource(String),
}

impl SessionError {
    pub fn network(call: &'static str, reason: impl Into<String>) -> Self {
        SessionError::Network {
            call,
            reason: reason.into(),
        }
    }

    pub fn resource(reason: impl Into<String>) -> Self {
        SessionError::Resource(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
