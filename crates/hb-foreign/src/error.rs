//! Error types for the foreign-call boundary.

use thiserror::Error;

/// Errors crossing the foreign runtime boundary.
///
/// All of these are fatal for the current integration step: foreign model
/// state after a failed call is undefined, so nothing here is retried.
#[derive(Error, Debug)]
pub enum ForeignError {
    #[error("Unknown variable name in foreign model: {name}")]
    Resolution { name: String },

    #[error("Unknown parameter in foreign model: {name}")]
    UnknownParameter { name: String },

    #[error("Foreign call {op} failed: {message}")]
    Call { op: &'static str, message: String },

    #[error("Dimension mismatch in {what}: expected {expected}, got {got}")]
    Dimension {
        what: &'static str,
        expected: usize,
        got: usize,
    },
}

pub type ForeignResult<T> = Result<T, ForeignError>;
