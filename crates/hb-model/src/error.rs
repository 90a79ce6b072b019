//! Error types for model specification and adapter operations.

use hb_core::CoreError;
use hb_foreign::ForeignError;
use thiserror::Error;

/// Errors from building or evaluating a model adapter.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Dimension mismatch in {what}: expected {expected}, got {got}")]
    Dimension {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Invalid model configuration: {what}")]
    Configuration { what: String },

    #[error("Evaluation failed: {message}")]
    Evaluation { message: String },

    #[error(transparent)]
    Foreign(#[from] ForeignError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type ModelResult<T> = Result<T, ModelError>;
