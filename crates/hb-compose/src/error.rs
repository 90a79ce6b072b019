//! Error types for composition operations.

use hb_model::ModelError;
use thiserror::Error;

/// Errors from composing model specifications into a simulation.
#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("Invalid composition: {what}")]
    Configuration { what: String },

    #[error("Cardinality mismatch in {what}: {src} sources vs {dst} destinations")]
    Cardinality {
        what: &'static str,
        src: usize,
        dst: usize,
    },

    #[error("Unknown name in address map: {name}")]
    UnknownName { name: String },

    #[error(transparent)]
    Model(#[from] ModelError),
}

pub type ComposeResult<T> = Result<T, ComposeError>;
