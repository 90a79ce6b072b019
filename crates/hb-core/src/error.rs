use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Non-finite numeric value for {what}: {value}")]
    NonFinite { what: &'static str, value: f64 },

    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error("Window out of bounds: {what} (offset={offset}, len={len}, buffer={buffer})")]
    WindowOob {
        what: &'static str,
        offset: usize,
        len: usize,
        buffer: usize,
    },
}
