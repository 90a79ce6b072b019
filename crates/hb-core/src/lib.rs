//! hb-core: stable foundation for hybridge.
//!
//! Contains:
//! - window (address windows into the shared flat buffers)
//! - numeric (Real + tolerances + float helpers + simulation time span)
//! - error (shared error types)

pub mod error;
pub mod numeric;
pub mod window;

// Re-exports: nice ergonomics for downstream crates
pub use error::{CoreError, CoreResult};
pub use numeric::*;
pub use window::Window;
