//! Foreign model runtime boundary.
//!
//! Provides:
//! - The narrow call contract for an external model-execution runtime
//!   (open / resolve / read / write / derivatives / event indicators /
//!   event responses), kept opaque behind `dyn ModelRuntime`
//! - `ForeignModelCache`: preallocated, call-compatible scratch buffers
//!   and resolved value references for one runtime instance, so the hot
//!   simulation path never allocates and never materializes buffer views
//! - A scriptable mock runtime for tests (feature `mock`)

pub mod cache;
pub mod error;
pub mod runtime;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use cache::ForeignModelCache;
pub use error::{ForeignError, ForeignResult};
pub use runtime::{EventTrigger, ModelRuntime, NullLoader, RuntimeLoader, ValueKind, ValueRef};
