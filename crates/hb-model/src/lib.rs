//! Model specifications and adapters over the shared simulation buffers.
//!
//! Provides:
//! - `ModelSpec`: immutable human-readable descriptor of one hybrid model
//! - `ModelAdapter`: uniform derivative/output/event surface over assigned
//!   address windows, backed by either native closures or a foreign cache
//! - Event descriptor types for the four event families

pub mod adapter;
pub mod error;
pub mod events;
pub mod spec;

pub use adapter::ModelAdapter;
pub use error::{ModelError, ModelResult};
pub use events::{
    AnalyticEvents, ConditionFn, ContinuousEvents, DiscreteEvents, EventApplyFn, IndexedApplyFn,
    IndicatorFn, StepEvents, TimeEvents,
};
pub use spec::{DerivativeFn, ModelSpec, OutputFn, SpecKind};
