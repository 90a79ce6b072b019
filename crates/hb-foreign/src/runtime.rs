//! Narrow call contract for an external model-execution runtime.
//!
//! The bridge is agnostic to the runtime's internal representation: it
//! only resolves names to opaque references once, then reads/writes
//! values and asks for derivatives, event indicators and event responses
//! through this trait. A runtime instance is closed by dropping it.

use hb_core::TimeSpan;

use crate::error::ForeignResult;

/// Opaque, non-human-readable reference to one named variable inside a
/// foreign runtime. Only meaningful to the runtime that issued it.
pub type ValueRef = u32;

/// Which of the three variable groups a reference belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Input,
    Output,
    State,
}

/// What caused an event response.
///
/// Continuous (state-triggered) events carry the index of the indicator
/// that crossed zero; the remaining variants cover scheduled time events,
/// input-driven discontinuities, and event demands raised by step
/// completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventTrigger {
    /// A scheduled time event was reached.
    Scheduled,
    /// The event indicator with this index crossed zero.
    Indicator(usize),
    /// A model input changed discontinuously.
    InputChange,
    /// The runtime demanded an event update after a completed step.
    StepCompleted,
}

/// One live foreign model instance.
///
/// Not reentrant: callers must serialize access. All methods cross the
/// foreign-call boundary and may fail with a `Call` error if the runtime
/// is unreachable or reports an error status.
pub trait ModelRuntime {
    /// Resolve a human-readable variable name to an opaque reference.
    fn resolve(&mut self, kind: ValueKind, name: &str) -> ForeignResult<ValueRef>;

    /// Override one model parameter before simulation starts.
    fn set_parameter(&mut self, name: &str, value: f64) -> ForeignResult<()>;

    /// Write values for the referenced variables.
    fn write(&mut self, kind: ValueKind, refs: &[ValueRef], values: &[f64]) -> ForeignResult<()>;

    /// Read the referenced variables into `out`.
    fn read(&mut self, kind: ValueKind, refs: &[ValueRef], out: &mut [f64]) -> ForeignResult<()>;

    /// Evaluate state derivatives at time `t` into `out`.
    fn derivatives(&mut self, t: f64, out: &mut [f64]) -> ForeignResult<()>;

    /// Number of continuous event indicators exposed by the model.
    fn indicator_count(&self) -> usize;

    /// Evaluate the continuous event indicator vector at time `t`.
    fn event_indicators(&mut self, t: f64, out: &mut [f64]) -> ForeignResult<()>;

    /// Resolve a discontinuity by reassigning internal model state.
    ///
    /// This is the only operation permitted to change state outside the
    /// derivative path.
    fn apply_event(&mut self, trigger: EventTrigger, t: f64) -> ForeignResult<()>;

    /// Next scheduled time event strictly after `t`, if any.
    fn next_event_time(&mut self, t: f64) -> ForeignResult<Option<f64>>;

    /// Notify the runtime that the integrator accepted a step ending at
    /// `t`. Returns `true` if the runtime demands an event update.
    fn completed_step(&mut self, t: f64) -> ForeignResult<bool>;
}

/// Opens foreign runtime instances from an artifact locator.
///
/// Artifact packaging and loading live outside this crate; a loader is
/// whatever the embedding application uses to turn a locator into a live
/// runtime over the given simulation span.
pub trait RuntimeLoader {
    fn open(&self, locator: &str, span: TimeSpan) -> ForeignResult<Box<dyn ModelRuntime>>;
}

/// Loader for compositions without foreign models. Opening anything fails.
pub struct NullLoader;

impl RuntimeLoader for NullLoader {
    fn open(&self, locator: &str, _span: TimeSpan) -> ForeignResult<Box<dyn ModelRuntime>> {
        Err(crate::error::ForeignError::Call {
            op: "open",
            message: format!("no foreign runtime available for {locator}"),
        })
    }
}
