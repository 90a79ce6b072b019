//! Solver-facing event callbacks as explicit command objects.
//!
//! Instead of closures capturing mutable integrator state, each callback
//! is a small struct carrying its family and the index of the adapter it
//! belongs to. The integrator's event loop consumes the commands and
//! executes them against the merged system (`Dynamics`), which owns the
//! adapters. This keeps callback installation independent of other
//! adapters while leaving all mutation in one place.

use hb_model::ModelAdapter;

/// The four event families of the callback protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackFamily {
    /// Fires when the next scheduled event time is reached.
    Time,
    /// Zero-crossing detection on a continuous indicator vector.
    /// Detects discontinuities caused by state evolution, not by input
    /// changes.
    Continuous,
    /// Runs once after every accepted integration step, after event
    /// resolution for that step.
    Step,
    /// Condition checked only at discrete solver points. Detects
    /// input-driven discontinuities, not state-driven ones.
    Discrete,
}

/// One installable callback command.
///
/// `model` indexes the adapter inside its composition; `indicators` is
/// the length of the zero-crossing vector for the Continuous family and
/// zero otherwise (the integrator sizes its root-finding buffer from it).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Callback {
    pub family: CallbackFamily,
    pub model: usize,
    pub indicators: usize,
}

/// Whether an event response discontinuously changed solver state.
///
/// `StateChanged` tells the integrator to discard its local
/// approximation and restart from the reassigned state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum EventOutcome {
    StateChanged,
    Unchanged,
}

impl EventOutcome {
    pub fn state_changed(self) -> bool {
        matches!(self, EventOutcome::StateChanged)
    }

    pub(crate) fn from_flag(changed: bool) -> Self {
        if changed {
            EventOutcome::StateChanged
        } else {
            EventOutcome::Unchanged
        }
    }
}

/// Time-event command for one adapter, if it schedules time events.
pub fn time_callback(model: usize, adapter: &ModelAdapter) -> Option<Callback> {
    adapter.has_time_events().then_some(Callback {
        family: CallbackFamily::Time,
        model,
        indicators: 0,
    })
}

/// Continuous (state-triggered) command for one adapter, if it exposes
/// event indicators.
pub fn state_callback(model: usize, adapter: &ModelAdapter) -> Option<Callback> {
    let indicators = adapter.indicator_count();
    (indicators > 0).then_some(Callback {
        family: CallbackFamily::Continuous,
        model,
        indicators,
    })
}

/// Step-completion command for one adapter, if it wants one.
pub fn step_callback(model: usize, adapter: &ModelAdapter) -> Option<Callback> {
    adapter.has_step_events().then_some(Callback {
        family: CallbackFamily::Step,
        model,
        indicators: 0,
    })
}

/// Discrete (input-triggered) command for one adapter, if it detects
/// input-driven discontinuities.
pub fn input_callback(model: usize, adapter: &ModelAdapter) -> Option<Callback> {
    adapter.has_discrete_events().then_some(Callback {
        family: CallbackFamily::Discrete,
        model,
        indicators: 0,
    })
}

/// All callback commands applicable to one adapter.
pub fn callbacks(model: usize, adapter: &ModelAdapter) -> Vec<Callback> {
    [
        time_callback(model, adapter),
        state_callback(model, adapter),
        step_callback(model, adapter),
        input_callback(model, adapter),
    ]
    .into_iter()
    .flatten()
    .collect()
}
