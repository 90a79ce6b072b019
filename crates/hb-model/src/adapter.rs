//! Uniform adapter over one model's assigned buffer windows.
//!
//! An adapter owns its address windows and an evaluation backend, and
//! turns full-buffer views from the integrator into window-local views
//! for the model. Many adapters share the same two buffers but never the
//! same index ranges.

use hb_core::{CoreError, Window};
use hb_foreign::{EventTrigger, ForeignModelCache};

use crate::error::{ModelError, ModelResult};
use crate::events::AnalyticEvents;
use crate::spec::{DerivativeFn, OutputFn};

/// Evaluation backend: a closed set of kinds behind one surface.
enum Backend {
    Analytic(AnalyticModel),
    Foreign(ForeignModelCache),
}

struct AnalyticModel {
    derivative: DerivativeFn,
    output: OutputFn,
    events: AnalyticEvents,
}

/// One model bound to its state window and io window (inputs first, then
/// outputs). Lives for the simulation's duration; a foreign backend
/// releases its runtime instance when the adapter is dropped.
pub struct ModelAdapter {
    state: Window,
    inputs: Window,
    outputs: Window,
    backend: Backend,
}

impl std::fmt::Debug for ModelAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelAdapter")
            .field("state", &self.state)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

impl ModelAdapter {
    /// Adapter for a native model with explicit windows.
    ///
    /// The output sub-window must start exactly where the input
    /// sub-window ends; together they form the model's io window.
    pub fn analytic(
        derivative: DerivativeFn,
        output: OutputFn,
        events: AnalyticEvents,
        state: Window,
        inputs: Window,
        outputs: Window,
    ) -> ModelResult<Self> {
        check_io_contiguous(&inputs, &outputs)?;
        Ok(Self {
            state,
            inputs,
            outputs,
            backend: Backend::Analytic(AnalyticModel {
                derivative,
                output,
                events,
            }),
        })
    }

    /// Adapter over an opened foreign model cache.
    pub fn foreign(
        cache: ForeignModelCache,
        state: Window,
        inputs: Window,
        outputs: Window,
    ) -> ModelResult<Self> {
        check_io_contiguous(&inputs, &outputs)?;
        check_len("foreign state window", cache.state_len(), state.len)?;
        check_len("foreign input window", cache.input_len(), inputs.len)?;
        check_len("foreign output window", cache.output_len(), outputs.len)?;
        Ok(Self {
            state,
            inputs,
            outputs,
            backend: Backend::Foreign(cache),
        })
    }

    pub fn state_window(&self) -> Window {
        self.state
    }

    pub fn input_window(&self) -> Window {
        self.inputs
    }

    pub fn output_window(&self) -> Window {
        self.outputs
    }

    /// Combined io window (input and output sub-windows).
    pub fn io_window(&self) -> Window {
        Window::new(self.inputs.offset, self.inputs.len + self.outputs.len)
    }

    pub fn is_foreign(&self) -> bool {
        matches!(self.backend, Backend::Foreign(_))
    }

    /// Length of the continuous event indicator vector.
    pub fn indicator_count(&self) -> usize {
        match &self.backend {
            Backend::Analytic(m) => m.events.continuous.as_ref().map_or(0, |c| c.count),
            Backend::Foreign(cache) => cache.indicator_count(),
        }
    }

    /// Whether this adapter can schedule time events.
    pub fn has_time_events(&self) -> bool {
        match &self.backend {
            Backend::Analytic(m) => m.events.time.is_some(),
            // A foreign runtime may schedule events at any point.
            Backend::Foreign(_) => true,
        }
    }

    /// Whether this adapter wants step-completion callbacks.
    pub fn has_step_events(&self) -> bool {
        match &self.backend {
            Backend::Analytic(m) => m.events.step.is_some(),
            // Foreign runtimes are always notified of accepted steps.
            Backend::Foreign(_) => true,
        }
    }

    /// Whether this adapter detects input-driven discontinuities.
    pub fn has_discrete_events(&self) -> bool {
        match &self.backend {
            Backend::Analytic(m) => m.events.discrete.is_some(),
            Backend::Foreign(_) => !self.inputs.is_empty(),
        }
    }

    /// Compute the derivative for this adapter's state window of `dxdt`,
    /// leaving all other indices untouched.
    pub fn evaluate_derivative(
        &mut self,
        dxdt: &mut [f64],
        state: &[f64],
        io: &[f64],
        t: f64,
    ) -> ModelResult<()> {
        let x = self.state.of(state, "state view")?;
        let u = self.inputs.of(io, "input view")?;
        let dx = self.state.of_mut(dxdt, "derivative view")?;
        match &mut self.backend {
            Backend::Analytic(m) => (m.derivative)(dx, x, u, t),
            Backend::Foreign(cache) => {
                cache.write_state(x)?;
                cache.write_inputs(u)?;
                dx.copy_from_slice(cache.derivatives(t)?);
                Ok(())
            }
        }
    }

    /// Compute outputs into this adapter's output sub-window of `io`.
    ///
    /// State is taken by shared reference: output evaluation is a pure
    /// function of state, input and time, and cannot reassign state.
    pub fn evaluate_output(&mut self, state: &[f64], io: &mut [f64], t: f64) -> ModelResult<()> {
        let x = self.state.of(state, "state view")?;
        if self.outputs.end() > io.len() {
            return Err(CoreError::WindowOob {
                what: "output view",
                offset: self.outputs.offset,
                len: self.outputs.len,
                buffer: io.len(),
            }
            .into());
        }
        // Inputs precede outputs, so one split yields both sub-windows.
        let (head, tail) = io.split_at_mut(self.outputs.offset);
        let u = &head[self.inputs.offset..self.inputs.end()];
        let y = &mut tail[..self.outputs.len];
        match &mut self.backend {
            Backend::Analytic(m) => (m.output)(y, x, u, t),
            Backend::Foreign(cache) => {
                cache.write_state(x)?;
                cache.write_inputs(u)?;
                y.copy_from_slice(cache.read_outputs()?);
                Ok(())
            }
        }
    }

    /// Next scheduled time event strictly after `t`, if any.
    pub fn next_event_time(&mut self, t: f64) -> ModelResult<Option<f64>> {
        match &mut self.backend {
            Backend::Analytic(m) => Ok(m.events.time.as_ref().and_then(|te| te.next_after(t))),
            Backend::Foreign(cache) => Ok(cache.next_event_time(t)?),
        }
    }

    /// Evaluate the continuous indicator vector into `out`.
    pub fn eval_indicators(
        &mut self,
        out: &mut [f64],
        state: &[f64],
        io: &[f64],
        t: f64,
    ) -> ModelResult<()> {
        check_len("indicator vector", self.indicator_count(), out.len())?;
        let x = self.state.of(state, "state view")?;
        let v = self.io_window().of(io, "io view")?;
        match &mut self.backend {
            Backend::Analytic(m) => match m.events.continuous.as_mut() {
                Some(c) => (c.indicators)(out, x, v, t),
                None => Ok(()),
            },
            Backend::Foreign(cache) => {
                let u = &v[..self.inputs.len];
                cache.write_state(x)?;
                cache.write_inputs(u)?;
                out.copy_from_slice(cache.event_indicators(t)?);
                Ok(())
            }
        }
    }

    /// Respond to a reached time event. Returns `true` if state changed.
    pub fn apply_time_event(
        &mut self,
        state: &mut [f64],
        io: &mut [f64],
        t: f64,
    ) -> ModelResult<bool> {
        match &mut self.backend {
            Backend::Analytic(m) => {
                let te = m.events.time.as_mut().ok_or_else(|| missing_family("time"))?;
                let x = self.state.of_mut(state, "state view")?;
                let v = io_view_mut(&self.inputs, &self.outputs, io)?;
                (te.apply)(x, v, t)?;
                Ok(true)
            }
            Backend::Foreign(cache) => {
                foreign_event(cache, EventTrigger::Scheduled, &self.state, &self.inputs, state, io, t)
            }
        }
    }

    /// Respond to a zero-crossing of indicator `event`.
    pub fn apply_continuous_event(
        &mut self,
        event: usize,
        state: &mut [f64],
        io: &mut [f64],
        t: f64,
    ) -> ModelResult<bool> {
        let count = self.indicator_count();
        if event >= count {
            return Err(ModelError::Dimension {
                what: "continuous event index",
                expected: count,
                got: event,
            });
        }
        match &mut self.backend {
            Backend::Analytic(m) => {
                let c = m.events.continuous.as_mut().ok_or_else(|| missing_family("continuous"))?;
                let x = self.state.of_mut(state, "state view")?;
                let v = io_view_mut(&self.inputs, &self.outputs, io)?;
                (c.apply)(event, x, v, t)?;
                Ok(true)
            }
            Backend::Foreign(cache) => foreign_event(
                cache,
                EventTrigger::Indicator(event),
                &self.state,
                &self.inputs,
                state,
                io,
                t,
            ),
        }
    }

    /// Discrete condition check at a solver-checked point: has an input
    /// changed since the model last saw it?
    pub fn check_discrete(&mut self, state: &[f64], io: &[f64], t: f64) -> ModelResult<bool> {
        match &mut self.backend {
            Backend::Analytic(m) => {
                let d = m.events.discrete.as_mut().ok_or_else(|| missing_family("discrete"))?;
                let x = self.state.of(state, "state view")?;
                let v = Window::new(self.inputs.offset, self.inputs.len + self.outputs.len)
                    .of(io, "io view")?;
                (d.condition)(x, v, t)
            }
            Backend::Foreign(cache) => {
                let u = self.inputs.of(io, "input view")?;
                Ok(cache.inputs_changed(u)?)
            }
        }
    }

    /// Respond to an input-driven discontinuity. Returns `true` if state
    /// changed.
    pub fn apply_discrete_event(
        &mut self,
        state: &mut [f64],
        io: &mut [f64],
        t: f64,
    ) -> ModelResult<bool> {
        match &mut self.backend {
            Backend::Analytic(m) => {
                let d = m.events.discrete.as_mut().ok_or_else(|| missing_family("discrete"))?;
                let x = self.state.of_mut(state, "state view")?;
                let v = io_view_mut(&self.inputs, &self.outputs, io)?;
                (d.apply)(x, v, t)?;
                Ok(true)
            }
            Backend::Foreign(cache) => {
                foreign_event(cache, EventTrigger::InputChange, &self.state, &self.inputs, state, io, t)
            }
        }
    }

    /// Step-completion hook, run once per accepted step after event
    /// resolution. Returns `true` if the model demanded an event update
    /// that reassigned state.
    pub fn completed_step(
        &mut self,
        state: &mut [f64],
        io: &mut [f64],
        t: f64,
    ) -> ModelResult<bool> {
        match &mut self.backend {
            Backend::Analytic(m) => {
                if let Some(step) = m.events.step.as_mut() {
                    let x = self.state.of_mut(state, "state view")?;
                    let v = io_view_mut(&self.inputs, &self.outputs, io)?;
                    (step.apply)(x, v, t)?;
                }
                Ok(false)
            }
            Backend::Foreign(cache) => {
                {
                    let x = self.state.of(state, "state view")?;
                    cache.write_state(x)?;
                }
                if cache.completed_step(t)? {
                    foreign_event(
                        cache,
                        EventTrigger::StepCompleted,
                        &self.state,
                        &self.inputs,
                        state,
                        io,
                        t,
                    )
                } else {
                    Ok(false)
                }
            }
        }
    }
}

/// Marshal current windows into the cache, let the runtime resolve the
/// event, and copy the reassigned state back into the state window.
fn foreign_event(
    cache: &mut ForeignModelCache,
    trigger: EventTrigger,
    state_window: &Window,
    input_window: &Window,
    state: &mut [f64],
    io: &[f64],
    t: f64,
) -> ModelResult<bool> {
    {
        let x = state_window.of(state, "state view")?;
        cache.write_state(x)?;
    }
    {
        let u = input_window.of(io, "input view")?;
        cache.write_inputs(u)?;
    }
    let new_x = cache.apply_event(trigger, t)?;
    state_window
        .of_mut(state, "state view")?
        .copy_from_slice(new_x);
    Ok(true)
}

fn io_view_mut<'a>(
    inputs: &Window,
    outputs: &Window,
    io: &'a mut [f64],
) -> ModelResult<&'a mut [f64]> {
    let window = Window::new(inputs.offset, inputs.len + outputs.len);
    Ok(window.of_mut(io, "io view")?)
}

fn check_io_contiguous(inputs: &Window, outputs: &Window) -> ModelResult<()> {
    if outputs.offset != inputs.end() {
        return Err(ModelError::Configuration {
            what: format!(
                "output sub-window must start at input sub-window end ({} != {})",
                outputs.offset,
                inputs.end()
            ),
        });
    }
    Ok(())
}

fn check_len(what: &'static str, expected: usize, got: usize) -> ModelResult<()> {
    if expected != got {
        return Err(ModelError::Dimension {
            what,
            expected,
            got,
        });
    }
    Ok(())
}

fn missing_family(family: &str) -> ModelError {
    ModelError::Configuration {
        what: format!("model declares no {family} events"),
    }
}
