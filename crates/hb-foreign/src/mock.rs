//! Scriptable in-process runtime for exercising the foreign-call path.
//!
//! Behaves like a real model runtime behind the `ModelRuntime` contract:
//! names resolve to deliberately scrambled references, values only move
//! through `read`/`write`, and event responses reassign internal state.
//! Behavior is scripted with plain closures so tests can stand up a full
//! hybrid model in a few lines.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use hb_core::TimeSpan;

use crate::error::{ForeignError, ForeignResult};
use crate::runtime::{EventTrigger, ModelRuntime, RuntimeLoader, ValueKind, ValueRef};

type DerivativeFn = dyn Fn(&mut [f64], &[f64], &[f64], f64);
type OutputFn = dyn Fn(&mut [f64], &[f64], &[f64], f64);
type IndicatorFn = dyn Fn(&mut [f64], &[f64], &[f64], f64);
type EventFn = dyn Fn(EventTrigger, &mut [f64], &mut [f64], f64);
type StepFn = dyn Fn(&[f64], f64) -> bool;

/// Scripted foreign model.
///
/// Closures receive `(… , x, u, t)` where `x` is the internal state and
/// `u` the internal inputs. Output reads evaluate at the time of the last
/// time-bearing call, mirroring runtimes that latch time internally.
pub struct MockRuntime {
    input_names: Vec<String>,
    output_names: Vec<String>,
    state_names: Vec<String>,
    parameters: BTreeMap<String, f64>,

    derivative: Arc<DerivativeFn>,
    output: Arc<OutputFn>,
    indicator_count: usize,
    indicators: Arc<IndicatorFn>,
    on_event: Arc<EventFn>,
    schedule: Vec<f64>,
    step_check: Arc<StepFn>,

    // Live instance state
    x: Vec<f64>,
    u: Vec<f64>,
    t_last: f64,
    slots: HashMap<(ValueKind, ValueRef), usize>,
}

impl MockRuntime {
    pub fn new(inputs: &[&str], outputs: &[&str], states: &[&str]) -> Self {
        let input_names: Vec<String> = inputs.iter().map(|s| s.to_string()).collect();
        let output_names: Vec<String> = outputs.iter().map(|s| s.to_string()).collect();
        let state_names: Vec<String> = states.iter().map(|s| s.to_string()).collect();

        let mut slots = HashMap::new();
        for (kind, names) in [
            (ValueKind::Input, &input_names),
            (ValueKind::Output, &output_names),
            (ValueKind::State, &state_names),
        ] {
            for slot in 0..names.len() {
                slots.insert((kind, scramble(kind, slot)), slot);
            }
        }

        Self {
            x: vec![0.0; state_names.len()],
            u: vec![0.0; input_names.len()],
            input_names,
            output_names,
            state_names,
            parameters: BTreeMap::new(),
            derivative: Arc::new(|dx, _x, _u, _t| dx.fill(0.0)),
            output: Arc::new(|y, _x, _u, _t| y.fill(0.0)),
            indicator_count: 0,
            indicators: Arc::new(|out, _x, _u, _t| out.fill(0.0)),
            on_event: Arc::new(|_trigger, _x, _u, _t| {}),
            schedule: Vec::new(),
            step_check: Arc::new(|_x, _t| false),
            t_last: 0.0,
            slots,
        }
    }

    /// Declare a known parameter with its default value.
    pub fn with_parameter(mut self, name: &str, default: f64) -> Self {
        self.parameters.insert(name.to_string(), default);
        self
    }

    /// Script the derivative evaluation `dx = f(x, u, t)`.
    pub fn with_derivative(mut self, f: impl Fn(&mut [f64], &[f64], &[f64], f64) + 'static) -> Self {
        self.derivative = Arc::new(f);
        self
    }

    /// Script the output evaluation `y = g(x, u, t)`.
    pub fn with_output(mut self, f: impl Fn(&mut [f64], &[f64], &[f64], f64) + 'static) -> Self {
        self.output = Arc::new(f);
        self
    }

    /// Script the continuous event indicator vector.
    pub fn with_indicators(
        mut self,
        count: usize,
        f: impl Fn(&mut [f64], &[f64], &[f64], f64) + 'static,
    ) -> Self {
        self.indicator_count = count;
        self.indicators = Arc::new(f);
        self
    }

    /// Script the event response (internal state reassignment).
    pub fn with_event_handler(
        mut self,
        f: impl Fn(EventTrigger, &mut [f64], &mut [f64], f64) + 'static,
    ) -> Self {
        self.on_event = Arc::new(f);
        self
    }

    /// Schedule time events at the given instants.
    pub fn with_schedule(mut self, times: &[f64]) -> Self {
        self.schedule = times.to_vec();
        self.schedule.sort_by(|a, b| a.total_cmp(b));
        self
    }

    /// Script the completed-step check: return `true` to demand an event
    /// update after an accepted step.
    pub fn with_step_check(mut self, f: impl Fn(&[f64], f64) -> bool + 'static) -> Self {
        self.step_check = Arc::new(f);
        self
    }

    /// Fresh instance sharing this runtime's scripted behavior but none
    /// of its live state. Lets one scripted model back several opens.
    pub fn clone_config(&self) -> Self {
        Self {
            input_names: self.input_names.clone(),
            output_names: self.output_names.clone(),
            state_names: self.state_names.clone(),
            parameters: self.parameters.clone(),
            derivative: Arc::clone(&self.derivative),
            output: Arc::clone(&self.output),
            indicator_count: self.indicator_count,
            indicators: Arc::clone(&self.indicators),
            on_event: Arc::clone(&self.on_event),
            schedule: self.schedule.clone(),
            step_check: Arc::clone(&self.step_check),
            x: vec![0.0; self.state_names.len()],
            u: vec![0.0; self.input_names.len()],
            t_last: 0.0,
            slots: self.slots.clone(),
        }
    }

    fn names(&self, kind: ValueKind) -> &[String] {
        match kind {
            ValueKind::Input => &self.input_names,
            ValueKind::Output => &self.output_names,
            ValueKind::State => &self.state_names,
        }
    }

    fn slot(&self, kind: ValueKind, vr: ValueRef, op: &'static str) -> ForeignResult<usize> {
        self.slots
            .get(&(kind, vr))
            .copied()
            .ok_or_else(|| ForeignError::Call {
                op,
                message: format!("unknown value reference {vr} for {kind:?}"),
            })
    }
}

/// References are deliberately not the slot index, so code that assumes
/// "reference == position" breaks loudly in tests.
fn scramble(kind: ValueKind, slot: usize) -> ValueRef {
    let tag = match kind {
        ValueKind::Input => 1,
        ValueKind::Output => 2,
        ValueKind::State => 3,
    };
    (1000 * tag + 7 * slot as u32) + 13
}

impl ModelRuntime for MockRuntime {
    fn resolve(&mut self, kind: ValueKind, name: &str) -> ForeignResult<ValueRef> {
        let slot = self
            .names(kind)
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| ForeignError::Resolution {
                name: name.to_string(),
            })?;
        Ok(scramble(kind, slot))
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> ForeignResult<()> {
        match self.parameters.get_mut(name) {
            Some(p) => {
                *p = value;
                Ok(())
            }
            None => Err(ForeignError::UnknownParameter {
                name: name.to_string(),
            }),
        }
    }

    fn write(&mut self, kind: ValueKind, refs: &[ValueRef], values: &[f64]) -> ForeignResult<()> {
        if refs.len() != values.len() {
            return Err(ForeignError::Dimension {
                what: "runtime write",
                expected: refs.len(),
                got: values.len(),
            });
        }
        for (&vr, &v) in refs.iter().zip(values) {
            let slot = self.slot(kind, vr, "write")?;
            match kind {
                ValueKind::Input => self.u[slot] = v,
                ValueKind::State => self.x[slot] = v,
                ValueKind::Output => {
                    return Err(ForeignError::Call {
                        op: "write",
                        message: "outputs are read-only".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn read(&mut self, kind: ValueKind, refs: &[ValueRef], out: &mut [f64]) -> ForeignResult<()> {
        if refs.len() != out.len() {
            return Err(ForeignError::Dimension {
                what: "runtime read",
                expected: refs.len(),
                got: out.len(),
            });
        }
        match kind {
            ValueKind::Output => {
                let mut y = vec![0.0; self.output_names.len()];
                (&*self.output)(&mut y, &self.x, &self.u, self.t_last);
                for (&vr, o) in refs.iter().zip(out.iter_mut()) {
                    *o = y[self.slot(kind, vr, "read")?];
                }
            }
            ValueKind::State => {
                for (&vr, o) in refs.iter().zip(out.iter_mut()) {
                    *o = self.x[self.slot(kind, vr, "read")?];
                }
            }
            ValueKind::Input => {
                for (&vr, o) in refs.iter().zip(out.iter_mut()) {
                    *o = self.u[self.slot(kind, vr, "read")?];
                }
            }
        }
        Ok(())
    }

    fn derivatives(&mut self, t: f64, out: &mut [f64]) -> ForeignResult<()> {
        if out.len() != self.x.len() {
            return Err(ForeignError::Dimension {
                what: "runtime derivatives",
                expected: self.x.len(),
                got: out.len(),
            });
        }
        self.t_last = t;
        (&*self.derivative)(out, &self.x, &self.u, t);
        Ok(())
    }

    fn indicator_count(&self) -> usize {
        self.indicator_count
    }

    fn event_indicators(&mut self, t: f64, out: &mut [f64]) -> ForeignResult<()> {
        if out.len() != self.indicator_count {
            return Err(ForeignError::Dimension {
                what: "runtime event indicators",
                expected: self.indicator_count,
                got: out.len(),
            });
        }
        self.t_last = t;
        (&*self.indicators)(out, &self.x, &self.u, t);
        Ok(())
    }

    fn apply_event(&mut self, trigger: EventTrigger, t: f64) -> ForeignResult<()> {
        self.t_last = t;
        (&*self.on_event)(trigger, &mut self.x, &mut self.u, t);
        Ok(())
    }

    fn next_event_time(&mut self, t: f64) -> ForeignResult<Option<f64>> {
        Ok(self.schedule.iter().copied().find(|&te| te > t))
    }

    fn completed_step(&mut self, t: f64) -> ForeignResult<bool> {
        self.t_last = t;
        Ok((&*self.step_check)(&self.x, t))
    }
}

/// Loader producing scripted runtimes from a factory closure.
pub struct MockLoader<F> {
    factory: F,
}

impl<F> MockLoader<F>
where
    F: Fn(&str, TimeSpan) -> ForeignResult<MockRuntime>,
{
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

impl<F> RuntimeLoader for MockLoader<F>
where
    F: Fn(&str, TimeSpan) -> ForeignResult<MockRuntime>,
{
    fn open(&self, locator: &str, span: TimeSpan) -> ForeignResult<Box<dyn ModelRuntime>> {
        Ok(Box::new((self.factory)(locator, span)?))
    }
}
