//! Immutable model descriptors consumed by the composition layer.

use std::collections::BTreeMap;

use crate::error::{ModelError, ModelResult};
use crate::events::AnalyticEvents;

/// Derivative evaluation for a native model, called as `(dx, x, u, t)`
/// with window-local slices: `dx` and `x` are the model's state window,
/// `u` its input sub-window.
pub type DerivativeFn = Box<dyn FnMut(&mut [f64], &[f64], &[f64], f64) -> ModelResult<()>>;

/// Output evaluation for a native model, called as `(y, x, u, t)`;
/// writes the output sub-window. `x` is shared, so output evaluation
/// cannot mutate state.
pub type OutputFn = Box<dyn FnMut(&mut [f64], &[f64], &[f64], f64) -> ModelResult<()>>;

/// How a specification evaluates: native closures or a foreign artifact.
pub enum SpecKind {
    /// Native hybrid ODE with optional event declarations.
    Analytic {
        derivative: DerivativeFn,
        output: OutputFn,
        events: AnalyticEvents,
    },
    /// Foreign-backed model: artifact locator plus optional parameter
    /// overrides applied at open time.
    Foreign {
        locator: String,
        parameters: Option<BTreeMap<String, f64>>,
    },
}

/// Immutable descriptor of one hybrid model: ordered input/output/state
/// names plus the evaluation capability.
///
/// Names are unique within a specification but not globally. Constructed
/// once by the caller and consumed by the composition layer to produce
/// exactly one adapter.
pub struct ModelSpec {
    inputs: Vec<String>,
    outputs: Vec<String>,
    states: Vec<String>,
    kind: SpecKind,
}

impl std::fmt::Debug for ModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSpec")
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("states", &self.states)
            .finish_non_exhaustive()
    }
}

impl ModelSpec {
    /// Native model without events.
    pub fn analytic(
        inputs: &[&str],
        outputs: &[&str],
        states: &[&str],
        derivative: DerivativeFn,
        output: OutputFn,
    ) -> ModelResult<Self> {
        Self::analytic_with_events(
            inputs,
            outputs,
            states,
            derivative,
            output,
            AnalyticEvents::none(),
        )
    }

    /// Native model with per-family event declarations.
    pub fn analytic_with_events(
        inputs: &[&str],
        outputs: &[&str],
        states: &[&str],
        derivative: DerivativeFn,
        output: OutputFn,
        events: AnalyticEvents,
    ) -> ModelResult<Self> {
        Self::build(
            inputs,
            outputs,
            states,
            SpecKind::Analytic {
                derivative,
                output,
                events,
            },
        )
    }

    /// Foreign-backed model located by `locator`.
    pub fn foreign(
        inputs: &[&str],
        outputs: &[&str],
        states: &[&str],
        locator: &str,
        parameters: Option<BTreeMap<String, f64>>,
    ) -> ModelResult<Self> {
        Self::build(
            inputs,
            outputs,
            states,
            SpecKind::Foreign {
                locator: locator.to_string(),
                parameters,
            },
        )
    }

    fn build(
        inputs: &[&str],
        outputs: &[&str],
        states: &[&str],
        kind: SpecKind,
    ) -> ModelResult<Self> {
        // States index the state buffer; inputs and outputs share the io
        // buffer, so their names must be jointly unique.
        check_unique(states, "state")?;
        let io_names: Vec<&str> = inputs.iter().chain(outputs.iter()).copied().collect();
        check_unique(&io_names, "io")?;

        Ok(Self {
            inputs: to_owned(inputs),
            outputs: to_owned(outputs),
            states: to_owned(states),
            kind,
        })
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn states(&self) -> &[String] {
        &self.states
    }

    pub fn input_len(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_len(&self) -> usize {
        self.outputs.len()
    }

    /// Length of the model's state window.
    pub fn state_len(&self) -> usize {
        self.states.len()
    }

    /// Length of the model's io window (inputs first, then outputs).
    pub fn io_len(&self) -> usize {
        self.inputs.len() + self.outputs.len()
    }

    /// Decompose into name sequences and evaluation kind. Used by the
    /// composition layer when turning a specification into an adapter.
    pub fn into_parts(self) -> (Vec<String>, Vec<String>, Vec<String>, SpecKind) {
        (self.inputs, self.outputs, self.states, self.kind)
    }
}

fn to_owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn check_unique(names: &[&str], what: &'static str) -> ModelResult<()> {
    for (i, name) in names.iter().enumerate() {
        if names[..i].contains(name) {
            return Err(ModelError::Configuration {
                what: format!("duplicate {what} name in specification: {name}"),
            });
        }
    }
    Ok(())
}
