//! Preallocated call cache for one foreign model instance.
//!
//! Every foreign call needs variable references and contiguous value
//! arrays in the runtime's own representation. The cache resolves all
//! references once at construction and owns fixed-size scratch arrays,
//! so repeated calls on the simulation hot path require no allocation.

use std::collections::BTreeMap;

use hb_core::TimeSpan;
use tracing::debug;

use crate::error::{ForeignError, ForeignResult};
use crate::runtime::{EventTrigger, ModelRuntime, RuntimeLoader, ValueKind, ValueRef};

/// Scratch buffers and resolved references for one foreign runtime
/// instance.
///
/// Reference vectors are positioned to match the order of the declared
/// name sequences exactly: index `i` in a name sequence corresponds to
/// reference `i`. The runtime instance is closed when the cache is
/// dropped.
///
/// Not reentrant; a cache must only be driven by one call site at a time.
pub struct ForeignModelCache {
    runtime: Box<dyn ModelRuntime>,
    input_refs: Vec<ValueRef>,
    output_refs: Vec<ValueRef>,
    state_refs: Vec<ValueRef>,
    inputs: Vec<f64>,
    outputs: Vec<f64>,
    states: Vec<f64>,
    derivatives: Vec<f64>,
    indicators: Vec<f64>,
}

impl std::fmt::Debug for ForeignModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignModelCache")
            .field("input_refs", &self.input_refs)
            .field("output_refs", &self.output_refs)
            .field("state_refs", &self.state_refs)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("states", &self.states)
            .field("derivatives", &self.derivatives)
            .field("indicators", &self.indicators)
            .finish_non_exhaustive()
    }
}

impl ForeignModelCache {
    /// Open a runtime instance for `locator` and prepare it for calls.
    ///
    /// Resolves a reference for every declared input/output/state name,
    /// applies parameter overrides, and sizes the scratch arrays. Fails
    /// with a Resolution error if a name is unknown to the runtime and
    /// with an UnknownParameter error if an override key is not a model
    /// parameter.
    pub fn open(
        loader: &dyn RuntimeLoader,
        locator: &str,
        span: TimeSpan,
        input_names: &[String],
        output_names: &[String],
        state_names: &[String],
        parameters: Option<&BTreeMap<String, f64>>,
    ) -> ForeignResult<Self> {
        let mut runtime = loader.open(locator, span)?;

        let input_refs = resolve_all(runtime.as_mut(), ValueKind::Input, input_names)?;
        let output_refs = resolve_all(runtime.as_mut(), ValueKind::Output, output_names)?;
        let state_refs = resolve_all(runtime.as_mut(), ValueKind::State, state_names)?;

        if let Some(overrides) = parameters {
            for (name, value) in overrides {
                runtime.set_parameter(name, *value)?;
            }
        }

        let indicator_count = runtime.indicator_count();
        debug!(
            locator,
            inputs = input_refs.len(),
            outputs = output_refs.len(),
            states = state_refs.len(),
            indicators = indicator_count,
            "opened foreign model"
        );

        Ok(Self {
            runtime,
            inputs: vec![0.0; input_refs.len()],
            outputs: vec![0.0; output_refs.len()],
            states: vec![0.0; state_refs.len()],
            derivatives: vec![0.0; state_refs.len()],
            indicators: vec![0.0; indicator_count],
            input_refs,
            output_refs,
            state_refs,
        })
    }

    pub fn input_len(&self) -> usize {
        self.input_refs.len()
    }

    pub fn output_len(&self) -> usize {
        self.output_refs.len()
    }

    pub fn state_len(&self) -> usize {
        self.state_refs.len()
    }

    pub fn indicator_count(&self) -> usize {
        self.indicators.len()
    }

    /// Last state values marshaled to or from the runtime.
    pub fn states(&self) -> &[f64] {
        &self.states
    }

    /// Marshal a state-window slice into the runtime.
    pub fn write_state(&mut self, values: &[f64]) -> ForeignResult<()> {
        copy_checked(&mut self.states, values, "state write")?;
        self.runtime
            .write(ValueKind::State, &self.state_refs, &self.states)
    }

    /// Marshal an input-window slice into the runtime.
    pub fn write_inputs(&mut self, values: &[f64]) -> ForeignResult<()> {
        copy_checked(&mut self.inputs, values, "input write")?;
        self.runtime
            .write(ValueKind::Input, &self.input_refs, &self.inputs)
    }

    /// Read the model outputs for the values last written.
    pub fn read_outputs(&mut self) -> ForeignResult<&[f64]> {
        self.runtime
            .read(ValueKind::Output, &self.output_refs, &mut self.outputs)?;
        Ok(&self.outputs)
    }

    /// Evaluate state derivatives at time `t`.
    pub fn derivatives(&mut self, t: f64) -> ForeignResult<&[f64]> {
        self.runtime.derivatives(t, &mut self.derivatives)?;
        Ok(&self.derivatives)
    }

    /// Evaluate the continuous event indicator vector at time `t`.
    pub fn event_indicators(&mut self, t: f64) -> ForeignResult<&[f64]> {
        self.runtime.event_indicators(t, &mut self.indicators)?;
        Ok(&self.indicators)
    }

    /// Let the runtime resolve a discontinuity, then read the reassigned
    /// continuous states back. Returns the refreshed state values.
    pub fn apply_event(&mut self, trigger: EventTrigger, t: f64) -> ForeignResult<&[f64]> {
        self.runtime.apply_event(trigger, t)?;
        self.runtime
            .read(ValueKind::State, &self.state_refs, &mut self.states)?;
        Ok(&self.states)
    }

    /// Next scheduled time event strictly after `t`, if any.
    pub fn next_event_time(&mut self, t: f64) -> ForeignResult<Option<f64>> {
        self.runtime.next_event_time(t)
    }

    /// Notify the runtime of an accepted step. Returns `true` if the
    /// runtime demands an event update.
    pub fn completed_step(&mut self, t: f64) -> ForeignResult<bool> {
        self.runtime.completed_step(t)
    }

    /// Whether `current` differs from the inputs last marshaled in.
    ///
    /// Input-driven discontinuities are detected against the cache, not
    /// the runtime: the runtime only ever sees inputs through this cache.
    pub fn inputs_changed(&self, current: &[f64]) -> ForeignResult<bool> {
        if current.len() != self.inputs.len() {
            return Err(ForeignError::Dimension {
                what: "input change check",
                expected: self.inputs.len(),
                got: current.len(),
            });
        }
        Ok(current.iter().zip(&self.inputs).any(|(a, b)| a != b))
    }
}

fn resolve_all(
    runtime: &mut dyn ModelRuntime,
    kind: ValueKind,
    names: &[String],
) -> ForeignResult<Vec<ValueRef>> {
    names
        .iter()
        .map(|name| runtime.resolve(kind, name))
        .collect()
}

fn copy_checked(dst: &mut [f64], src: &[f64], what: &'static str) -> ForeignResult<()> {
    if src.len() != dst.len() {
        return Err(ForeignError::Dimension {
            what,
            expected: dst.len(),
            got: src.len(),
        });
    }
    dst.copy_from_slice(src);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockLoader, MockRuntime};

    fn ball_runtime() -> MockRuntime {
        MockRuntime::new(&[], &[], &["h", "v"])
            .with_parameter("g", 9.81)
            .with_derivative(|dx, x, _u, _t| {
                dx[0] = x[1];
                dx[1] = -9.81;
            })
    }

    fn open_ball(parameters: Option<&BTreeMap<String, f64>>) -> ForeignResult<ForeignModelCache> {
        let loader = MockLoader::new(|_, _| Ok(ball_runtime()));
        ForeignModelCache::open(
            &loader,
            "ball",
            TimeSpan::default(),
            &[],
            &[],
            &["h".into(), "v".into()],
            parameters,
        )
    }

    #[test]
    fn open_sizes_scratch_to_name_counts() {
        let cache = open_ball(None).unwrap();
        assert_eq!(cache.input_len(), 0);
        assert_eq!(cache.output_len(), 0);
        assert_eq!(cache.state_len(), 2);
        assert_eq!(cache.indicator_count(), 0);
    }

    #[test]
    fn unknown_state_name_fails_resolution() {
        let loader = MockLoader::new(|_, _| Ok(ball_runtime()));
        let err = ForeignModelCache::open(
            &loader,
            "ball",
            TimeSpan::default(),
            &[],
            &[],
            &["h".into(), "bogus".into()],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ForeignError::Resolution { name } if name == "bogus"));
    }

    #[test]
    fn unknown_parameter_fails_configuration() {
        let mut overrides = BTreeMap::new();
        overrides.insert("not_a_param".to_string(), 1.0);
        let err = open_ball(Some(&overrides)).unwrap_err();
        assert!(matches!(err, ForeignError::UnknownParameter { name } if name == "not_a_param"));
    }

    #[test]
    fn derivative_round_trip() {
        let mut cache = open_ball(None).unwrap();
        cache.write_state(&[10.0, -3.0]).unwrap();
        let dx = cache.derivatives(0.0).unwrap();
        assert_eq!(dx, &[-3.0, -9.81]);
    }

    #[test]
    fn write_state_length_mismatch_is_dimension_error() {
        let mut cache = open_ball(None).unwrap();
        let err = cache.write_state(&[1.0]).unwrap_err();
        assert!(matches!(err, ForeignError::Dimension { .. }));
    }

    #[test]
    fn apply_event_reads_back_reassigned_state() {
        let runtime = ball_runtime().with_event_handler(|_trigger, x, _u, _t| {
            x[1] = -x[1];
        });
        let loader = MockLoader::new(move |_, _| Ok(runtime.clone_config()));
        let mut cache = ForeignModelCache::open(
            &loader,
            "ball",
            TimeSpan::default(),
            &[],
            &[],
            &["h".into(), "v".into()],
            None,
        )
        .unwrap();

        cache.write_state(&[0.0, -4.0]).unwrap();
        let states = cache.apply_event(EventTrigger::Indicator(0), 0.5).unwrap();
        assert_eq!(states, &[0.0, 4.0]);
    }

    #[test]
    fn input_change_detected_against_last_marshaled() {
        let runtime = MockRuntime::new(&["u"], &[], &["x"]).with_derivative(|dx, _x, u, _t| {
            dx[0] = u[0];
        });
        let loader = MockLoader::new(move |_, _| Ok(runtime.clone_config()));
        let mut cache = ForeignModelCache::open(
            &loader,
            "driven",
            TimeSpan::default(),
            &["u".into()],
            &[],
            &["x".into()],
            None,
        )
        .unwrap();

        cache.write_inputs(&[1.0]).unwrap();
        assert!(!cache.inputs_changed(&[1.0]).unwrap());
        assert!(cache.inputs_changed(&[2.0]).unwrap());
    }
}
