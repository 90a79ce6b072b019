//! Composition of model specifications into one simulatable system.
//!
//! `create_models` assigns non-overlapping buffer windows and builds one
//! adapter per specification; `dynamics` merges the adapters into a
//! single derivative function plus the command-execution surface the
//! integrator's event loop drives. Linking and output flushing are
//! step-completion commands.

use hb_core::TimeSpan;
use hb_foreign::{ForeignModelCache, RuntimeLoader};
use hb_model::{ModelAdapter, ModelError, ModelSpec, SpecKind};
use tracing::debug;

use crate::callbacks::{self, Callback, CallbackFamily, EventOutcome};
use crate::error::{ComposeError, ComposeResult};
use crate::layout::{AddressMap, Placement, assign_windows};

/// Convert one specification into an adapter with windows starting at
/// the given buffer offsets.
pub fn create_model(
    spec: ModelSpec,
    loader: &dyn RuntimeLoader,
    state_offset: usize,
    io_offset: usize,
    span: TimeSpan,
) -> ComposeResult<ModelAdapter> {
    let placement = assign_windows(std::slice::from_ref(&spec), state_offset, io_offset)[0];
    build_adapter(spec, placement, loader, span)
}

/// Convert a sequence of specifications into adapters with contiguous,
/// non-overlapping windows, in specification order.
pub fn create_models(
    specs: Vec<ModelSpec>,
    loader: &dyn RuntimeLoader,
    state_offset: usize,
    io_offset: usize,
    span: TimeSpan,
) -> ComposeResult<Vec<ModelAdapter>> {
    let placements = assign_windows(&specs, state_offset, io_offset);
    specs
        .into_iter()
        .zip(placements)
        .map(|(spec, placement)| build_adapter(spec, placement, loader, span))
        .collect()
}

fn build_adapter(
    spec: ModelSpec,
    placement: Placement,
    loader: &dyn RuntimeLoader,
    span: TimeSpan,
) -> ComposeResult<ModelAdapter> {
    let (inputs, outputs, states, kind) = spec.into_parts();
    debug!(
        states = states.len(),
        io = inputs.len() + outputs.len(),
        state_offset = placement.state.offset,
        io_offset = placement.inputs.offset,
        "placing model"
    );
    let adapter = match kind {
        SpecKind::Analytic {
            derivative,
            output,
            events,
        } => ModelAdapter::analytic(
            derivative,
            output,
            events,
            placement.state,
            placement.inputs,
            placement.outputs,
        )?,
        SpecKind::Foreign {
            locator,
            parameters,
        } => {
            let cache = ForeignModelCache::open(
                loader,
                &locator,
                span,
                &inputs,
                &outputs,
                &states,
                parameters.as_ref(),
            )
            .map_err(ModelError::from)?;
            ModelAdapter::foreign(cache, placement.state, placement.inputs, placement.outputs)?
        }
    };
    Ok(adapter)
}

/// Merge an ordered collection of adapters into a single derivative
/// function over the full shared state buffer.
pub fn dynamics(models: Vec<ModelAdapter>) -> Dynamics {
    Dynamics::new(models)
}

/// The merged system: owns every adapter and executes callback commands
/// against them.
///
/// Adapters never interact during a derivative evaluation except through
/// already-resolved io values. All methods are synchronous and must be
/// driven by a single integrator (no internal locking; exclusive
/// ownership instead).
pub struct Dynamics {
    models: Vec<ModelAdapter>,
}

impl Dynamics {
    pub fn new(models: Vec<ModelAdapter>) -> Self {
        Self { models }
    }

    pub fn models(&self) -> &[ModelAdapter] {
        &self.models
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// Required state buffer length (one past the last assigned index).
    pub fn state_len(&self) -> usize {
        self.models
            .iter()
            .map(|m| m.state_window().end())
            .max()
            .unwrap_or(0)
    }

    /// Required io buffer length.
    pub fn io_len(&self) -> usize {
        self.models
            .iter()
            .map(|m| m.io_window().end())
            .max()
            .unwrap_or(0)
    }

    /// Evaluate the combined derivative: every adapter writes its own
    /// state window of `dxdt` and nothing else.
    pub fn eval(
        &mut self,
        dxdt: &mut [f64],
        state: &[f64],
        io: &[f64],
        t: f64,
    ) -> ComposeResult<()> {
        for model in &mut self.models {
            model.evaluate_derivative(dxdt, state, io, t)?;
        }
        Ok(())
    }

    /// The merged callback command set of every adapter.
    ///
    /// Ordering among simultaneous time/continuous events is owned by
    /// the integrator's event queue; Step commands are expected to run
    /// after event resolution for the step.
    pub fn callbacks(&self) -> Vec<Callback> {
        self.models
            .iter()
            .enumerate()
            .flat_map(|(i, m)| callbacks::callbacks(i, m))
            .collect()
    }

    /// Next scheduled event time strictly after `t` for a Time command.
    pub fn next_event_time(&mut self, cb: &Callback, t: f64) -> ComposeResult<Option<f64>> {
        expect_family(cb, CallbackFamily::Time)?;
        Ok(self.model_mut(cb)?.next_event_time(t)?)
    }

    /// Evaluate a Continuous command's indicator vector into `out`.
    pub fn eval_indicators(
        &mut self,
        cb: &Callback,
        out: &mut [f64],
        state: &[f64],
        io: &[f64],
        t: f64,
    ) -> ComposeResult<()> {
        expect_family(cb, CallbackFamily::Continuous)?;
        Ok(self.model_mut(cb)?.eval_indicators(out, state, io, t)?)
    }

    /// Evaluate a Discrete command's condition at a solver-checked point.
    pub fn check_discrete(
        &mut self,
        cb: &Callback,
        state: &[f64],
        io: &[f64],
        t: f64,
    ) -> ComposeResult<bool> {
        expect_family(cb, CallbackFamily::Discrete)?;
        Ok(self.model_mut(cb)?.check_discrete(state, io, t)?)
    }

    /// Execute an event response. For Continuous commands `event` is the
    /// indicator index that crossed zero; other families ignore it.
    pub fn apply_event(
        &mut self,
        cb: &Callback,
        event: usize,
        state: &mut [f64],
        io: &mut [f64],
        t: f64,
    ) -> ComposeResult<EventOutcome> {
        let model = self.model_mut(cb)?;
        let changed = match cb.family {
            CallbackFamily::Time => model.apply_time_event(state, io, t)?,
            CallbackFamily::Continuous => model.apply_continuous_event(event, state, io, t)?,
            CallbackFamily::Discrete => model.apply_discrete_event(state, io, t)?,
            CallbackFamily::Step => {
                return Err(ComposeError::Configuration {
                    what: "step commands execute via run_step, not apply_event".to_string(),
                });
            }
        };
        Ok(EventOutcome::from_flag(changed))
    }

    /// Execute a Step command after an accepted step. The outcome is
    /// `StateChanged` when the model demanded an event update that
    /// reassigned state.
    pub fn run_step(
        &mut self,
        cb: &Callback,
        state: &mut [f64],
        io: &mut [f64],
        t: f64,
    ) -> ComposeResult<EventOutcome> {
        expect_family(cb, CallbackFamily::Step)?;
        let changed = self.model_mut(cb)?.completed_step(state, io, t)?;
        Ok(EventOutcome::from_flag(changed))
    }

    /// Write every adapter's outputs into the io buffer, in composition
    /// order. This is the body of the output callback.
    pub fn write_outputs(&mut self, state: &[f64], io: &mut [f64], t: f64) -> ComposeResult<()> {
        for model in &mut self.models {
            model.evaluate_output(state, io, t)?;
        }
        Ok(())
    }

    fn model_mut(&mut self, cb: &Callback) -> ComposeResult<&mut ModelAdapter> {
        let count = self.models.len();
        self.models
            .get_mut(cb.model)
            .ok_or_else(|| ComposeError::Configuration {
                what: format!("callback references model {} of {count}", cb.model),
            })
    }
}

fn expect_family(cb: &Callback, family: CallbackFamily) -> ComposeResult<()> {
    if cb.family != family {
        return Err(ComposeError::Configuration {
            what: format!("expected {family:?} callback, got {:?}", cb.family),
        });
    }
    Ok(())
}

/// Step-completion command that flushes every model's outputs after each
/// accepted step, once all states for that step are finalized.
#[derive(Clone, Copy, Debug, Default)]
pub struct OutputCallback;

impl OutputCallback {
    pub fn run(
        &self,
        models: &mut Dynamics,
        state: &[f64],
        io: &mut [f64],
        t: f64,
    ) -> ComposeResult<()> {
        models.write_outputs(state, io, t)
    }
}

/// The output-flushing step command.
pub fn output_callback() -> OutputCallback {
    OutputCallback
}

/// Step-completion command copying source io values to destination io
/// values after every accepted step.
///
/// All sources are gathered before any destination is written, so copies
/// within one callback are simultaneous. Feedback through a link still
/// sees the prior step's value (one-step lag); algebraic loops are not
/// resolved here.
#[derive(Clone, Debug)]
pub struct LinkCallback {
    src: Vec<usize>,
    dst: Vec<usize>,
    scratch: Vec<f64>,
}

impl LinkCallback {
    /// Number of linked value pairs.
    pub fn len(&self) -> usize {
        self.src.len()
    }

    pub fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    /// Copy source values to destinations, preserving order.
    pub fn execute(&mut self, io: &mut [f64]) -> ComposeResult<()> {
        for (slot, &s) in self.scratch.iter_mut().zip(&self.src) {
            *slot = *io.get(s).ok_or_else(|| link_oob("source", s, io.len()))?;
        }
        let io_len = io.len();
        for (&d, &v) in self.dst.iter().zip(&self.scratch) {
            *io.get_mut(d).ok_or_else(|| link_oob("destination", d, io_len))? = v;
        }
        Ok(())
    }
}

fn link_oob(which: &str, index: usize, len: usize) -> ComposeError {
    ComposeError::Configuration {
        what: format!("link {which} index {index} outside io buffer of length {len}"),
    }
}

/// Connect model io by machine-readable indices: after every accepted
/// step, `io[dst[i]] = io[src[i]]`.
pub fn link_models(src: &[usize], dst: &[usize]) -> ComposeResult<LinkCallback> {
    if src.len() != dst.len() {
        return Err(ComposeError::Cardinality {
            what: "link_models",
            src: src.len(),
            dst: dst.len(),
        });
    }
    Ok(LinkCallback {
        src: src.to_vec(),
        dst: dst.to_vec(),
        scratch: vec![0.0; src.len()],
    })
}

/// Connect model io by human-readable names resolved through the
/// composition's io address map.
pub fn link_models_named(
    src: &[&str],
    dst: &[&str],
    io_map: &AddressMap,
) -> ComposeResult<LinkCallback> {
    if src.len() != dst.len() {
        return Err(ComposeError::Cardinality {
            what: "link_models",
            src: src.len(),
            dst: dst.len(),
        });
    }
    link_models(&io_map.resolve(src)?, &io_map.resolve(dst)?)
}
