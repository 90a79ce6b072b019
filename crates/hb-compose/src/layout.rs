//! Buffer allocation: disjoint address windows and name→index maps.
//!
//! Windows are laid out contiguously in specification order — window
//! `i + 1` begins exactly where window `i` ends, after the caller's
//! starting offset for the whole composition. The allocator only computes
//! placements; it never touches buffer contents.

use std::collections::HashMap;

use hb_core::Window;
use hb_model::ModelSpec;

use crate::error::{ComposeError, ComposeResult};

/// Address windows assigned to one model: its state window and its input
/// and output sub-windows within the io buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Placement {
    pub state: Window,
    pub inputs: Window,
    pub outputs: Window,
}

impl Placement {
    /// Combined io window.
    pub fn io(&self) -> Window {
        Window::new(self.inputs.offset, self.inputs.len + self.outputs.len)
    }
}

/// Human-readable name → flat buffer index, one map per buffer kind.
///
/// Built once per composition and read-only afterward. Names of later
/// specifications shadow equal names of earlier ones; names are only
/// guaranteed unique within one specification.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AddressMap {
    map: HashMap<String, usize>,
}

impl AddressMap {
    /// Resolve a name to its buffer index.
    pub fn index(&self, name: &str) -> ComposeResult<usize> {
        self.map
            .get(name)
            .copied()
            .ok_or_else(|| ComposeError::UnknownName {
                name: name.to_string(),
            })
    }

    /// Resolve a sequence of names, preserving order.
    pub fn resolve(&self, names: &[&str]) -> ComposeResult<Vec<usize>> {
        names.iter().map(|n| self.index(n)).collect()
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.map.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.map.iter().map(|(k, &v)| (k.as_str(), v))
    }

    fn extend_names(&mut self, names: &[String], window: Window) {
        for (i, name) in names.iter().enumerate() {
            self.map.insert(name.clone(), window.offset + i);
        }
    }
}

/// Assign contiguous, pairwise-disjoint windows to each specification,
/// starting at the given buffer offsets.
pub fn assign_windows(
    specs: &[ModelSpec],
    state_offset: usize,
    io_offset: usize,
) -> Vec<Placement> {
    let mut placements = Vec::with_capacity(specs.len());
    let mut next_state = state_offset;
    let mut next_io = io_offset;
    for spec in specs {
        let state = Window::new(next_state, spec.state_len());
        let inputs = Window::new(next_io, spec.input_len());
        let outputs = Window::new(inputs.end(), spec.output_len());
        next_state = state.end();
        next_io = outputs.end();
        placements.push(Placement {
            state,
            inputs,
            outputs,
        });
    }
    placements
}

/// Build the io and state address maps for a sequence of specifications.
///
/// Returns `(io_map, state_map)`. Indices follow the same contiguous
/// layout as [`assign_windows`], so the maps agree with the windows the
/// composition layer assigns.
pub fn address_map(
    specs: &[ModelSpec],
    state_offset: usize,
    io_offset: usize,
) -> (AddressMap, AddressMap) {
    let placements = assign_windows(specs, state_offset, io_offset);
    let mut io_map = AddressMap::default();
    let mut state_map = AddressMap::default();
    for (spec, placement) in specs.iter().zip(&placements) {
        io_map.extend_names(spec.inputs(), placement.inputs);
        io_map.extend_names(spec.outputs(), placement.outputs);
        state_map.extend_names(spec.states(), placement.state);
    }
    (io_map, state_map)
}

/// Address maps for a single specification.
pub fn single_address_map(
    spec: &ModelSpec,
    state_offset: usize,
    io_offset: usize,
) -> (AddressMap, AddressMap) {
    address_map(std::slice::from_ref(spec), state_offset, io_offset)
}
