//! Composition of hybrid models into one solver-ready system.
//!
//! Provides:
//! - Buffer allocation: contiguous, disjoint address windows per model
//!   plus human-readable address maps
//! - `create_models`: specifications → adapters with assigned windows
//! - Event callback generation as explicit command objects
//! - `dynamics`: one merged derivative function and the command-execution
//!   surface for the integrator's event loop
//! - Linking and output-flushing step commands

pub mod callbacks;
pub mod composition;
pub mod error;
pub mod layout;

pub use callbacks::{Callback, CallbackFamily, EventOutcome};
pub use composition::{
    Dynamics, LinkCallback, OutputCallback, create_model, create_models, dynamics, link_models,
    link_models_named, output_callback,
};
pub use error::{ComposeError, ComposeResult};
pub use layout::{AddressMap, Placement, address_map, assign_windows, single_address_map};
