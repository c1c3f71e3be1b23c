// src/action/mod.rs

//! The normalized action model.
//!
//! Actions are produced by the project loader (or any external resolver) and
//! are treated as opaque units of work by everything downstream: only their
//! references, dependencies and fingerprint inputs are interpreted here.

pub mod model;

pub use model::{
    Action, ActionKind, ActionRef, ActionSet, Dependency, DependencyMode, Intent, Outputs,
    SourceInputs, SyncSpec,
};
