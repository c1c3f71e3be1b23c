// src/errors.rs

//! Crate-wide error types.
//!
//! The taxonomy follows how failures propagate through a run:
//! - [`ConfigError`] is fatal and reported before anything executes.
//! - `VersionComputation` is fatal for one action and its dependents.
//! - `TaskExecution` is recorded per task; propagation is governed by
//!   [`crate::types::FailureMode`].
//! - `ToolIntegrity` is never retried.
//! - `Cancelled` is reported separately from failures.

use thiserror::Error;

use crate::action::{ActionKind, ActionRef, Intent};

/// Problems with the action model itself. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("action '{action}' depends on unknown action '{reference}'")]
    UnknownDependency {
        action: ActionRef,
        reference: ActionRef,
    },

    #[error("dependency cycle detected: {}", format_cycle(.cycle))]
    Cycle { cycle: Vec<ActionRef> },

    #[error("action '{0}' is declared more than once")]
    DuplicateAction(ActionRef),

    #[error("no handler registered for {kind} actions of type '{action_type}' (needed by '{action}')")]
    MissingHandler {
        kind: ActionKind,
        action_type: String,
        action: ActionRef,
    },

    #[error("unknown action '{0}' requested")]
    UnknownAction(ActionRef),

    #[error("cannot {intent} '{action}'")]
    UnsupportedIntent { action: ActionRef, intent: Intent },

    #[error("{0}")]
    Invalid(String),
}

fn format_cycle(cycle: &[ActionRef]) -> String {
    cycle
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Error, Debug)]
pub enum ActionGraphError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("failed to compute version of '{action}': {message}")]
    VersionComputation { action: ActionRef, message: String },

    #[error("{intent} '{action}' failed: {message}")]
    TaskExecution {
        action: ActionRef,
        intent: Intent,
        message: String,
    },

    #[error("integrity check failed for tool '{tool}': expected sha256 {expected}, got {actual}")]
    ToolIntegrity {
        tool: String,
        expected: String,
        actual: String,
    },

    #[error("run was cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ActionGraphError>;
