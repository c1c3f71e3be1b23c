// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::action::{ActionKind, ActionRef, DependencyMode, SyncSpec};
use crate::types::{CacheStorageMode, FailureMode};

/// Project file as read from TOML, before validation.
///
/// ```toml
/// [config]
/// concurrency = 4
/// failure_mode = "fail-fast"
///
/// [default]
/// exclude = ["**/.git/**"]
///
/// [[action]]
/// kind = "build"
/// type = "exec"
/// name = "api"
/// include = ["api/**"]
/// spec = { command = "make -C api" }
/// dependencies = ["build:base"]
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawProjectConfig {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub default: DefaultSection,

    /// All `[[action]]` entries, in declaration order.
    #[serde(default, rename = "action")]
    pub actions: Vec<ActionConfig>,
}

/// `[config]` section: how runs behave.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// Maximum number of handlers running at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub failure_mode: FailureMode,

    /// `"memory"` (default) or `"file"`.
    #[serde(default)]
    pub cache: CacheStorageMode,

    /// Time in-flight handlers get to stop after cancellation.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Quiet window that closes a batch of file changes in watch mode.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_concurrency() -> usize {
    4
}

fn default_grace_period_ms() -> u64 {
    5_000
}

fn default_debounce_ms() -> u64 {
    250
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            failure_mode: FailureMode::default(),
            cache: CacheStorageMode::default(),
            grace_period_ms: default_grace_period_ms(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// `[default]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultSection {
    /// Exclude patterns appended to every action's own excludes.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// One `[[action]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionConfig {
    pub kind: ActionKind,

    /// Handler type, e.g. `"exec"`.
    #[serde(rename = "type")]
    pub action_type: String,

    pub name: String,

    #[serde(default)]
    pub include: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,

    /// Handler-specific settings, passed through untouched.
    #[serde(default)]
    pub spec: serde_json::Value,

    #[serde(default)]
    pub dependencies: Vec<DependencyConfig>,

    /// Declared values that are part of the action's identity.
    #[serde(default)]
    pub variables: BTreeMap<String, toml::Value>,

    #[serde(default)]
    pub disabled: bool,

    /// Live sync; only valid on deploy actions.
    #[serde(default)]
    pub sync: Option<SyncSpec>,
}

/// A dependency, either as a bare `"kind:name"` string or as a table.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DependencyConfig {
    Ref(ActionRef),
    Detailed {
        #[serde(rename = "ref")]
        target: ActionRef,
        /// Defaults to `build` for build actions, `runtime` otherwise.
        #[serde(default)]
        mode: Option<DependencyMode>,
        #[serde(default)]
        needs_outputs: bool,
    },
}

impl DependencyConfig {
    pub fn target(&self) -> &ActionRef {
        match self {
            DependencyConfig::Ref(target) => target,
            DependencyConfig::Detailed { target, .. } => target,
        }
    }
}
