// src/action/model.rs

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Free-form key/value results produced by a handler run.
pub type Outputs = BTreeMap<String, serde_json::Value>;

/// The four kinds of unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Build,
    Deploy,
    Test,
    Run,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Build => "build",
            ActionKind::Deploy => "deploy",
            ActionKind::Test => "test",
            ActionKind::Run => "run",
        }
    }

    /// The intent a task for an action of this kind carries when it is
    /// pulled in as a dependency.
    pub fn natural_intent(&self) -> Intent {
        match self {
            ActionKind::Build => Intent::Build,
            ActionKind::Deploy => Intent::Deploy,
            ActionKind::Test => Intent::Test,
            ActionKind::Run => Intent::Run,
        }
    }

    pub const ALL: [ActionKind; 4] = [
        ActionKind::Build,
        ActionKind::Deploy,
        ActionKind::Test,
        ActionKind::Run,
    ];
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "build" => Ok(ActionKind::Build),
            "deploy" => Ok(ActionKind::Deploy),
            "test" => Ok(ActionKind::Test),
            "run" => Ok(ActionKind::Run),
            other => Err(format!(
                "invalid action kind: {other} (expected build, deploy, test or run)"
            )),
        }
    }
}

/// What a task is asked to do with its action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Build,
    Deploy,
    Test,
    Run,
    /// Tear down whatever a deploy created.
    Delete,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Build => "build",
            Intent::Deploy => "deploy",
            Intent::Test => "test",
            Intent::Run => "run",
            Intent::Delete => "delete",
        }
    }

    /// Whether a successful result stays true until the version changes.
    /// A delete only holds until the next deploy, so it is never cached.
    pub fn is_cacheable(&self) -> bool {
        *self != Intent::Delete
    }

    /// The intent whose effect a success of this one undoes.
    pub fn reverses(&self) -> Option<Intent> {
        match self {
            Intent::Deploy => Some(Intent::Delete),
            Intent::Delete => Some(Intent::Deploy),
            _ => None,
        }
    }

    /// Whether a task with this intent may be requested on an action of `kind`.
    pub fn applies_to(&self, kind: ActionKind) -> bool {
        match self {
            Intent::Delete => kind == ActionKind::Deploy,
            other => kind.natural_intent() == *other,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "build" => Ok(Intent::Build),
            "deploy" => Ok(Intent::Deploy),
            "test" => Ok(Intent::Test),
            "run" => Ok(Intent::Run),
            "delete" | "cleanup" => Ok(Intent::Delete),
            other => Err(format!("invalid intent: {other}")),
        }
    }
}

/// Reference to an action, written `kind:name` (e.g. `build:api`).
///
/// Names are unique per kind, so this is enough to identify an action within
/// one project.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActionRef {
    pub kind: ActionKind,
    pub name: String,
}

impl ActionRef {
    pub fn new(kind: ActionKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

impl FromStr for ActionRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once([':', '.'])
            .ok_or_else(|| format!("invalid action reference '{s}' (expected kind:name)"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("invalid action reference '{s}': empty name"));
        }
        Ok(ActionRef::new(kind.parse()?, name))
    }
}

impl TryFrom<String> for ActionRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ActionRef> for String {
    fn from(value: ActionRef) -> Self {
        value.to_string()
    }
}

/// Whether a dependency gates the action's inputs or only its execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyMode {
    /// Must be built/resolved before this action's static inputs are known.
    Build,
    /// Must reach a successful terminal state before this action executes.
    Runtime,
}

impl DependencyMode {
    /// Mode used when the configuration does not say: dependencies on build
    /// actions are build-time, everything else is run-time.
    pub fn default_for(target: ActionKind) -> Self {
        match target {
            ActionKind::Build => DependencyMode::Build,
            _ => DependencyMode::Runtime,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub target: ActionRef,
    pub mode: DependencyMode,
    /// The dependent reads values only available after the dependency ran.
    #[serde(default)]
    pub needs_outputs: bool,
}

impl Dependency {
    pub fn new(target: ActionRef) -> Self {
        let mode = DependencyMode::default_for(target.kind);
        Self {
            target,
            mode,
            needs_outputs: false,
        }
    }
}

/// Inputs that determine an action's own (non-transitive) identity.
///
/// Both maps are ordered so that hashing them is independent of the order in
/// which files were discovered or values declared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInputs {
    /// Relative path (forward slashes) -> content hash.
    pub files: BTreeMap<String, String>,
    /// Declared config key -> canonical value.
    pub values: BTreeMap<String, String>,
}

/// Live code synchronization into a running workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSpec {
    /// Source patterns whose changes may be synced instead of redeployed.
    #[serde(default)]
    pub include: Vec<String>,
    /// Handler-specific destination (container path, pod path...).
    pub target: String,
}

/// A normalized unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub reference: ActionRef,
    /// Handler type, e.g. `container`, `helm`, `exec`.
    pub action_type: String,
    /// Handler-specific configuration. Opaque to the core.
    pub spec: serde_json::Value,
    pub dependencies: Vec<Dependency>,
    pub source_inputs: SourceInputs,
    /// Source patterns (relative to the project root) owned by this action.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub disabled: bool,
    pub sync: Option<SyncSpec>,
}

impl Action {
    pub fn new(kind: ActionKind, action_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            reference: ActionRef::new(kind, name),
            action_type: action_type.into(),
            spec: serde_json::Value::Null,
            dependencies: Vec::new(),
            source_inputs: SourceInputs::default(),
            include: Vec::new(),
            exclude: Vec::new(),
            disabled: false,
            sync: None,
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.reference.kind
    }

    pub fn name(&self) -> &str {
        &self.reference.name
    }

    /// Whether this action can push file changes into a running workload.
    pub fn supports_sync(&self) -> bool {
        self.kind() == ActionKind::Deploy && self.sync.is_some()
    }
}

/// All actions of a project, keyed by reference.
#[derive(Debug, Clone, Default)]
pub struct ActionSet {
    actions: BTreeMap<ActionRef, Arc<Action>>,
}

impl ActionSet {
    /// Collect actions, rejecting duplicate references.
    pub fn from_actions<I>(actions: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = Action>,
    {
        let mut map = BTreeMap::new();
        for action in actions {
            let reference = action.reference.clone();
            if map.insert(reference.clone(), Arc::new(action)).is_some() {
                return Err(ConfigError::DuplicateAction(reference));
            }
        }
        Ok(Self { actions: map })
    }

    pub fn get(&self, reference: &ActionRef) -> Option<&Arc<Action>> {
        self.actions.get(reference)
    }

    pub fn contains(&self, reference: &ActionRef) -> bool {
        self.actions.contains_key(reference)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Action>> {
        self.actions.values()
    }

    pub fn references(&self) -> impl Iterator<Item = &ActionRef> {
        self.actions.keys()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Replace the file hashes of an action. Returns `false` if unknown.
    pub fn set_source_files(
        &mut self,
        reference: &ActionRef,
        files: BTreeMap<String, String>,
    ) -> bool {
        match self.actions.get_mut(reference) {
            Some(action) => {
                Arc::make_mut(action).source_inputs.files = files;
                true
            }
            None => false,
        }
    }
}
