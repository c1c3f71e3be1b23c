#![allow(dead_code)]

use actiongraph::action::{
    Action, ActionKind, ActionRef, ActionSet, Dependency, DependencyMode, SyncSpec,
};
use actiongraph::dag::ActionGraph;

use crate::handlers::FAKE_TYPE;

/// Parse a `kind:name` reference.
pub fn aref(s: &str) -> ActionRef {
    s.parse().expect("invalid action reference in test")
}

/// Builder for [`Action`] to simplify test setup.
///
/// Actions default to the fake handler type so they resolve against
/// [`crate::RecordingHandler::registry`].
pub struct ActionBuilder {
    action: Action,
}

impl ActionBuilder {
    pub fn new(kind: ActionKind, name: &str) -> Self {
        Self {
            action: Action::new(kind, FAKE_TYPE, name),
        }
    }

    pub fn build_action(name: &str) -> Self {
        Self::new(ActionKind::Build, name)
    }

    pub fn deploy(name: &str) -> Self {
        Self::new(ActionKind::Deploy, name)
    }

    pub fn test(name: &str) -> Self {
        Self::new(ActionKind::Test, name)
    }

    pub fn run(name: &str) -> Self {
        Self::new(ActionKind::Run, name)
    }

    pub fn action_type(mut self, action_type: &str) -> Self {
        self.action.action_type = action_type.to_string();
        self
    }

    /// Depend on `reference` with the default mode for its kind.
    pub fn dep(mut self, reference: &str) -> Self {
        self.action.dependencies.push(Dependency::new(aref(reference)));
        self
    }

    pub fn dep_with(mut self, reference: &str, mode: DependencyMode, needs_outputs: bool) -> Self {
        self.action.dependencies.push(Dependency {
            target: aref(reference),
            mode,
            needs_outputs,
        });
        self
    }

    /// Depend on `reference` and read its outputs.
    pub fn needs_outputs_of(self, reference: &str) -> Self {
        let mode = DependencyMode::default_for(aref(reference).kind);
        self.dep_with(reference, mode, true)
    }

    pub fn include(mut self, pattern: &str) -> Self {
        self.action.include.push(pattern.to_string());
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.action.exclude.push(pattern.to_string());
        self
    }

    pub fn spec(mut self, spec: serde_json::Value) -> Self {
        self.action.spec = spec;
        self
    }

    pub fn value(mut self, key: &str, value: &str) -> Self {
        self.action
            .source_inputs
            .values
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Pretend a source file with `hash` was resolved for this action.
    pub fn file(mut self, path: &str, hash: &str) -> Self {
        self.action
            .source_inputs
            .files
            .insert(path.to_string(), hash.to_string());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.action.disabled = true;
        self
    }

    pub fn sync(mut self, include: &[&str], target: &str) -> Self {
        self.action.sync = Some(SyncSpec {
            include: include.iter().map(|s| s.to_string()).collect(),
            target: target.to_string(),
        });
        self
    }

    pub fn build(self) -> Action {
        self.action
    }
}

/// Builder for a whole [`ActionSet`].
#[derive(Default)]
pub struct ProjectBuilder {
    actions: Vec<Action>,
}

impl ProjectBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, action: ActionBuilder) -> Self {
        self.actions.push(action.build());
        self
    }

    pub fn actions(self) -> ActionSet {
        ActionSet::from_actions(self.actions).expect("duplicate action in test project")
    }

    /// The action set plus its validated graph.
    pub fn build(self) -> (ActionSet, ActionGraph) {
        let actions = self.actions();
        let graph = ActionGraph::build(&actions).expect("invalid test project graph");
        (actions, graph)
    }
}

/// `build:api -> deploy:api -> test:api`, with `build:base` under the build.
pub fn api_project() -> ProjectBuilder {
    ProjectBuilder::new()
        .with(ActionBuilder::build_action("base").file("base/Dockerfile", "b0"))
        .with(
            ActionBuilder::build_action("api")
                .dep("build:base")
                .file("api/main.rs", "a0"),
        )
        .with(ActionBuilder::deploy("api").dep("build:api"))
        .with(ActionBuilder::test("api").dep("deploy:api"))
}
