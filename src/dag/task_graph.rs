// src/dag/task_graph.rs

//! Expansion of requested intents into the task graph of one run.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use crate::action::{Action, ActionKind, ActionRef, ActionSet, DependencyMode, Intent};
use crate::dag::graph::{ActionGraph, topo_sort};
use crate::dag::task_info::TaskKey;
use crate::errors::{ActionGraphError, ConfigError, Result};
use crate::exec::{ActionHandler, HandlerRegistry};
use crate::version::{Version, VersionCalculator};

/// A task the caller asked for explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    pub action: ActionRef,
    pub intent: Intent,
    /// Ignore cached results for this task (dependencies are unaffected).
    pub force: bool,
}

impl TaskRequest {
    /// Request the natural intent of `action`.
    pub fn new(action: ActionRef) -> Self {
        let intent = action.kind.natural_intent();
        Self {
            action,
            intent,
            force: false,
        }
    }

    pub fn delete(name: impl Into<String>) -> Self {
        Self {
            action: ActionRef::new(ActionKind::Deploy, name),
            intent: Intent::Delete,
            force: false,
        }
    }

    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.action.clone(), self.intent)
    }
}

/// Parses `kind:name` (natural intent) or `delete:name` (deploy teardown).
impl FromStr for TaskRequest {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split_once([':', '.']) {
            Some((prefix, name)) if prefix.trim().eq_ignore_ascii_case("delete") => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(format!("invalid request '{s}': empty name"));
                }
                Ok(TaskRequest::delete(name))
            }
            _ => Ok(TaskRequest::new(s.parse()?)),
        }
    }
}

impl fmt::Display for TaskRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.intent == Intent::Delete {
            write!(f, "delete:{}", self.action.name)
        } else {
            write!(f, "{}", self.action)
        }
    }
}

/// One task with everything resolved up front.
#[derive(Clone)]
pub struct TaskNode {
    pub key: TaskKey,
    pub action: Arc<Action>,
    pub version: Version,
    pub force: bool,
    /// `None` for disabled actions, which never reach a handler.
    pub handler: Option<Arc<dyn ActionHandler>>,
    /// Direct upstream tasks.
    pub deps: Vec<TaskKey>,
    /// Direct downstream tasks.
    pub dependents: Vec<TaskKey>,
    /// Upstream tasks whose outputs this task reads.
    pub output_deps: Vec<TaskKey>,
    /// Some downstream task reads this task's outputs.
    pub outputs_required: bool,
    /// Named in the run's requests (as opposed to pulled in).
    pub requested: bool,
}

impl TaskNode {
    pub fn is_disabled(&self) -> bool {
        self.handler.is_none()
    }
}

impl fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode")
            .field("key", &self.key)
            .field("version", &self.version.short())
            .field("force", &self.force)
            .field("disabled", &self.is_disabled())
            .field("deps", &self.deps)
            .field("output_deps", &self.output_deps)
            .field("outputs_required", &self.outputs_required)
            .field("requested", &self.requested)
            .finish()
    }
}

/// DAG of tasks for one run, deduplicated by [`TaskKey`].
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    nodes: BTreeMap<TaskKey, TaskNode>,
    order: Vec<TaskKey>,
}

impl TaskGraph {
    /// Build the action graph, resolve every version and expand `requests`.
    pub fn plan(
        actions: &ActionSet,
        registry: &HandlerRegistry,
        requests: &[TaskRequest],
    ) -> Result<Self> {
        let graph = ActionGraph::build(actions)?;
        let versions = VersionCalculator::new().resolve_all(actions)?;
        Self::build(actions, &graph, &versions, registry, requests)
    }

    /// Expand `requests` into tasks.
    ///
    /// Every dependency of a non-delete task yields a task with the natural
    /// intent of the dependency's kind. Deleting a deploy first deletes every
    /// deploy that depends on it at run time.
    pub fn build(
        actions: &ActionSet,
        graph: &ActionGraph,
        versions: &BTreeMap<ActionRef, Version>,
        registry: &HandlerRegistry,
        requests: &[TaskRequest],
    ) -> Result<Self> {
        let mut deps: BTreeMap<TaskKey, BTreeSet<TaskKey>> = BTreeMap::new();
        let mut output_edges: BTreeSet<(TaskKey, TaskKey)> = BTreeSet::new();
        let mut queue: VecDeque<TaskKey> = VecDeque::new();

        for request in requests {
            if !actions.contains(&request.action) {
                return Err(ConfigError::UnknownAction(request.action.clone()).into());
            }
            if !request.intent.applies_to(request.action.kind) {
                return Err(ConfigError::UnsupportedIntent {
                    action: request.action.clone(),
                    intent: request.intent,
                }
                .into());
            }
            queue.push_back(request.key());
        }

        while let Some(key) = queue.pop_front() {
            if deps.contains_key(&key) {
                continue;
            }
            let action = lookup(actions, &key.action)?;
            let mut upstream = BTreeSet::new();

            // Disabled actions are terminal no-ops; nothing behind them runs.
            if !action.disabled {
                if key.intent == Intent::Delete {
                    for dependent in graph.dependents_of(&key.action) {
                        if dependent.kind != ActionKind::Deploy {
                            continue;
                        }
                        let runtime_edge = graph.dependencies_of(dependent).iter().any(|d| {
                            d.target == key.action && d.mode == DependencyMode::Runtime
                        });
                        if runtime_edge {
                            let up = TaskKey::new(dependent.clone(), Intent::Delete);
                            upstream.insert(up.clone());
                            queue.push_back(up);
                        }
                    }
                } else {
                    for dep in graph.dependencies_of(&key.action) {
                        let up = TaskKey::natural(dep.target.clone());
                        if dep.needs_outputs {
                            output_edges.insert((up.clone(), key.clone()));
                        }
                        upstream.insert(up.clone());
                        queue.push_back(up);
                    }
                }
            }

            deps.insert(key, upstream);
        }

        // Ordering and acyclicity over the expanded task edges.
        let edges: BTreeMap<TaskKey, Vec<TaskKey>> = deps
            .iter()
            .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
            .collect();
        let order = topo_sort(&edges).map_err(|cycle| ConfigError::Cycle {
            cycle: cycle.into_iter().map(|k| k.action).collect(),
        })?;

        let requested: BTreeMap<TaskKey, bool> = requests.iter().fold(
            BTreeMap::new(),
            |mut acc, r| {
                let force = acc.entry(r.key()).or_insert(false);
                *force |= r.force;
                acc
            },
        );

        let mut nodes: BTreeMap<TaskKey, TaskNode> = BTreeMap::new();
        for key in &order {
            let action = lookup(actions, &key.action)?;
            let version = versions.get(&key.action).cloned().ok_or_else(|| {
                ActionGraphError::VersionComputation {
                    action: key.action.clone(),
                    message: "no version was resolved for this action".to_string(),
                }
            })?;
            let handler = if action.disabled {
                None
            } else {
                Some(registry.resolve(action)?)
            };

            let node_deps: Vec<TaskKey> = deps
                .get(key)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default();
            let output_deps: Vec<TaskKey> = output_edges
                .iter()
                .filter(|(_, down)| down == key)
                .map(|(up, _)| up.clone())
                .collect();
            let outputs_required = output_edges.iter().any(|(up, _)| up == key);

            nodes.insert(
                key.clone(),
                TaskNode {
                    key: key.clone(),
                    action: Arc::clone(action),
                    version,
                    force: requested.get(key).copied().unwrap_or(false),
                    handler,
                    deps: node_deps,
                    dependents: Vec::new(),
                    output_deps,
                    outputs_required,
                    requested: requested.contains_key(key),
                },
            );
        }

        for key in &order {
            let upstream = nodes.get(key).map(|n| n.deps.clone()).unwrap_or_default();
            for up in upstream {
                if let Some(node) = nodes.get_mut(&up) {
                    node.dependents.push(key.clone());
                }
            }
        }

        debug!(
            tasks = nodes.len(),
            requested = requests.len(),
            "expanded task graph"
        );

        Ok(Self { nodes, order })
    }

    pub fn get(&self, key: &TaskKey) -> Option<&TaskNode> {
        self.nodes.get(key)
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Tasks in topological order (upstream first).
    pub fn order(&self) -> &[TaskKey] {
        &self.order
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.order.iter().filter_map(|k| self.nodes.get(k))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dependents_of(&self, key: &TaskKey) -> &[TaskKey] {
        self.nodes
            .get(key)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }
}

fn lookup<'a>(actions: &'a ActionSet, reference: &ActionRef) -> Result<&'a Arc<Action>> {
    actions
        .get(reference)
        .ok_or_else(|| ConfigError::UnknownAction(reference.clone()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parsing() {
        let r: TaskRequest = "deploy:api".parse().unwrap();
        assert_eq!(r.intent, Intent::Deploy);
        assert_eq!(r.action, ActionRef::new(ActionKind::Deploy, "api"));

        let d: TaskRequest = "delete:api".parse().unwrap();
        assert_eq!(d.intent, Intent::Delete);
        assert_eq!(d.action, ActionRef::new(ActionKind::Deploy, "api"));
        assert_eq!(d.to_string(), "delete:api");

        assert!("delete:".parse::<TaskRequest>().is_err());
    }
}
