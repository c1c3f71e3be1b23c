// src/dag/state_manager.rs

//! Per-run state transitions for tasks in the scheduler.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::action::Outputs;
use crate::dag::task_graph::TaskGraph;
use crate::dag::task_info::{FailureReason, TaskKey, TaskState};

/// Mutable view over the task states of one run.
pub struct StateManager<'a> {
    graph: &'a TaskGraph,
    states: &'a mut BTreeMap<TaskKey, TaskState>,
    outputs: &'a BTreeMap<TaskKey, Outputs>,
}

impl<'a> StateManager<'a> {
    pub fn new(
        graph: &'a TaskGraph,
        states: &'a mut BTreeMap<TaskKey, TaskState>,
        outputs: &'a BTreeMap<TaskKey, Outputs>,
    ) -> Self {
        Self {
            graph,
            states,
            outputs,
        }
    }

    fn state(&self, key: &TaskKey) -> Option<&TaskState> {
        self.states.get(key)
    }

    /// Whether every direct dependency of `key` has finished successfully.
    pub fn deps_satisfied(&self, key: &TaskKey) -> bool {
        let Some(node) = self.graph.get(key) else {
            warn!(task = %key, "task missing from graph");
            return false;
        };
        node.deps
            .iter()
            .all(|dep| self.state(dep).is_some_and(TaskState::is_success))
    }

    /// Move `Pending` tasks whose dependencies are satisfied forward.
    ///
    /// Disabled tasks resolve to `Disabled` on the spot, which may in turn
    /// release their dependents, so this iterates to a fixpoint. Tasks that
    /// read outputs a dependency never produced fail with `MissingOutputs`.
    ///
    /// Returns `(newly_ready, newly_failed)`.
    pub fn collect_new_ready_tasks(&mut self) -> (Vec<TaskKey>, Vec<TaskKey>) {
        let graph = self.graph;
        let mut ready = Vec::new();
        let mut failed = Vec::new();

        loop {
            let mut progressed = false;

            for key in graph.order() {
                if self.state(key) != Some(&TaskState::Pending) || !self.deps_satisfied(key) {
                    continue;
                }
                let Some(node) = graph.get(key) else {
                    continue;
                };

                if node.is_disabled() {
                    debug!(task = %key, "action disabled; skipping without outputs");
                    self.states.insert(key.clone(), TaskState::Disabled);
                    progressed = true;
                    continue;
                }

                let missing = node
                    .output_deps
                    .iter()
                    .find(|dep| !self.outputs.contains_key(*dep));
                if let Some(dep) = missing {
                    warn!(
                        task = %key,
                        dependency = %dep,
                        "dependency produced no outputs; failing task"
                    );
                    self.states.insert(
                        key.clone(),
                        TaskState::Failed(FailureReason::MissingOutputs(dep.action.clone())),
                    );
                    failed.push(key.clone());
                    failed.extend(self.mark_dependents_failed(key));
                    progressed = true;
                    continue;
                }

                debug!(task = %key, version = %node.version, "dependencies satisfied; marking Ready");
                self.states.insert(key.clone(), TaskState::Ready);
                ready.push(key.clone());
            }

            if !progressed {
                break;
            }
        }

        (ready, failed)
    }

    /// Fail every not-yet-started transitive dependent of `failed_task`.
    ///
    /// Returns the tasks newly marked failed, excluding the root.
    pub fn mark_dependents_failed(&mut self, failed_task: &TaskKey) -> Vec<TaskKey> {
        let mut stack: Vec<TaskKey> = self.graph.dependents_of(failed_task).to_vec();
        let mut visited: BTreeSet<TaskKey> = BTreeSet::new();
        let mut newly_failed = Vec::new();

        while let Some(key) = stack.pop() {
            if !visited.insert(key.clone()) {
                continue;
            }
            if self.state(&key).is_some_and(TaskState::is_queued) {
                debug!(
                    task = %key,
                    upstream = %failed_task,
                    "marking dependent failed due to upstream failure"
                );
                self.states.insert(
                    key.clone(),
                    TaskState::Failed(FailureReason::DependencyFailed(failed_task.clone())),
                );
                newly_failed.push(key.clone());
            }
            stack.extend(self.graph.dependents_of(&key).iter().cloned());
        }

        newly_failed
    }

    /// Move every queued task to `state`, returning them.
    pub fn settle_queued(&mut self, state: TaskState) -> Vec<TaskKey> {
        let queued: Vec<TaskKey> = self
            .states
            .iter()
            .filter(|(_, s)| s.is_queued())
            .map(|(k, _)| k.clone())
            .collect();

        if !queued.is_empty() {
            info!(tasks = queued.len(), state = %state, "settling tasks that never started");
        }
        for key in &queued {
            self.states.insert(key.clone(), state.clone());
        }
        queued
    }
}
