// src/dag/scheduler.rs

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::action::{ActionRef, Outputs};
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::StateManager;
use crate::dag::task_graph::{TaskGraph, TaskNode};
use crate::dag::task_info::{FailureReason, TaskKey, TaskOutcome, TaskState};
use crate::types::FailureMode;

/// Scheduler holds the immutable task graph plus the mutable state of one
/// run.
///
/// It is a pure state machine: it never spawns, sleeps or touches the
/// result cache. It is responsible for:
/// - deciding when a task is ready (all dependencies succeeded)
/// - resolving disabled tasks without dispatching them
/// - recording outcomes and the outputs dependents will read
/// - failing dependents, and under fail-fast aborting everything else
#[derive(Debug)]
pub struct Scheduler {
    graph: TaskGraph,
    states: BTreeMap<TaskKey, TaskState>,
    outputs: BTreeMap<TaskKey, Outputs>,
    failure_mode: FailureMode,
    /// Fail-fast tripped: nothing new is started.
    halted: bool,
}

impl Scheduler {
    pub fn new(graph: TaskGraph, failure_mode: FailureMode) -> Self {
        let states = graph
            .order()
            .iter()
            .map(|k| (k.clone(), TaskState::Pending))
            .collect();

        Self {
            graph,
            states,
            outputs: BTreeMap::new(),
            failure_mode,
            halted: false,
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn node(&self, key: &TaskKey) -> Option<&TaskNode> {
        self.graph.get(key)
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    pub fn state_of(&self, key: &TaskKey) -> Option<&TaskState> {
        self.states.get(key)
    }

    /// Every task with its current state, in topological order.
    pub fn states(&self) -> impl Iterator<Item = (&TaskKey, &TaskState)> {
        self.graph
            .order()
            .iter()
            .filter_map(|k| self.states.get(k).map(|s| (k, s)))
    }

    pub fn outputs_of(&self, key: &TaskKey) -> Option<&Outputs> {
        self.outputs.get(key)
    }

    /// Outputs of the direct dependencies of `key` that produced any.
    pub fn dependency_outputs(&self, key: &TaskKey) -> BTreeMap<ActionRef, Outputs> {
        let Some(node) = self.graph.get(key) else {
            return BTreeMap::new();
        };
        node.deps
            .iter()
            .filter_map(|dep| {
                self.outputs
                    .get(dep)
                    .map(|o| (dep.action.clone(), o.clone()))
            })
            .collect()
    }

    /// Tasks currently dispatched.
    pub fn running(&self) -> Vec<TaskKey> {
        self.states
            .iter()
            .filter(|(_, s)| **s == TaskState::Running)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn is_finished(&self) -> bool {
        self.states.values().all(TaskState::is_terminal)
    }

    /// Release the tasks with no unfinished dependencies.
    pub fn start(&mut self) -> SchedulerStep {
        info!(
            tasks = self.graph.len(),
            failure_mode = ?self.failure_mode,
            "scheduler: starting run"
        );
        let mut step = self.collect_ready();
        step.run_finished = self.is_finished();
        step
    }

    /// `Ready` -> `Running`. Returns `false` if the task is no longer ready
    /// (e.g. it was aborted while waiting for a worker slot).
    pub fn mark_running(&mut self, key: &TaskKey) -> bool {
        match self.states.get_mut(key) {
            Some(state) if *state == TaskState::Ready => {
                *state = TaskState::Running;
                debug!(task = %key, "dispatching task");
                true
            }
            Some(state) => {
                debug!(task = %key, state = %state, "task no longer ready; not dispatching");
                false
            }
            None => {
                warn!(task = %key, "dispatch of unknown task; ignoring");
                false
            }
        }
    }

    /// Record how a `Ready` or `Running` task ended.
    pub fn complete(&mut self, key: &TaskKey, outcome: TaskOutcome) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let in_flight = matches!(
            self.states.get(key),
            Some(TaskState::Ready) | Some(TaskState::Running)
        );
        if !in_flight {
            warn!(
                task = %key,
                state = ?self.states.get(key),
                "completion for a task that is not in flight; ignoring"
            );
            return step;
        }

        match outcome {
            TaskOutcome::Succeeded(outputs) => {
                debug!(task = %key, outputs = outputs.len(), "task succeeded");
                self.states.insert(key.clone(), TaskState::Succeeded);
                self.outputs.insert(key.clone(), outputs);
                self.extend_with_ready(&mut step);
            }
            TaskOutcome::Cached(outputs) => {
                debug!(task = %key, has_outputs = outputs.is_some(), "task served from cache");
                self.states.insert(key.clone(), TaskState::Cached);
                if let Some(outputs) = outputs {
                    self.outputs.insert(key.clone(), outputs);
                }
                self.extend_with_ready(&mut step);
            }
            TaskOutcome::Failed(message) => {
                warn!(task = %key, error = %message, "task failed");
                self.fail(key, FailureReason::Handler(message), &mut step);
            }
            TaskOutcome::TimedOut => {
                warn!(task = %key, "task did not stop within the grace period");
                self.fail(key, FailureReason::TimedOut, &mut step);
            }
            TaskOutcome::Cancelled => {
                info!(task = %key, "task cancelled");
                self.states.insert(key.clone(), TaskState::Cancelled);
                let mut manager = StateManager::new(&self.graph, &mut self.states, &self.outputs);
                for dependent in manager.mark_dependents_failed(key) {
                    self.states.insert(dependent, TaskState::Cancelled);
                }
            }
        }

        step.run_finished = self.is_finished();
        if step.run_finished {
            info!("scheduler: all tasks terminal; run finished");
        }
        step
    }

    /// Cancel everything that has not started. Running tasks are left to the
    /// caller (they get the cancellation token and a grace period).
    pub fn cancel_pending(&mut self) -> Vec<TaskKey> {
        self.halted = true;
        let mut manager = StateManager::new(&self.graph, &mut self.states, &self.outputs);
        manager.settle_queued(TaskState::Cancelled)
    }

    fn fail(&mut self, key: &TaskKey, reason: FailureReason, step: &mut SchedulerStep) {
        self.states.insert(key.clone(), TaskState::Failed(reason));
        step.newly_failed.push(key.clone());

        let mut manager = StateManager::new(&self.graph, &mut self.states, &self.outputs);
        step.newly_failed.extend(manager.mark_dependents_failed(key));

        self.on_failure(step);
    }

    fn on_failure(&mut self, step: &mut SchedulerStep) {
        if self.failure_mode != FailureMode::FailFast || self.halted {
            return;
        }
        self.halted = true;
        let mut manager = StateManager::new(&self.graph, &mut self.states, &self.outputs);
        let aborted = manager.settle_queued(TaskState::Failed(FailureReason::Aborted));
        if !aborted.is_empty() {
            info!(aborted = aborted.len(), "fail-fast: aborting tasks that have not started");
        }
        step.newly_ready.retain(|k| !aborted.contains(k));
        step.newly_failed.extend(aborted);
    }

    fn collect_ready(&mut self) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        self.extend_with_ready(&mut step);
        step
    }

    fn extend_with_ready(&mut self, step: &mut SchedulerStep) {
        if self.halted {
            return;
        }
        let mut manager = StateManager::new(&self.graph, &mut self.states, &self.outputs);
        let (ready, failed) = manager.collect_new_ready_tasks();
        step.newly_ready.extend(ready);
        if !failed.is_empty() {
            step.newly_failed.extend(failed);
            self.on_failure(step);
        }
    }
}
