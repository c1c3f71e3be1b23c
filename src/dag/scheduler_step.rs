// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::task_info::TaskKey;

/// Structured result of a single scheduler "step".
///
/// The runtime uses it to decide what to dispatch next; tests use it to step
/// a graph by hand and make assertions about what changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStep {
    /// Tasks whose dependencies became satisfied in this step.
    pub newly_ready: Vec<TaskKey>,
    /// Tasks newly marked failed in this step (the task itself, skipped
    /// dependents and, under fail-fast, aborted tasks).
    pub newly_failed: Vec<TaskKey>,
    /// Every task is now terminal.
    pub run_finished: bool,
}

impl SchedulerStep {
    pub fn is_empty(&self) -> bool {
        self.newly_ready.is_empty() && self.newly_failed.is_empty() && !self.run_finished
    }
}
