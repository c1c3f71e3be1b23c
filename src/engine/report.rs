// src/engine/report.rs

use std::collections::BTreeMap;
use std::fmt;

use crate::action::{ActionRef, Intent, Outputs};
use crate::dag::Scheduler;
use crate::dag::task_info::{FailureReason, TaskKey, TaskState};
use crate::errors::ActionGraphError;

/// At most this many failures are reported in detail.
pub const MAX_FAILURE_DETAILS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureDetail {
    pub action: ActionRef,
    pub intent: Intent,
    pub message: String,
}

impl fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.intent, self.action, self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub key: TaskKey,
    /// Short version, e.g. `v-3f9a1c0d2e`.
    pub version: String,
    pub state: TaskState,
    pub requested: bool,
}

/// Summary of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    pub succeeded: usize,
    pub cached: usize,
    /// Handler errors, missing outputs and timeouts.
    pub failed: usize,
    /// Never started because of an upstream failure or fail-fast.
    pub skipped: usize,
    pub cancelled: usize,
    pub disabled: usize,
    /// The first [`MAX_FAILURE_DETAILS`] failures, in topological order.
    pub failures: Vec<FailureDetail>,
    pub tasks: Vec<TaskReport>,
    pub outputs: BTreeMap<TaskKey, Outputs>,
}

impl ExecutionReport {
    pub fn from_scheduler(scheduler: &Scheduler) -> Self {
        let mut report = ExecutionReport::default();

        for (key, state) in scheduler.states() {
            match state {
                TaskState::Succeeded => report.succeeded += 1,
                TaskState::Cached => report.cached += 1,
                TaskState::Disabled => report.disabled += 1,
                TaskState::Cancelled => report.cancelled += 1,
                TaskState::Failed(
                    FailureReason::DependencyFailed(_) | FailureReason::Aborted,
                ) => report.skipped += 1,
                TaskState::Failed(reason) => {
                    report.failed += 1;
                    if report.failures.len() < MAX_FAILURE_DETAILS {
                        report.failures.push(FailureDetail {
                            action: key.action.clone(),
                            intent: key.intent,
                            message: reason.to_string(),
                        });
                    }
                }
                // Only reachable if the run was torn down mid-flight.
                TaskState::Pending | TaskState::Ready | TaskState::Running => {
                    report.cancelled += 1
                }
            }

            let node = scheduler.node(key);
            report.tasks.push(TaskReport {
                key: key.clone(),
                version: node.map(|n| n.version.short()).unwrap_or_default(),
                state: state.clone(),
                requested: node.is_some_and(|n| n.requested),
            });

            if let Some(outputs) = scheduler.outputs_of(key) {
                report.outputs.insert(key.clone(), outputs.clone());
            }
        }

        report
    }

    /// Every requested task ended in a successful state.
    pub fn is_success(&self) -> bool {
        self.tasks
            .iter()
            .filter(|t| t.requested)
            .all(|t| t.state.is_success())
    }

    /// The error that sums up an unsuccessful run: the first handler
    /// failure, or cancellation when nothing failed on its own.
    pub fn error(&self) -> Option<ActionGraphError> {
        if self.is_success() {
            return None;
        }
        if let Some(first) = self.failures.first() {
            return Some(ActionGraphError::TaskExecution {
                action: first.action.clone(),
                intent: first.intent,
                message: first.message.clone(),
            });
        }
        if self.cancelled > 0 {
            return Some(ActionGraphError::Cancelled);
        }
        None
    }

    /// `0` on success, `130` for a cancelled run, `1` otherwise.
    pub fn exit_code(&self) -> i32 {
        match self.error() {
            _ if self.is_success() => 0,
            Some(ActionGraphError::Cancelled) => 130,
            _ => 1,
        }
    }

    pub fn state_of(&self, key: &TaskKey) -> Option<&TaskState> {
        self.tasks.iter().find(|t| &t.key == key).map(|t| &t.state)
    }

    pub fn outputs_of(&self, key: &TaskKey) -> Option<&Outputs> {
        self.outputs.get(key)
    }

    pub fn total(&self) -> usize {
        self.tasks.len()
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tasks: {} succeeded, {} cached, {} failed, {} skipped, {} cancelled, {} disabled",
            self.total(),
            self.succeeded,
            self.cached,
            self.failed,
            self.skipped,
            self.cancelled,
            self.disabled
        )?;
        for failure in &self.failures {
            write!(f, "\n  {failure}")?;
        }
        let hidden = self.failed.saturating_sub(self.failures.len());
        if hidden > 0 {
            write!(f, "\n  ... and {hidden} more")?;
        }
        Ok(())
    }
}
