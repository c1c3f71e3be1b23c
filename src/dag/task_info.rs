// src/dag/task_info.rs

//! Task identity and per-run task state.

use std::fmt;

use crate::action::{ActionRef, Intent, Outputs};

/// One node of a task graph: an action paired with what to do with it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskKey {
    pub action: ActionRef,
    pub intent: Intent,
}

impl TaskKey {
    pub fn new(action: ActionRef, intent: Intent) -> Self {
        Self { action, intent }
    }

    /// Task carrying the natural intent of the action's kind.
    pub fn natural(action: ActionRef) -> Self {
        let intent = action.kind.natural_intent();
        Self { action, intent }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.action.kind.natural_intent() == self.intent {
            write!(f, "{}", self.action)
        } else {
            write!(f, "{} ({})", self.action, self.intent)
        }
    }
}

/// Why a task ended up failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The handler returned an error.
    Handler(String),
    /// A (transitive) dependency failed, so this task never ran.
    DependencyFailed(TaskKey),
    /// Fail-fast stopped scheduling before this task started.
    Aborted,
    /// A dependency whose outputs this task reads produced none.
    MissingOutputs(ActionRef),
    /// The handler did not stop within the grace period after cancellation.
    TimedOut,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Handler(msg) => write!(f, "{msg}"),
            FailureReason::DependencyFailed(dep) => write!(f, "dependency {dep} failed"),
            FailureReason::Aborted => f.write_str("aborted after an earlier failure"),
            FailureReason::MissingOutputs(dep) => {
                write!(f, "outputs of {dep} are required but not available")
            }
            FailureReason::TimedOut => f.write_str("did not stop within the grace period"),
        }
    }
}

/// Per-run state of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting on dependencies.
    Pending,
    /// Dependencies satisfied; waiting for a worker slot.
    Ready,
    Running,
    Succeeded,
    /// Served from the result cache without invoking the handler.
    Cached,
    /// The action is disabled; counts as success without outputs.
    Disabled,
    Failed(FailureReason),
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            TaskState::Pending | TaskState::Ready | TaskState::Running
        )
    }

    /// Terminal and good enough for dependents to proceed.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Cached | TaskState::Disabled
        )
    }

    /// Not started yet.
    pub fn is_queued(&self) -> bool {
        matches!(self, TaskState::Pending | TaskState::Ready)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => f.write_str("pending"),
            TaskState::Ready => f.write_str("ready"),
            TaskState::Running => f.write_str("running"),
            TaskState::Succeeded => f.write_str("succeeded"),
            TaskState::Cached => f.write_str("cached"),
            TaskState::Disabled => f.write_str("disabled"),
            TaskState::Failed(reason) => write!(f, "failed: {reason}"),
            TaskState::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// How a dispatched task ended, as reported back to the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The handler ran and succeeded.
    Succeeded(Outputs),
    /// A previous result was reused.
    Cached(Option<Outputs>),
    /// The handler returned an error.
    Failed(String),
    /// The handler observed cancellation and stopped.
    Cancelled,
    /// The handler was still running when the grace period ran out.
    TimedOut,
}
