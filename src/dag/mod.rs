// src/dag/mod.rs

//! Action dependency graph, its per-run expansion into tasks, and the pure
//! scheduler that walks those tasks. Nothing here performs I/O; the engine
//! drives the [`Scheduler`] and feeds back [`TaskOutcome`]s.

pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod task_graph;
pub mod task_info;

pub use graph::{ActionGraph, find_cycle, topo_sort};
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
pub use task_graph::{TaskGraph, TaskNode, TaskRequest};
pub use task_info::{FailureReason, TaskKey, TaskOutcome, TaskState};
