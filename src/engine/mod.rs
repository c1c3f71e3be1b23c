// src/engine/mod.rs

//! Orchestration engine.
//!
//! This module ties together:
//! - the pure task scheduler from [`crate::dag`]
//! - the result cache ([`cache`]) and the state shared between runs
//!   ([`context`])
//! - the async runtime loop ([`runtime`]) that dispatches ready tasks to
//!   workers, settles cache hits and handles cancellation
//! - the summary of a run ([`report`])

pub mod cache;
pub mod context;
pub mod report;
pub mod runtime;

pub use cache::{
    CacheKey, CachedResult, FileResultStore, MemoryResultStore, RESULTS_FILE_PATH, ResultCache,
    ResultStore,
};
pub use context::{Claim, ExecutionContext, FlightGuard, FlightResult};
pub use report::{ExecutionReport, FailureDetail, MAX_FAILURE_DETAILS, TaskReport};
pub use runtime::{ExecuteOptions, execute};
