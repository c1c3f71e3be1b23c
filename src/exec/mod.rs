// src/exec/mod.rs

//! Execution layer.
//!
//! - [`handler`] defines the [`ActionHandler`] contract the scheduler talks
//!   to, and the registry that resolves one per `(kind, type)`.
//! - [`worker`] runs one dispatched task: cache reuse, deduplication across
//!   runs, and the handler call itself.
//! - [`command`] is the built-in `exec` handler that runs shell commands
//!   with `tokio::process::Command`.

pub mod command;
pub mod handler;
pub mod worker;

pub use command::{CommandHandler, EXEC_TYPE};
pub use handler::{
    ActionHandler, HandlerContext, HandlerError, HandlerFuture, HandlerOutput, HandlerRegistry,
    StatusReport, SyncRequest, invoke,
};
pub use worker::{TaskJob, run_task};
