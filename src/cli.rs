// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::DEFAULT_CONFIG_FILE;
use crate::dag::TaskRequest;
use crate::types::FailureMode;

/// Command-line arguments for `actiongraph`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "actiongraph",
    version,
    about = "Build, deploy and test a multi-service project as a graph of cached actions.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the project file (TOML).
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Maximum number of handlers running at once (overrides the config).
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// `fail-fast` or `continue` (overrides the config).
    #[arg(long, value_name = "MODE")]
    pub failure_mode: Option<FailureMode>,

    /// Ignore cached results of the requested tasks.
    #[arg(long)]
    pub force: bool,

    /// Keep running and re-run affected tasks when sources change.
    #[arg(long)]
    pub watch: bool,

    /// Print the task graph and what would be cached, without executing.
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `ACTIONGRAPH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Tasks to run: `kind:name` (e.g. `deploy:api`) or `delete:name`.
    ///
    /// With none, every action is requested with its natural intent.
    #[arg(value_name = "REQUEST")]
    pub requests: Vec<TaskRequest>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
