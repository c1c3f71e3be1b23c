// src/logging.rs

//! Stderr logging for the `actiongraph` binary.
//!
//! The level comes from `--log-level`, then `ACTIONGRAPH_LOG`, then `info`.
//! Stdout is left to the run summary and dry-run listing.

use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "ACTIONGRAPH_LOG";

/// Crates whose chatter is capped at `warn` regardless of the chosen level.
const QUIET_TARGETS: &[&str] = &["hyper", "reqwest", "notify"];

pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let level = cli_level
        .or_else(|| std::env::var(LOG_ENV_VAR).ok().as_deref().and_then(LogLevel::from_env_value))
        .unwrap_or(LogLevel::Info);

    tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("installing log subscriber")
}

fn build_filter(level: LogLevel) -> EnvFilter {
    QUIET_TARGETS.iter().fold(
        EnvFilter::default().add_directive(LevelFilter::from(level).into()),
        |filter, target| match format!("{target}=warn").parse() {
            Ok(directive) => filter.add_directive(directive),
            Err(_) => filter,
        },
    )
}

impl LogLevel {
    /// Lenient parse for the environment variable: case and whitespace are
    /// ignored and `warning` is accepted.
    pub fn from_env_value(raw: &str) -> Option<Self> {
        Some(match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Self::Error,
            "warn" | "warning" => Self::Warn,
            "info" => Self::Info,
            "debug" => Self::Debug,
            "trace" => Self::Trace,
            _ => return None,
        })
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}
