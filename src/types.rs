use std::str::FromStr;

use serde::Deserialize;

/// What happens to the rest of a run when one task fails.
///
/// - `FailFast`: dependents of the failed task are failed without running,
///   tasks already running are allowed to finish, and nothing new is started.
/// - `Continue`: only the failed task's dependents are skipped; unrelated
///   branches run to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureMode {
    #[default]
    FailFast,
    Continue,
}

impl FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail-fast" | "failfast" | "fail_fast" => Ok(FailureMode::FailFast),
            "continue" => Ok(FailureMode::Continue),
            other => Err(format!(
                "invalid failure_mode: {other} (expected \"fail-fast\" or \"continue\")"
            )),
        }
    }
}

/// Where completed task results are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStorageMode {
    /// Persist results in `.actiongraph/results.json` under the project root.
    File,
    /// Keep results in memory only (lost on restart).
    #[default]
    Memory,
}

impl FromStr for CacheStorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(CacheStorageMode::File),
            "memory" => Ok(CacheStorageMode::Memory),
            other => Err(format!(
                "invalid cache mode: {other} (expected \"file\" or \"memory\")"
            )),
        }
    }
}
