// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::RawProjectConfig;
use crate::config::validate::ProjectConfig;
use crate::errors::Result;

/// Default project file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "Actiongraph.toml";

/// Read and deserialize a project file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawProjectConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let config: RawProjectConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Load a project file and validate it.
///
/// This is the entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for duplicate actions, dangling dependency references and
///   nonsensical settings.
///
/// Cycles are reported when the action graph is built.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ProjectConfig> {
    let raw = load_from_path(&path)?;
    Ok(ProjectConfig::try_from(raw)?)
}

/// Directory that source patterns and the state directory are relative to.
///
/// A bare file name (parent `""`) means the current working directory.
pub fn project_root(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}
