// src/config/mod.rs

//! `Actiongraph.toml`: the raw serde model, reading it from disk, and
//! turning it into a checked [`ProjectConfig`].

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{DEFAULT_CONFIG_FILE, load_and_validate, load_from_path, project_root};
pub use model::{ActionConfig, ConfigSection, DefaultSection, DependencyConfig, RawProjectConfig};
pub use validate::ProjectConfig;
