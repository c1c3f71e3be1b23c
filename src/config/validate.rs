// src/config/validate.rs

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::debug;

use crate::action::{Action, ActionKind, ActionSet, Dependency, DependencyMode};
use crate::config::model::{ActionConfig, ConfigSection, DependencyConfig, RawProjectConfig};
use crate::engine::ExecuteOptions;
use crate::errors::ConfigError;
use crate::watch::SourceDefaults;

/// A project file that passed validation.
///
/// Source inputs of the actions are still empty; they are filled in by
/// [`crate::watch::SourceResolver`].
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub settings: ConfigSection,
    pub defaults: SourceDefaults,
    pub actions: ActionSet,
}

impl ProjectConfig {
    pub fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            concurrency: self.settings.concurrency,
            failure_mode: self.settings.failure_mode,
            grace_period: Duration::from_millis(self.settings.grace_period_ms),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.settings.debounce_ms)
    }
}

impl TryFrom<RawProjectConfig> for ProjectConfig {
    type Error = ConfigError;

    fn try_from(raw: RawProjectConfig) -> Result<Self, Self::Error> {
        validate_settings(&raw.config)?;

        let actions = raw
            .actions
            .into_iter()
            .map(convert_action)
            .collect::<Result<Vec<_>, _>>()?;
        let actions = ActionSet::from_actions(actions)?;
        validate_references(&actions)?;

        debug!(actions = actions.len(), "validated project config");

        Ok(ProjectConfig {
            settings: raw.config,
            defaults: SourceDefaults {
                exclude: raw.default.exclude,
            },
            actions,
        })
    }
}

fn validate_settings(cfg: &ConfigSection) -> Result<(), ConfigError> {
    if cfg.concurrency == 0 {
        return Err(ConfigError::Invalid(
            "[config].concurrency must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn convert_action(cfg: ActionConfig) -> Result<Action, ConfigError> {
    let name = cfg.name.trim();
    if name.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "{} action of type '{}' has an empty name",
            cfg.kind, cfg.action_type
        )));
    }
    if name.contains([':', '.']) {
        return Err(ConfigError::Invalid(format!(
            "action name '{name}' may not contain ':' or '.'"
        )));
    }

    let mut action = Action::new(cfg.kind, cfg.action_type, name);

    if cfg.sync.is_some() && cfg.kind != ActionKind::Deploy {
        return Err(ConfigError::Invalid(format!(
            "'{}' declares sync, which only deploy actions support",
            action.reference
        )));
    }

    action.dependencies = cfg
        .dependencies
        .into_iter()
        .map(|d| match d {
            DependencyConfig::Ref(target) => Dependency::new(target),
            DependencyConfig::Detailed {
                target,
                mode,
                needs_outputs,
            } => Dependency {
                mode: mode.unwrap_or_else(|| DependencyMode::default_for(target.kind)),
                target,
                needs_outputs,
            },
        })
        .collect();

    action.source_inputs.values = cfg
        .variables
        .into_iter()
        .map(|(k, v)| (k, canonical_value(&v)))
        .collect::<BTreeMap<_, _>>();

    action.spec = cfg.spec;
    action.include = cfg.include;
    action.exclude = cfg.exclude;
    action.disabled = cfg.disabled;
    action.sync = cfg.sync;
    Ok(action)
}

/// Strings are taken verbatim; everything else in its TOML rendering.
fn canonical_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn validate_references(actions: &ActionSet) -> Result<(), ConfigError> {
    for action in actions.iter() {
        for dep in &action.dependencies {
            if dep.target == action.reference {
                return Err(ConfigError::Cycle {
                    cycle: vec![action.reference.clone(), action.reference.clone()],
                });
            }
            if !actions.contains(&dep.target) {
                return Err(ConfigError::UnknownDependency {
                    action: action.reference.clone(),
                    reference: dep.target.clone(),
                });
            }
        }
    }
    Ok(())
}
