// src/version/calculator.rs

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::action::{Action, ActionRef, ActionSet};
use crate::errors::{ActionGraphError, ConfigError, Result};
use crate::version::hash::update_field;

/// Deterministic fingerprint of an action and everything it depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    self_hash: String,
    dependency_hash: String,
    version: String,
}

impl Version {
    /// Full hex digest; this is what cache keys use.
    pub fn as_str(&self) -> &str {
        &self.version
    }

    /// Hash over the action's own inputs only.
    pub fn self_hash(&self) -> &str {
        &self.self_hash
    }

    /// Hash over the sorted (dependency, dependency version) pairs.
    pub fn dependency_hash(&self) -> &str {
        &self.dependency_hash
    }

    /// Short human-readable form, e.g. `v-3f9a1c0d2e`.
    pub fn short(&self) -> String {
        let end = self.version.len().min(10);
        format!("v-{}", &self.version[..end])
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}

/// Hash over the action's identity, handler `spec` and `source_inputs`.
pub fn compute_self_hash(action: &Action) -> String {
    let mut hasher = Hasher::new();
    update_field(&mut hasher, "kind", action.kind().as_str());
    update_field(&mut hasher, "type", &action.action_type);
    update_field(&mut hasher, "name", action.name());
    // `serde_json::Map` is key-ordered, so equal specs render identically.
    update_field(&mut hasher, "spec", &action.spec.to_string());

    for (path, hash) in &action.source_inputs.files {
        update_field(&mut hasher, "file", path);
        update_field(&mut hasher, "file-hash", hash);
    }
    for (key, value) in &action.source_inputs.values {
        update_field(&mut hasher, "value", key);
        update_field(&mut hasher, "value-data", value);
    }

    hasher.finalize().to_hex().to_string()
}

/// Compute the version of `action` given the versions of its dependencies.
///
/// Pure: no IO. Dependencies that are absent from `resolved` (disabled
/// actions) are left out of the hash entirely. Declaration order of the
/// dependency list never matters.
pub fn compute_version(action: &Action, resolved: &BTreeMap<ActionRef, Version>) -> Version {
    let self_hash = compute_self_hash(action);

    let mut pairs: Vec<(&ActionRef, &Version)> = action
        .dependencies
        .iter()
        .filter_map(|dep| resolved.get_key_value(&dep.target))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs.dedup_by(|a, b| a.0 == b.0);

    let mut dep_hasher = Hasher::new();
    for (reference, version) in &pairs {
        update_field(&mut dep_hasher, "dep", &reference.to_string());
        update_field(&mut dep_hasher, "dep-version", version.as_str());
    }
    let dependency_hash = dep_hasher.finalize().to_hex().to_string();

    let mut hasher = Hasher::new();
    update_field(&mut hasher, "self", &self_hash);
    update_field(&mut hasher, "deps", &dependency_hash);
    let version = hasher.finalize().to_hex().to_string();

    trace!(
        action = %action.reference,
        deps = pairs.len(),
        version = %version,
        "computed version"
    );

    Version {
        self_hash,
        dependency_hash,
        version,
    }
}

/// Memoizing resolver for the versions of a whole action set.
///
/// Versions are computed lazily on first request and kept until
/// [`invalidate`](Self::invalidate) drops them.
#[derive(Debug, Default)]
pub struct VersionCalculator {
    memo: HashMap<ActionRef, Version>,
}

impl VersionCalculator {
    pub fn new() -> Self {
        Self {
            memo: HashMap::new(),
        }
    }

    /// Previously computed version, if still memoized.
    pub fn cached(&self, reference: &ActionRef) -> Option<&Version> {
        self.memo.get(reference)
    }

    /// Resolve the version of one action (and, transitively, of everything
    /// it depends on).
    pub fn version_of(&mut self, actions: &ActionSet, reference: &ActionRef) -> Result<Version> {
        let mut path = Vec::new();
        self.resolve(actions, reference, &mut path)
    }

    /// Resolve every action in the set.
    pub fn resolve_all(&mut self, actions: &ActionSet) -> Result<BTreeMap<ActionRef, Version>> {
        let mut out = BTreeMap::new();
        for reference in actions.references() {
            let version = self.version_of(actions, reference)?;
            out.insert(reference.clone(), version);
        }
        Ok(out)
    }

    /// Forget the memoized versions of `references`.
    ///
    /// Callers are expected to pass the transitive dependents of whatever
    /// changed as well (see `ActionGraph::transitive_dependents`).
    pub fn invalidate<'a, I>(&mut self, references: I)
    where
        I: IntoIterator<Item = &'a ActionRef>,
    {
        let mut dropped = 0usize;
        for reference in references {
            if self.memo.remove(reference).is_some() {
                dropped += 1;
            }
        }
        debug!(dropped, "invalidated memoized versions");
    }

    fn resolve(
        &mut self,
        actions: &ActionSet,
        reference: &ActionRef,
        path: &mut Vec<ActionRef>,
    ) -> Result<Version> {
        if let Some(version) = self.memo.get(reference) {
            return Ok(version.clone());
        }

        if let Some(pos) = path.iter().position(|r| r == reference) {
            let mut cycle: Vec<ActionRef> = path[pos..].to_vec();
            cycle.push(reference.clone());
            return Err(ConfigError::Cycle { cycle }.into());
        }

        let action = actions.get(reference).ok_or_else(|| {
            ActionGraphError::VersionComputation {
                action: reference.clone(),
                message: "action is not part of the project".to_string(),
            }
        })?;

        path.push(reference.clone());

        let mut resolved = BTreeMap::new();
        for dep in &action.dependencies {
            let target = actions.get(&dep.target).ok_or_else(|| ConfigError::UnknownDependency {
                action: reference.clone(),
                reference: dep.target.clone(),
            })?;
            if target.disabled {
                trace!(
                    action = %reference,
                    dep = %dep.target,
                    "dependency disabled; leaving it out of the version"
                );
                continue;
            }
            let version = self.resolve(actions, &dep.target, path)?;
            resolved.insert(dep.target.clone(), version);
        }

        path.pop();

        let version = compute_version(action, &resolved);
        self.memo.insert(reference.clone(), version.clone());
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionKind, Dependency};

    fn action(kind: ActionKind, name: &str, deps: &[&str]) -> Action {
        let mut a = Action::new(kind, "exec", name);
        a.dependencies = deps
            .iter()
            .map(|d| Dependency::new(d.parse().unwrap()))
            .collect();
        a
    }

    #[test]
    fn version_cycle_reports_path() {
        let set = ActionSet::from_actions(vec![
            action(ActionKind::Build, "a", &["build:b"]),
            action(ActionKind::Build, "b", &["build:a"]),
        ])
        .unwrap();

        let mut calc = VersionCalculator::new();
        let err = calc
            .version_of(&set, &"build:a".parse().unwrap())
            .unwrap_err();
        match err {
            ActionGraphError::Configuration(ConfigError::Cycle { cycle }) => {
                let names: Vec<String> = cycle.iter().map(|r| r.to_string()).collect();
                assert_eq!(names, vec!["build:a", "build:b", "build:a"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn short_form_is_prefixed() {
        let a = action(ActionKind::Run, "x", &[]);
        let v = compute_version(&a, &BTreeMap::new());
        assert!(v.short().starts_with("v-"));
        assert_eq!(v.short().len(), 12);
    }
}
