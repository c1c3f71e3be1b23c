// src/watch/controller.rs

//! Turns filesystem changes into action-level invalidations.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::action::{ActionRef, ActionSet};
use crate::dag::ActionGraph;
use crate::errors::Result;
use crate::watch::path_utils::relative_str;
use crate::watch::sources::SourceResolver;

/// Changed files to push into one running deploy instead of redeploying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub action: ActionRef,
    /// Paths relative to the project root.
    pub files: Vec<PathBuf>,
}

/// What a batch of filesystem events invalidated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invalidation {
    /// Actions whose own inputs changed.
    pub changed: BTreeSet<ActionRef>,
    /// `changed` plus all their transitive dependents.
    pub invalidated: BTreeSet<ActionRef>,
    /// Deploys that can take the change by live sync.
    pub syncs: Vec<SyncTarget>,
}

impl Invalidation {
    pub fn is_empty(&self) -> bool {
        self.invalidated.is_empty()
    }
}

/// Re-hashes only the actions a change can affect and works out what has
/// to be rebuilt, redeployed or synced.
#[derive(Debug)]
pub struct WatchController {
    resolver: SourceResolver,
    graph: ActionGraph,
}

impl WatchController {
    pub fn new(resolver: SourceResolver, graph: ActionGraph) -> Self {
        Self { resolver, graph }
    }

    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    pub fn graph(&self) -> &ActionGraph {
        &self.graph
    }

    /// Hash the inputs of every action (initial resolution).
    pub fn resolve_all(&mut self, actions: &mut ActionSet) -> Result<()> {
        self.resolver.resolve_all(actions)?;
        Ok(())
    }

    /// Apply one debounced batch of changed paths to `actions`.
    ///
    /// Paths may be absolute (under the project root) or relative to it.
    /// Actions whose inputs hash the same as before (touch, revert, editor
    /// swap files) are not reported.
    pub fn on_filesystem_event(
        &mut self,
        actions: &mut ActionSet,
        paths: &[PathBuf],
    ) -> Result<Invalidation> {
        let root = self.resolver.root().to_path_buf();

        let mut touched: BTreeMap<ActionRef, Vec<String>> = BTreeMap::new();
        let mut full_paths = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(rel) = relative_str(&root, path) else {
                debug!(path = ?path, "change outside project root; ignoring");
                continue;
            };
            full_paths.push(root.join(&rel));
            for action in self.resolver.actions_matching(&rel) {
                touched.entry(action).or_default().push(rel.clone());
            }
        }

        self.resolver.forget(&full_paths);

        let mut changed = BTreeSet::new();
        for reference in touched.keys() {
            let files = self.resolver.files_for(reference)?;
            let same = actions
                .get(reference)
                .is_some_and(|a| a.source_inputs.files == files);
            if same {
                debug!(action = %reference, "inputs unchanged after event");
                continue;
            }
            actions.set_source_files(reference, files);
            changed.insert(reference.clone());
        }

        if changed.is_empty() {
            return Ok(Invalidation::default());
        }

        let invalidated = self.graph.transitive_dependents(changed.iter());
        let syncs = self.sync_targets(actions, &changed, &touched);

        info!(
            changed = changed.len(),
            invalidated = invalidated.len(),
            syncs = syncs.len(),
            "sources changed"
        );

        Ok(Invalidation {
            changed,
            invalidated,
            syncs,
        })
    }

    /// Deploys with live sync whose own files changed, with no change
    /// upstream of them, and whose every changed file is syncable.
    fn sync_targets(
        &self,
        actions: &ActionSet,
        changed: &BTreeSet<ActionRef>,
        touched: &BTreeMap<ActionRef, Vec<String>>,
    ) -> Vec<SyncTarget> {
        let mut out = Vec::new();

        for reference in changed {
            let Some(action) = actions.get(reference) else {
                continue;
            };
            if !action.supports_sync() || action.disabled {
                continue;
            }
            let upstream_changed = changed
                .iter()
                .any(|other| other != reference && self.graph.depends_transitively_on(reference, other));
            if upstream_changed {
                continue;
            }
            let Some(profile) = self.resolver.profile(reference) else {
                continue;
            };
            let files = touched.get(reference).cloned().unwrap_or_default();
            if files.is_empty() || !files.iter().all(|f| profile.syncable(f)) {
                continue;
            }
            out.push(SyncTarget {
                action: reference.clone(),
                files: files.into_iter().map(PathBuf::from).collect(),
            });
        }

        out
    }
}
