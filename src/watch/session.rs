// src/watch/session.rs

//! Watch-mode driver.

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action::{ActionRef, ActionSet};
use crate::dag::{TaskGraph, TaskRequest};
use crate::engine::cache::{CacheKey, CachedResult};
use crate::engine::{ExecuteOptions, ExecutionContext, ExecutionReport, execute};
use crate::errors::Result;
use crate::exec::{HandlerRegistry, SyncRequest};
use crate::version::{Version, VersionCalculator};
use crate::watch::controller::{Invalidation, SyncTarget, WatchController};
use crate::watch::watcher::WatchEvent;

/// Owns the actions, their versions and the execution context for a
/// long-running session. It is the only writer of all three: invalidations
/// are applied one batch at a time between runs.
#[derive(Debug)]
pub struct DevSession {
    actions: ActionSet,
    versions: VersionCalculator,
    controller: WatchController,
    registry: HandlerRegistry,
    ctx: ExecutionContext,
    requests: Vec<TaskRequest>,
    options: ExecuteOptions,
}

impl DevSession {
    /// `actions` must already carry resolved source inputs.
    pub fn new(
        actions: ActionSet,
        controller: WatchController,
        registry: HandlerRegistry,
        ctx: ExecutionContext,
        requests: Vec<TaskRequest>,
        options: ExecuteOptions,
    ) -> Self {
        Self {
            actions,
            versions: VersionCalculator::new(),
            controller,
            registry,
            ctx,
            requests,
            options,
        }
    }

    pub fn actions(&self) -> &ActionSet {
        &self.actions
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn version_of(&mut self, reference: &ActionRef) -> Result<Version> {
        self.versions.version_of(&self.actions, reference)
    }

    /// Run every request; whatever is already cached is not re-run.
    pub async fn run_once(&mut self, cancel: CancellationToken) -> Result<ExecutionReport> {
        let requests = self.requests.clone();
        self.run_requests(&requests, cancel).await
    }

    async fn run_requests(
        &mut self,
        requests: &[TaskRequest],
        cancel: CancellationToken,
    ) -> Result<ExecutionReport> {
        let versions = self.versions.resolve_all(&self.actions)?;
        let graph = TaskGraph::build(
            &self.actions,
            self.controller.graph(),
            &versions,
            &self.registry,
            requests,
        )?;
        Ok(execute(graph, &self.ctx, self.options, cancel).await)
    }

    /// Apply one batch of changes and re-run what it invalidated.
    ///
    /// Returns `None` when nothing requested was affected.
    pub async fn apply(
        &mut self,
        event: WatchEvent,
        cancel: CancellationToken,
    ) -> Result<Option<ExecutionReport>> {
        let invalidation = self
            .controller
            .on_filesystem_event(&mut self.actions, &event.paths)?;
        if invalidation.is_empty() {
            debug!(paths = event.paths.len(), "change affected no action inputs");
            return Ok(None);
        }

        // Versions before the change, for deploys that may be synced.
        let previous: BTreeMap<ActionRef, Version> = invalidation
            .syncs
            .iter()
            .filter_map(|s| {
                self.versions
                    .cached(&s.action)
                    .map(|v| (s.action.clone(), v.clone()))
            })
            .collect();

        self.versions.invalidate(invalidation.invalidated.iter());

        for target in &invalidation.syncs {
            self.sync(target, previous.get(&target.action), &cancel)
                .await?;
        }

        let requests = self.affected_requests(&invalidation);
        if requests.is_empty() {
            info!("no requested task affected by change");
            return Ok(None);
        }

        info!(
            invalidated = invalidation.invalidated.len(),
            requests = requests.len(),
            "re-running invalidated tasks"
        );
        self.run_requests(&requests, cancel).await.map(Some)
    }

    fn affected_requests(&self, invalidation: &Invalidation) -> Vec<TaskRequest> {
        self.requests
            .iter()
            .filter(|r| invalidation.invalidated.contains(&r.action))
            .cloned()
            .collect()
    }

    /// Push changed files into a running deploy. On success, the previous
    /// deploy result is recorded under the new version so the re-run is
    /// served from cache. On failure, nothing is recorded and the deploy
    /// runs normally.
    async fn sync(
        &mut self,
        target: &SyncTarget,
        previous: Option<&Version>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(action) = self.actions.get(&target.action).cloned() else {
            return Ok(());
        };
        let Some(handler) = self.registry.get(action.kind(), &action.action_type) else {
            return Ok(());
        };
        let intent = action.kind().natural_intent();

        let previous_result = previous.and_then(|v| {
            self.ctx
                .cache()
                .get(&CacheKey::new(target.action.clone(), intent, v))
        });
        let Some(previous_result) = previous_result else {
            debug!(action = %target.action, "never deployed at the previous version; redeploying");
            return Ok(());
        };

        let request = SyncRequest {
            action: action.clone(),
            files: target.files.clone(),
            cancel: cancel.child_token(),
        };
        match handler.sync(request).await {
            Ok(()) => {
                let version = self.versions.version_of(&self.actions, &target.action)?;
                let key = CacheKey::new(target.action.clone(), intent, &version);
                self.ctx
                    .record(&key, CachedResult::now(previous_result.outputs))
                    .await?;
                info!(
                    action = %target.action,
                    files = target.files.len(),
                    version = %version,
                    "synced changes into running deploy"
                );
            }
            Err(err) => {
                warn!(action = %target.action, error = %err, "sync failed; redeploying");
            }
        }
        Ok(())
    }

    /// Initial run, then one re-run per batch of changes until `cancel`
    /// fires or the event channel closes.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<WatchEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let report = self.run_once(cancel.clone()).await?;
        info!(summary = %report, "initial run complete; watching for changes");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(e) => e,
                    None => break,
                },
            };

            // Coalesce batches that queued up while the last run was busy.
            let mut paths = event.paths;
            while let Ok(more) = events.try_recv() {
                paths.extend(more.paths);
            }
            paths.sort();
            paths.dedup();

            match self.apply(WatchEvent { paths }, cancel.clone()).await {
                Ok(Some(report)) => info!(summary = %report, "re-run complete"),
                Ok(None) => {}
                Err(err) => warn!(error = %err, "failed to apply changes"),
            }
        }

        info!("watch session stopped");
        Ok(())
    }
}
