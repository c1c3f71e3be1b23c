// src/exec/worker.rs

//! Execution of a single dispatched task.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::action::{Action, ActionRef, Intent, Outputs};
use crate::dag::task_info::{TaskKey, TaskOutcome};
use crate::engine::cache::{CacheKey, CachedResult};
use crate::engine::context::{Claim, ExecutionContext, FlightResult, follow};
use crate::exec::handler::{ActionHandler, HandlerContext, HandlerError, invoke};
use crate::version::Version;

/// Everything a worker needs to run one task.
#[derive(Debug, Clone)]
pub struct TaskJob {
    pub key: TaskKey,
    pub action: Arc<Action>,
    pub version: Version,
    pub handler: Arc<dyn ActionHandler>,
    pub force: bool,
    /// Some dependent reads this task's outputs.
    pub outputs_required: bool,
    pub dependency_outputs: BTreeMap<ActionRef, Outputs>,
    pub cancel: CancellationToken,
}

impl TaskJob {
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.key.action.clone(), self.key.intent, &self.version)
    }

    fn handler_context(&self) -> HandlerContext {
        HandlerContext {
            action: Arc::clone(&self.action),
            intent: self.key.intent,
            version: self.version.clone(),
            dependency_outputs: self.dependency_outputs.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

/// Run one task to an outcome.
///
/// Deduplicates against other runs sharing `ctx`: only the leader of a
/// cache key invokes the handler, followers reuse its result.
pub async fn run_task(job: TaskJob, ctx: ExecutionContext) -> TaskOutcome {
    let cache_key = job.cache_key();

    if !job.force {
        if let Some(outcome) = reuse_with_status(&job, &ctx, &cache_key).await {
            return outcome;
        }
    }

    loop {
        match ctx.claim(&cache_key) {
            Claim::Leader(guard) => {
                if !job.force {
                    // Another run may have finished between dispatch and claim.
                    if let Some(hit) = usable_hit(&job, &ctx, &cache_key) {
                        return TaskOutcome::Cached(hit.outputs);
                    }
                }

                info!(
                    task = %job.key,
                    version = %job.version,
                    "running handler"
                );

                return match invoke(job.handler.as_ref(), job.handler_context()).await {
                    Ok(output) => {
                        info!(task = %job.key, "handler succeeded");
                        guard.succeed(output.outputs.clone()).await;
                        TaskOutcome::Succeeded(output.outputs)
                    }
                    Err(HandlerError::Cancelled) => {
                        info!(task = %job.key, "handler stopped after cancellation");
                        TaskOutcome::Cancelled
                    }
                    Err(err) => {
                        let message = err.to_string();
                        error!(task = %job.key, error = %message, "handler failed");
                        guard.fail(message.clone());
                        TaskOutcome::Failed(message)
                    }
                };
            }
            Claim::Follower(slot) => {
                debug!(task = %job.key, "waiting for identical task in another run");
                let result = tokio::select! {
                    _ = job.cancel.cancelled() => return TaskOutcome::Cancelled,
                    result = follow(slot) => result,
                };
                match result {
                    Some(FlightResult::Succeeded(outputs)) => {
                        return TaskOutcome::Cached(Some(outputs));
                    }
                    Some(FlightResult::Failed(message)) => return TaskOutcome::Failed(message),
                    None => {
                        debug!(task = %job.key, "leader gave up; claiming again");
                        continue;
                    }
                }
            }
        }
    }
}

fn usable_hit(job: &TaskJob, ctx: &ExecutionContext, key: &CacheKey) -> Option<CachedResult> {
    ctx.cache()
        .get(key)
        .filter(|hit| !job.outputs_required || hit.outputs.is_some())
}

/// A cached record exists but lacks the outputs a dependent needs: ask the
/// handler whether the live state is current and can supply them.
async fn reuse_with_status(
    job: &TaskJob,
    ctx: &ExecutionContext,
    key: &CacheKey,
) -> Option<TaskOutcome> {
    let hit = ctx.cache().get(key)?;
    if !job.outputs_required || hit.outputs.is_some() {
        return Some(TaskOutcome::Cached(hit.outputs));
    }

    // Delete tasks never feed outputs forward.
    if job.key.intent == Intent::Delete {
        return None;
    }

    match job.handler.get_status(job.handler_context()).await {
        Ok(status) if status.up_to_date => match status.outputs {
            Some(outputs) => {
                debug!(task = %job.key, "status is current; reusing reported outputs");
                let record = CachedResult::now(Some(outputs.clone()));
                if let Err(err) = ctx.record(key, record).await {
                    warn!(task = %job.key, error = %err, "failed to store task result");
                }
                Some(TaskOutcome::Cached(Some(outputs)))
            }
            None => None,
        },
        Ok(_) => None,
        Err(err) => {
            debug!(task = %job.key, error = %err, "status unavailable; re-running");
            None
        }
    }
}
