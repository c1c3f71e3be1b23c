// src/engine/runtime.rs

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dag::task_info::{TaskKey, TaskOutcome};
use crate::dag::{Scheduler, SchedulerStep, TaskGraph};
use crate::engine::cache::CacheKey;
use crate::engine::context::ExecutionContext;
use crate::engine::report::ExecutionReport;
use crate::exec::worker::{TaskJob, run_task};
use crate::types::FailureMode;

/// Knobs for one call to [`execute`].
#[derive(Debug, Clone, Copy)]
pub struct ExecuteOptions {
    /// Maximum number of handlers running at once.
    pub concurrency: usize,
    pub failure_mode: FailureMode,
    /// How long in-flight handlers get to stop after cancellation.
    pub grace_period: Duration,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            failure_mode: FailureMode::FailFast,
            grace_period: Duration::from_secs(5),
        }
    }
}

/// Run `graph` to completion (or cancellation) and report what happened.
///
/// One loop owns the scheduler; workers are tasks in a [`JoinSet`] whose
/// results (panics included) come back to that loop. Cache hits are settled
/// here without taking a worker slot.
pub async fn execute(
    graph: TaskGraph,
    ctx: &ExecutionContext,
    options: ExecuteOptions,
    cancel: CancellationToken,
) -> ExecutionReport {
    let runtime = Runtime::new(graph, ctx.clone(), options, cancel);
    runtime.run().await
}

/// Async IO shell around the pure [`Scheduler`].
struct Runtime {
    scheduler: Scheduler,
    ctx: ExecutionContext,
    options: ExecuteOptions,
    cancel: CancellationToken,
    /// Ready tasks waiting for a worker slot.
    queue: VecDeque<TaskKey>,
    workers: JoinSet<TaskOutcome>,
    running: HashMap<Id, TaskKey>,
}

impl Runtime {
    fn new(
        graph: TaskGraph,
        ctx: ExecutionContext,
        options: ExecuteOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scheduler: Scheduler::new(graph, options.failure_mode),
            ctx,
            options,
            cancel,
            queue: VecDeque::new(),
            workers: JoinSet::new(),
            running: HashMap::new(),
        }
    }

    async fn run(mut self) -> ExecutionReport {
        info!(
            tasks = self.scheduler.graph().len(),
            concurrency = self.options.concurrency,
            "execution started"
        );

        let step = self.scheduler.start();
        self.absorb(step);

        let mut deadline: Option<Instant> = None;

        loop {
            if deadline.is_none() && !self.cancel.is_cancelled() {
                self.dispatch();
            }

            if self.scheduler.is_finished() {
                break;
            }
            if self.running.is_empty() && self.queue.is_empty() {
                warn!("no task can make progress; stopping run");
                break;
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled(), if deadline.is_none() => {
                    let cancelled = self.scheduler.cancel_pending();
                    self.queue.clear();
                    info!(
                        cancelled = cancelled.len(),
                        running = self.running.len(),
                        grace_ms = self.options.grace_period.as_millis() as u64,
                        "run cancelled; waiting for in-flight handlers"
                    );
                    deadline = Some(Instant::now() + self.options.grace_period);
                }

                Some(joined) = self.workers.join_next_with_id(), if !self.workers.is_empty() => {
                    self.finish_worker(joined);
                }

                _ = sleep_until(deadline), if deadline.is_some() => {
                    self.abort_running();
                }
            }
        }

        let report = ExecutionReport::from_scheduler(&self.scheduler);
        info!(summary = %report, "execution finished");
        report
    }

    /// Queue newly ready tasks, settling cache hits on the spot.
    fn absorb(&mut self, step: SchedulerStep) {
        let mut pending: VecDeque<TaskKey> = step.newly_ready.into();

        while let Some(key) = pending.pop_front() {
            match self.cached_outcome(&key) {
                Some(outcome) => {
                    debug!(task = %key, "cache hit; not dispatching");
                    let next = self.scheduler.complete(&key, outcome);
                    pending.extend(next.newly_ready);
                }
                None => self.queue.push_back(key),
            }
        }
    }

    fn cached_outcome(&self, key: &TaskKey) -> Option<TaskOutcome> {
        let node = self.scheduler.node(key)?;
        if node.force {
            return None;
        }
        let cache_key = CacheKey::new(key.action.clone(), key.intent, &node.version);
        let hit = self.ctx.cache().get(&cache_key)?;
        // Needs outputs but the record has none: a worker asks the handler.
        if node.outputs_required && hit.outputs.is_none() {
            return None;
        }
        Some(TaskOutcome::Cached(hit.outputs))
    }

    fn dispatch(&mut self) {
        while self.running.len() < self.options.concurrency.max(1) {
            let Some(key) = self.queue.pop_front() else {
                break;
            };
            if !self.scheduler.mark_running(&key) {
                continue;
            }
            let Some(job) = self.job_for(&key) else {
                warn!(task = %key, "dispatched task has no handler");
                let step = self
                    .scheduler
                    .complete(&key, TaskOutcome::Failed("no handler resolved".into()));
                self.absorb(step);
                continue;
            };

            let handle = self.workers.spawn(run_task(job, self.ctx.clone()));
            self.running.insert(handle.id(), key);
        }
    }

    fn finish_worker(&mut self, joined: Result<(Id, TaskOutcome), JoinError>) {
        let (id, outcome) = match joined {
            Ok(done) => done,
            Err(err) if err.is_panic() => {
                warn!(error = %err, "handler panicked");
                (err.id(), TaskOutcome::Failed("handler panicked".into()))
            }
            Err(err) => (err.id(), TaskOutcome::Cancelled),
        };
        let Some(key) = self.running.remove(&id) else {
            return;
        };
        let step = self.scheduler.complete(&key, outcome);
        self.absorb(step);
    }

    fn job_for(&self, key: &TaskKey) -> Option<TaskJob> {
        let node = self.scheduler.node(key)?;
        let handler = node.handler.as_ref()?;
        Some(TaskJob {
            key: key.clone(),
            action: Arc::clone(&node.action),
            version: node.version.clone(),
            handler: Arc::clone(handler),
            force: node.force,
            outputs_required: node.outputs_required,
            dependency_outputs: self.scheduler.dependency_outputs(key),
            cancel: self.cancel.child_token(),
        })
    }

    /// Grace period elapsed: stop whatever is still running.
    fn abort_running(&mut self) {
        // Outcomes that arrived just before the deadline still count.
        while let Some(joined) = self.workers.try_join_next_with_id() {
            self.finish_worker(joined);
        }

        self.workers.abort_all();
        for (_, key) in self.running.drain() {
            warn!(task = %key, "handler did not stop in time; aborting");
            self.scheduler.complete(&key, TaskOutcome::TimedOut);
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
