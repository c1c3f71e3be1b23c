#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actiongraph::action::{ActionRef, Intent, Outputs};
use actiongraph::exec::{
    ActionHandler, HandlerContext, HandlerError, HandlerFuture, HandlerOutput, HandlerRegistry,
    StatusReport, SyncRequest,
};
use actiongraph::version::Version;
use tokio::time::Instant;

use crate::builders::aref;

/// Handler type of actions built with [`crate::ActionBuilder`].
pub const FAKE_TYPE: &str = "fake";

/// One handler call, as seen by the handler.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub action: ActionRef,
    pub intent: Intent,
    pub version: Version,
    pub dependency_outputs: BTreeMap<ActionRef, Outputs>,
    pub started_at: Instant,
    pub finished_at: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCall {
    pub action: ActionRef,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default)]
struct Behavior {
    fail: Option<String>,
    delay: Option<Duration>,
    outputs: Outputs,
    status: Option<StatusReport>,
    /// Keep sleeping through cancellation.
    stubborn: bool,
    fail_sync: bool,
    panic: bool,
}

#[derive(Debug, Default)]
struct State {
    behaviors: BTreeMap<ActionRef, Behavior>,
    default_delay: Duration,
    invocations: Vec<Invocation>,
    cancelled: Vec<ActionRef>,
    status_calls: Vec<ActionRef>,
    syncs: Vec<SyncCall>,
}

/// Fake handler that records every call instead of touching the world.
///
/// Behavior is configured per action reference: failures, delays, outputs
/// and `get_status` answers. Clones share their recordings.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    state: Arc<Mutex<State>>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with this handler for every kind under [`FAKE_TYPE`].
    pub fn registry(&self) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register_all_kinds(FAKE_TYPE, Arc::new(self.clone()));
        registry
    }

    fn configure(&self, reference: &str, f: impl FnOnce(&mut Behavior)) -> &Self {
        let mut state = self.state.lock().unwrap();
        f(state.behaviors.entry(aref(reference)).or_default());
        self
    }

    pub fn fail(&self, reference: &str, message: &str) -> &Self {
        let message = message.to_string();
        self.configure(reference, |b| b.fail = Some(message))
    }

    pub fn succeed(&self, reference: &str) -> &Self {
        self.configure(reference, |b| b.fail = None)
    }

    pub fn delay(&self, reference: &str, delay: Duration) -> &Self {
        self.configure(reference, |b| b.delay = Some(delay))
    }

    /// Delay of every action without its own.
    pub fn default_delay(&self, delay: Duration) -> &Self {
        self.state.lock().unwrap().default_delay = delay;
        self
    }

    pub fn outputs(&self, reference: &str, outputs: serde_json::Value) -> &Self {
        let outputs: Outputs = serde_json::from_value(outputs).expect("outputs must be an object");
        self.configure(reference, |b| b.outputs = outputs)
    }

    pub fn status(&self, reference: &str, status: StatusReport) -> &Self {
        self.configure(reference, |b| b.status = Some(status))
    }

    /// Ignore cancellation and sleep the full delay.
    pub fn stubborn(&self, reference: &str) -> &Self {
        self.configure(reference, |b| b.stubborn = true)
    }

    pub fn fail_sync(&self, reference: &str) -> &Self {
        self.configure(reference, |b| b.fail_sync = true)
    }

    /// Panic inside the handler once the invocation is recorded.
    pub fn panics(&self, reference: &str) -> &Self {
        self.configure(reference, |b| b.panic = true)
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.lock().unwrap().invocations.clone()
    }

    /// `intent:action` labels in start order.
    pub fn started(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .map(|i| format!("{}@{}", i.intent, i.action))
            .collect()
    }

    pub fn calls_for(&self, reference: &str) -> usize {
        let reference = aref(reference);
        self.invocations()
            .iter()
            .filter(|i| i.action == reference)
            .count()
    }

    pub fn ran(&self, reference: &str) -> bool {
        self.calls_for(reference) > 0
    }

    pub fn invocation(&self, reference: &str, intent: Intent) -> Option<Invocation> {
        let reference = aref(reference);
        self.invocations()
            .into_iter()
            .find(|i| i.action == reference && i.intent == intent)
    }

    /// `first` finished before `second` started.
    pub fn finished_before(&self, first: &str, second: &str) -> bool {
        let find = |r: &str| {
            let r = aref(r);
            self.invocations().into_iter().find(|i| i.action == r)
        };
        match (find(first), find(second)) {
            (Some(a), Some(b)) => a.finished_at.is_some_and(|end| end <= b.started_at),
            _ => false,
        }
    }

    pub fn cancelled(&self) -> BTreeSet<ActionRef> {
        self.state.lock().unwrap().cancelled.iter().cloned().collect()
    }

    pub fn status_calls(&self) -> Vec<ActionRef> {
        self.state.lock().unwrap().status_calls.clone()
    }

    pub fn syncs(&self) -> Vec<SyncCall> {
        self.state.lock().unwrap().syncs.clone()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn behavior(&self, reference: &ActionRef) -> (Behavior, Duration) {
        let state = self.state.lock().unwrap();
        let behavior = state.behaviors.get(reference).cloned().unwrap_or_default();
        let delay = behavior.delay.unwrap_or(state.default_delay);
        (behavior, delay)
    }

    async fn perform(&self, ctx: HandlerContext) -> Result<HandlerOutput, HandlerError> {
        let reference = ctx.action.reference.clone();
        let (behavior, delay) = self.behavior(&reference);

        let index = {
            let mut state = self.state.lock().unwrap();
            state.invocations.push(Invocation {
                action: reference.clone(),
                intent: ctx.intent,
                version: ctx.version.clone(),
                dependency_outputs: ctx.dependency_outputs.clone(),
                started_at: Instant::now(),
                finished_at: None,
            });
            state.invocations.len() - 1
        };

        if behavior.panic {
            panic!("handler for {reference} blew up");
        }

        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        let interrupted = if delay.is_zero() {
            false
        } else if behavior.stubborn {
            tokio::time::sleep(delay).await;
            false
        } else {
            tokio::select! {
                _ = ctx.cancel.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.invocations[index].finished_at = Some(Instant::now());

        if interrupted {
            state.cancelled.push(reference);
            return Err(HandlerError::Cancelled);
        }
        match behavior.fail {
            Some(message) => Err(HandlerError::Failed(message)),
            None => Ok(HandlerOutput::new(behavior.outputs)),
        }
    }
}

impl ActionHandler for RecordingHandler {
    fn get_status(&self, ctx: HandlerContext) -> HandlerFuture<'_, StatusReport> {
        Box::pin(async move {
            let reference = ctx.action.reference.clone();
            let (behavior, _) = self.behavior(&reference);
            self.state.lock().unwrap().status_calls.push(reference);
            Ok(behavior.status.unwrap_or_else(StatusReport::outdated))
        })
    }

    fn build(&self, ctx: HandlerContext) -> HandlerFuture<'_, HandlerOutput> {
        Box::pin(self.perform(ctx))
    }

    fn deploy(&self, ctx: HandlerContext) -> HandlerFuture<'_, HandlerOutput> {
        Box::pin(self.perform(ctx))
    }

    fn test(&self, ctx: HandlerContext) -> HandlerFuture<'_, HandlerOutput> {
        Box::pin(self.perform(ctx))
    }

    fn run(&self, ctx: HandlerContext) -> HandlerFuture<'_, HandlerOutput> {
        Box::pin(self.perform(ctx))
    }

    fn cleanup(&self, ctx: HandlerContext) -> HandlerFuture<'_, HandlerOutput> {
        Box::pin(self.perform(ctx))
    }

    fn sync(&self, request: SyncRequest) -> HandlerFuture<'_, ()> {
        Box::pin(async move {
            let reference = request.action.reference.clone();
            let (behavior, _) = self.behavior(&reference);
            self.state.lock().unwrap().syncs.push(SyncCall {
                action: reference,
                files: request.files,
            });
            if behavior.fail_sync {
                return Err(HandlerError::Failed("sync failed".to_string()));
            }
            Ok(())
        })
    }
}
