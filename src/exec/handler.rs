// src/exec/handler.rs

//! Pluggable action handler abstraction.
//!
//! The scheduler never knows how a container is built or a chart deployed.
//! It resolves one [`ActionHandler`] per task from the [`HandlerRegistry`]
//! (keyed by action kind and type) and calls the operation matching the
//! task's intent. Tests register fake handlers that record invocations
//! instead of touching the outside world.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::action::{Action, ActionKind, ActionRef, Intent, Outputs};
use crate::errors::ConfigError;
use crate::version::Version;

/// Boxed future returned by handler operations.
pub type HandlerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, HandlerError>> + Send + 'a>>;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{action_type} handler does not support {operation}")]
    Unsupported {
        operation: &'static str,
        action_type: String,
    },

    #[error("{0}")]
    Failed(String),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn unsupported(operation: &'static str, action: &Action) -> Self {
        HandlerError::Unsupported {
            operation,
            action_type: action.action_type.clone(),
        }
    }
}

/// Everything a handler gets to see for one operation.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub action: Arc<Action>,
    pub intent: Intent,
    pub version: Version,
    /// Outputs of direct dependencies that produced any.
    pub dependency_outputs: BTreeMap<ActionRef, Outputs>,
    /// Fires when the run is cancelled; handlers should stop promptly.
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutput {
    pub outputs: Outputs,
}

impl HandlerOutput {
    pub fn new(outputs: Outputs) -> Self {
        Self { outputs }
    }
}

/// What the handler reports about the live state of an action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReport {
    /// The outside world already reflects the requested version.
    pub up_to_date: bool,
    /// Outputs observable without re-running, when known.
    pub outputs: Option<Outputs>,
}

impl StatusReport {
    pub fn outdated() -> Self {
        Self::default()
    }

    pub fn ready(outputs: Outputs) -> Self {
        Self {
            up_to_date: true,
            outputs: Some(outputs),
        }
    }
}

/// A batch of changed files to push into a running workload.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub action: Arc<Action>,
    /// Changed paths, relative to the project root.
    pub files: Vec<PathBuf>,
    pub cancel: CancellationToken,
}

/// Trait implemented by every action type.
///
/// All operations have a default that reports them as unsupported, so a
/// handler for build actions only has to provide `build`.
pub trait ActionHandler: Send + Sync + fmt::Debug {
    fn get_status(&self, ctx: HandlerContext) -> HandlerFuture<'_, StatusReport> {
        let _ = ctx;
        Box::pin(async { Ok(StatusReport::outdated()) })
    }

    fn build(&self, ctx: HandlerContext) -> HandlerFuture<'_, HandlerOutput> {
        Box::pin(async move { Err(HandlerError::unsupported("build", &ctx.action)) })
    }

    fn deploy(&self, ctx: HandlerContext) -> HandlerFuture<'_, HandlerOutput> {
        Box::pin(async move { Err(HandlerError::unsupported("deploy", &ctx.action)) })
    }

    fn test(&self, ctx: HandlerContext) -> HandlerFuture<'_, HandlerOutput> {
        Box::pin(async move { Err(HandlerError::unsupported("test", &ctx.action)) })
    }

    fn run(&self, ctx: HandlerContext) -> HandlerFuture<'_, HandlerOutput> {
        Box::pin(async move { Err(HandlerError::unsupported("run", &ctx.action)) })
    }

    /// Tear down whatever `deploy` created.
    fn cleanup(&self, ctx: HandlerContext) -> HandlerFuture<'_, HandlerOutput> {
        Box::pin(async move { Err(HandlerError::unsupported("cleanup", &ctx.action)) })
    }

    fn sync(&self, request: SyncRequest) -> HandlerFuture<'_, ()> {
        Box::pin(async move { Err(HandlerError::unsupported("sync", &request.action)) })
    }
}

/// Call the operation matching `ctx.intent`.
pub async fn invoke(
    handler: &dyn ActionHandler,
    ctx: HandlerContext,
) -> Result<HandlerOutput, HandlerError> {
    match ctx.intent {
        Intent::Build => handler.build(ctx).await,
        Intent::Deploy => handler.deploy(ctx).await,
        Intent::Test => handler.test(ctx).await,
        Intent::Run => handler.run(ctx).await,
        Intent::Delete => handler.cleanup(ctx).await,
    }
}

/// Handlers keyed by `(kind, type)`.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(ActionKind, String), Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: ActionKind,
        action_type: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) -> &mut Self {
        self.handlers.insert((kind, action_type.into()), handler);
        self
    }

    /// Register the same handler for every action kind.
    pub fn register_all_kinds(
        &mut self,
        action_type: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) -> &mut Self {
        let action_type = action_type.into();
        for kind in ActionKind::ALL {
            self.handlers
                .insert((kind, action_type.clone()), Arc::clone(&handler));
        }
        self
    }

    pub fn get(&self, kind: ActionKind, action_type: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers
            .get(&(kind, action_type.to_string()))
            .cloned()
    }

    /// Resolve the handler for `action` or fail with `MissingHandler`.
    pub fn resolve(&self, action: &Action) -> Result<Arc<dyn ActionHandler>, ConfigError> {
        self.get(action.kind(), &action.action_type)
            .ok_or_else(|| ConfigError::MissingHandler {
                kind: action.kind(),
                action_type: action.action_type.clone(),
                action: action.reference.clone(),
            })
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .handlers
            .keys()
            .map(|(kind, ty)| format!("{kind}/{ty}"))
            .collect();
        keys.sort();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct BuildOnly;

    impl ActionHandler for BuildOnly {
        fn build(&self, _ctx: HandlerContext) -> HandlerFuture<'_, HandlerOutput> {
            Box::pin(async { Ok(HandlerOutput::default()) })
        }
    }

    fn ctx(kind: ActionKind, intent: Intent) -> HandlerContext {
        let action = Action::new(kind, "fake", "a");
        let version = crate::version::compute_version(&action, &BTreeMap::new());
        HandlerContext {
            action: Arc::new(action),
            intent,
            version,
            dependency_outputs: BTreeMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn unimplemented_operations_are_unsupported() {
        let handler = BuildOnly;
        assert!(invoke(&handler, ctx(ActionKind::Build, Intent::Build)).await.is_ok());

        let err = invoke(&handler, ctx(ActionKind::Deploy, Intent::Delete))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Unsupported { operation: "cleanup", .. }
        ));
    }

    #[test]
    fn registry_reports_missing_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register(ActionKind::Build, "fake", Arc::new(BuildOnly));

        let build = Action::new(ActionKind::Build, "fake", "a");
        assert!(registry.resolve(&build).is_ok());

        let deploy = Action::new(ActionKind::Deploy, "fake", "a");
        let err = registry.resolve(&deploy).unwrap_err();
        assert!(matches!(err, ConfigError::MissingHandler { .. }));
    }
}
