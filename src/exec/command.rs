// src/exec/command.rs

//! Generic handler for `type = "exec"` actions: runs shell commands.
//!
//! Recognized `spec` keys:
//! - `command`: default command for every intent
//! - `build` / `deploy` / `test` / `run` / `cleanup`: per-intent override
//! - `sync`: command run for live sync; changed files are passed in
//!   `ACTIONGRAPH_SYNC_FILES`, one per line
//! - `cwd`: working directory, relative to the project root
//! - `output_pattern`: regex with named groups `key` and `value`; every
//!   matching stdout line becomes an output

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context;
use regex::Regex;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action::{Action, Intent, Outputs};
use crate::exec::handler::{
    ActionHandler, HandlerContext, HandlerError, HandlerFuture, HandlerOutput, SyncRequest,
};

/// Handler type name under which [`CommandHandler`] is registered.
pub const EXEC_TYPE: &str = "exec";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub build: Option<String>,
    #[serde(default)]
    pub deploy: Option<String>,
    #[serde(default)]
    pub test: Option<String>,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default, alias = "delete")]
    pub cleanup: Option<String>,
    #[serde(default)]
    pub sync: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub output_pattern: Option<String>,
}

impl CommandSpec {
    pub fn from_action(action: &Action) -> Result<Self, HandlerError> {
        if action.spec.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(action.spec.clone())
            .map_err(|e| HandlerError::Failed(format!("invalid exec spec: {e}")))
    }

    /// The command for `intent`, falling back to `command`.
    ///
    /// Delete never falls back: tearing down needs an explicit command.
    pub fn script_for(&self, intent: Intent) -> Option<&str> {
        let specific = match intent {
            Intent::Build => &self.build,
            Intent::Deploy => &self.deploy,
            Intent::Test => &self.test,
            Intent::Run => &self.run,
            Intent::Delete => return self.cleanup.as_deref(),
        };
        specific.as_deref().or(self.command.as_deref())
    }
}

/// Runs commands through `sh -c` from the project root.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    root: PathBuf,
}

impl CommandHandler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn run_intent(&self, ctx: HandlerContext) -> Result<HandlerOutput, HandlerError> {
        let spec = CommandSpec::from_action(&ctx.action)?;
        let script = spec.script_for(ctx.intent).ok_or_else(|| {
            HandlerError::Failed(format!(
                "no command configured for {} of '{}'",
                ctx.intent, ctx.action.reference
            ))
        })?;

        let pattern = match spec.output_pattern.as_deref() {
            Some(p) => Some(
                Regex::new(p)
                    .map_err(|e| HandlerError::Failed(format!("invalid output_pattern: {e}")))?,
            ),
            None => None,
        };

        let dependency_outputs = serde_json::to_string(&ctx.dependency_outputs)
            .map_err(anyhow::Error::from)?;

        let mut cmd = shell(script);
        cmd.current_dir(self.working_dir(&spec))
            .env("ACTIONGRAPH_ACTION", ctx.action.reference.to_string())
            .env("ACTIONGRAPH_INTENT", ctx.intent.as_str())
            .env("ACTIONGRAPH_VERSION", ctx.version.as_str())
            .env("ACTIONGRAPH_DEPENDENCY_OUTPUTS", dependency_outputs);

        info!(
            action = %ctx.action.reference,
            intent = %ctx.intent,
            cmd = %script,
            "starting command"
        );

        let outputs = run_to_completion(cmd, &ctx.action, pattern, &ctx.cancel).await?;
        Ok(HandlerOutput::new(outputs))
    }

    fn working_dir(&self, spec: &CommandSpec) -> PathBuf {
        match spec.cwd.as_deref() {
            Some(dir) => self.root.join(dir),
            None => self.root.clone(),
        }
    }
}

impl ActionHandler for CommandHandler {
    fn build(&self, ctx: HandlerContext) -> HandlerFuture<'_, HandlerOutput> {
        Box::pin(self.run_intent(ctx))
    }

    fn deploy(&self, ctx: HandlerContext) -> HandlerFuture<'_, HandlerOutput> {
        Box::pin(self.run_intent(ctx))
    }

    fn test(&self, ctx: HandlerContext) -> HandlerFuture<'_, HandlerOutput> {
        Box::pin(self.run_intent(ctx))
    }

    fn run(&self, ctx: HandlerContext) -> HandlerFuture<'_, HandlerOutput> {
        Box::pin(self.run_intent(ctx))
    }

    fn cleanup(&self, ctx: HandlerContext) -> HandlerFuture<'_, HandlerOutput> {
        Box::pin(self.run_intent(ctx))
    }

    fn sync(&self, request: SyncRequest) -> HandlerFuture<'_, ()> {
        Box::pin(async move {
            let spec = CommandSpec::from_action(&request.action)?;
            let Some(script) = spec.sync.as_deref() else {
                return Err(HandlerError::unsupported("sync", &request.action));
            };

            let files = request
                .files
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("\n");

            let mut cmd = shell(script);
            cmd.current_dir(self.working_dir(&spec))
                .env("ACTIONGRAPH_ACTION", request.action.reference.to_string())
                .env("ACTIONGRAPH_SYNC_FILES", files);

            info!(
                action = %request.action.reference,
                files = request.files.len(),
                "syncing files"
            );
            run_to_completion(cmd, &request.action, None, &request.cancel).await?;
            Ok(())
        })
    }
}

/// Build a shell command appropriate for the platform.
fn shell(script: &str) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(script);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(script);
        c
    };
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

async fn run_to_completion(
    mut cmd: Command,
    action: &Action,
    pattern: Option<Regex>,
    cancel: &CancellationToken,
) -> Result<Outputs, HandlerError> {
    let name = action.reference.to_string();

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for '{name}'"))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // Consume stdout, capturing outputs as we go.
    let stdout_task = {
        let name = name.clone();
        tokio::spawn(async move {
            let mut outputs = Outputs::new();
            let Some(stdout) = stdout else {
                return outputs;
            };
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(action = %name, "stdout: {}", line);
                if let Some(caps) = pattern.as_ref().and_then(|re| re.captures(&line)) {
                    if let (Some(k), Some(v)) = (caps.name("key"), caps.name("value")) {
                        outputs.insert(
                            k.as_str().to_string(),
                            serde_json::Value::String(v.as_str().to_string()),
                        );
                    }
                }
            }
            outputs
        })
    };

    // Always consume stderr so buffers don't fill; keep the last line for
    // error messages.
    let stderr_task = {
        let name = name.clone();
        tokio::spawn(async move {
            let mut last = None;
            let Some(stderr) = stderr else {
                return last;
            };
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(action = %name, "stderr: {}", line);
                if !line.trim().is_empty() {
                    last = Some(line);
                }
            }
            last
        })
    };

    let status = tokio::select! {
        status = child.wait() => status.with_context(|| format!("waiting for process of '{name}'"))?,
        _ = cancel.cancelled() => {
            warn!(action = %name, "cancelled; killing process");
            if let Err(err) = child.kill().await {
                warn!(action = %name, error = %err, "failed to kill process");
            }
            stdout_task.abort();
            stderr_task.abort();
            return Err(HandlerError::Cancelled);
        }
    };

    let outputs = stdout_task.await.unwrap_or_default();
    let last_stderr = stderr_task.await.ok().flatten();

    let code = status.code().unwrap_or(-1);
    info!(action = %name, exit_code = code, success = status.success(), "process exited");

    if status.success() {
        Ok(outputs)
    } else {
        let mut message = format!("command exited with status {code}");
        if let Some(line) = last_stderr {
            message.push_str(": ");
            message.push_str(&line);
        }
        Err(HandlerError::Failed(message))
    }
}
