// src/lib.rs

pub mod action;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod tools;
pub mod types;
pub mod version;
pub mod watch;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::action::{ActionRef, ActionSet};
use crate::cli::CliArgs;
use crate::config::{load_and_validate, project_root};
use crate::dag::{ActionGraph, TaskGraph, TaskRequest};
use crate::engine::{CacheKey, ExecutionContext, FileResultStore, MemoryResultStore};
use crate::exec::{CommandHandler, EXEC_TYPE, HandlerRegistry};
use crate::fs::{FileSystem, RealFileSystem};
use crate::types::CacheStorageMode;
use crate::version::VersionCalculator;
use crate::watch::{DevSession, SourceResolver, WatchController, spawn_watcher};

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - config loading and source resolution
/// - handler registry and result cache
/// - a single run, a dry run, or a watch session
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    let project = load_and_validate(&args.config)
        .with_context(|| format!("loading project file {:?}", args.config))?;
    let root = project_root(&args.config);
    let root = root.canonicalize().unwrap_or(root);

    let mut options = project.execute_options();
    if let Some(concurrency) = args.concurrency {
        if concurrency == 0 {
            bail!("--concurrency must be >= 1");
        }
        options.concurrency = concurrency;
    }
    if let Some(mode) = args.failure_mode {
        options.failure_mode = mode;
    }

    let mut actions = project.actions.clone();
    let graph = ActionGraph::build(&actions)?;
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let resolver = SourceResolver::new(&root, fs, &project.defaults, &actions)?;
    let mut controller = WatchController::new(resolver, graph);
    controller.resolve_all(&mut actions)?;

    let registry = default_registry(&root);
    let ctx = open_context(&root, project.settings.cache)?;

    let active: BTreeSet<ActionRef> = actions.references().cloned().collect();
    let pruned = ctx.cache().prune(&active)?;
    if pruned > 0 {
        info!(pruned, "dropped cached results of removed actions");
    }

    let requests = effective_requests(&args, &actions);
    if requests.is_empty() {
        warn!("nothing to run: the project declares no actions");
        return Ok(0);
    }

    if args.dry_run {
        print_dry_run(&actions, controller.graph(), &registry, &ctx, &requests)?;
        return Ok(0);
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("interrupt received; cancelling");
            cancel.cancel();
        });
    }

    let mut session = DevSession::new(actions, controller, registry, ctx, requests, options);

    if args.watch {
        let (events_tx, events_rx) = mpsc::channel(16);
        let _watcher = spawn_watcher(&root, project.debounce(), events_tx)?;
        session.run(events_rx, cancel).await?;
        return Ok(0);
    }

    let report = session.run_once(cancel).await?;
    println!("{report}");
    if let Some(err) = report.error() {
        error!(error = %err, "run did not succeed");
    }
    Ok(report.exit_code())
}

/// Handlers available to every project.
pub fn default_registry(root: &Path) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register_all_kinds(EXEC_TYPE, Arc::new(CommandHandler::new(root)));
    registry
}

fn open_context(root: &Path, mode: CacheStorageMode) -> Result<ExecutionContext> {
    let ctx = match mode {
        CacheStorageMode::File => ExecutionContext::new(Box::new(FileResultStore::open(root)?)),
        CacheStorageMode::Memory => ExecutionContext::new(Box::new(MemoryResultStore::new())),
    };
    Ok(ctx)
}

/// Requests from the command line with `--force` applied, or every action's
/// natural intent when none were given.
fn effective_requests(args: &CliArgs, actions: &ActionSet) -> Vec<TaskRequest> {
    let requests: Vec<TaskRequest> = if args.requests.is_empty() {
        actions.references().cloned().map(TaskRequest::new).collect()
    } else {
        args.requests.clone()
    };
    requests.into_iter().map(|r| r.forced(args.force)).collect()
}

/// Print the expanded task graph in execution order.
fn print_dry_run(
    actions: &ActionSet,
    graph: &ActionGraph,
    registry: &HandlerRegistry,
    ctx: &ExecutionContext,
    requests: &[TaskRequest],
) -> Result<()> {
    let versions = VersionCalculator::new().resolve_all(actions)?;
    let tasks = TaskGraph::build(actions, graph, &versions, registry, requests)?;

    println!("actiongraph dry-run");
    println!("tasks ({}):", tasks.len());
    for key in tasks.order() {
        let Some(node) = tasks.get(key) else {
            continue;
        };
        let status = if node.is_disabled() {
            "disabled"
        } else if node.force {
            "forced"
        } else if ctx
            .cache()
            .get(&CacheKey::new(key.action.clone(), key.intent, &node.version))
            .is_some()
        {
            "cached"
        } else {
            "run"
        };
        let marker = if node.requested { "*" } else { " " };
        let label = key.to_string();
        println!("  {marker} {label:<32} {:<14} {status}", node.version.short());
        if !node.deps.is_empty() {
            let deps: Vec<String> = node.deps.iter().map(|d| d.to_string()).collect();
            println!("        after: {}", deps.join(", "));
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
