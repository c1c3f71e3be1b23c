#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use actiongraph::action::ActionSet;
use actiongraph::dag::{FailureReason, TaskGraph, TaskKey, TaskRequest, TaskState};
use actiongraph::engine::{ExecuteOptions, ExecutionContext, ExecutionReport, execute};
use actiongraph::exec::{ActionHandler, CommandHandler, EXEC_TYPE, HandlerRegistry, SyncRequest};
use actiongraph_test_utils::{ActionBuilder, ProjectBuilder, aref, with_timeout};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn exec(builder: ActionBuilder, spec: serde_json::Value) -> ActionBuilder {
    builder.action_type(EXEC_TYPE).spec(spec)
}

fn registry(root: &Path) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register_all_kinds(EXEC_TYPE, Arc::new(CommandHandler::new(root)));
    registry
}

async fn run(
    root: &Path,
    set: &ActionSet,
    requests: &[TaskRequest],
    cancel: CancellationToken,
) -> ExecutionReport {
    let graph = TaskGraph::plan(set, &registry(root), requests).unwrap();
    with_timeout(execute(
        graph,
        &ExecutionContext::in_memory(),
        ExecuteOptions {
            grace_period: Duration::from_secs(1),
            ..ExecuteOptions::default()
        },
        cancel,
    ))
    .await
}

fn key(s: &str) -> TaskKey {
    TaskKey::natural(aref(s))
}

#[tokio::test]
async fn outputs_are_parsed_and_passed_downstream() {
    let dir = tempfile::tempdir().unwrap();
    let set = ProjectBuilder::new()
        .with(exec(
            ActionBuilder::deploy("db"),
            json!({
                "command": "echo starting; echo url=postgres://db:5432",
                "output_pattern": r"^(?P<key>\w+)=(?P<value>.*)$",
            }),
        ))
        .with(exec(
            ActionBuilder::deploy("api").needs_outputs_of("deploy:db"),
            json!({
                "command": "echo \"$ACTIONGRAPH_DEPENDENCY_OUTPUTS\" > deps.json; \
                            echo \"$ACTIONGRAPH_INTENT $ACTIONGRAPH_ACTION\" > whoami",
            }),
        ))
        .actions();

    let report = run(
        dir.path(),
        &set,
        &[TaskRequest::new(aref("deploy:api"))],
        CancellationToken::new(),
    )
    .await;

    assert!(report.is_success(), "{report}");
    assert_eq!(
        report.outputs_of(&key("deploy:db")).unwrap()["url"],
        json!("postgres://db:5432")
    );

    let deps: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("deps.json")).unwrap())
            .unwrap();
    assert_eq!(deps["deploy:db"]["url"], json!("postgres://db:5432"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("whoami")).unwrap().trim(),
        "deploy deploy:api"
    );
}

#[tokio::test]
async fn failing_command_reports_status_and_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let set = ProjectBuilder::new()
        .with(exec(
            ActionBuilder::build_action("api"),
            json!({ "command": "echo 'linker not found' >&2; exit 3" }),
        ))
        .actions();

    let report = run(
        dir.path(),
        &set,
        &[TaskRequest::new(aref("build:api"))],
        CancellationToken::new(),
    )
    .await;

    assert_eq!(report.failed, 1);
    let message = &report.failures[0].message;
    assert!(message.contains("status 3"), "{message}");
    assert!(message.contains("linker not found"), "{message}");
}

#[tokio::test]
async fn cwd_is_relative_to_the_root() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("api")).unwrap();
    let set = ProjectBuilder::new()
        .with(exec(
            ActionBuilder::build_action("api"),
            json!({ "command": "pwd > where", "cwd": "api" }),
        ))
        .actions();

    let report = run(
        dir.path(),
        &set,
        &[TaskRequest::new(aref("build:api"))],
        CancellationToken::new(),
    )
    .await;

    assert!(report.is_success(), "{report}");
    assert!(dir.path().join("api/where").is_file());
}

#[tokio::test]
async fn delete_without_cleanup_command_fails() {
    let dir = tempfile::tempdir().unwrap();
    let set = ProjectBuilder::new()
        .with(exec(ActionBuilder::deploy("api"), json!({ "command": "true" })))
        .actions();

    let report = run(
        dir.path(),
        &set,
        &[TaskRequest::delete("api")],
        CancellationToken::new(),
    )
    .await;

    assert_eq!(report.failed, 1);
    assert!(report.failures[0].message.contains("no command configured"));
}

#[tokio::test]
async fn cancellation_kills_the_process() {
    let dir = tempfile::tempdir().unwrap();
    let set = ProjectBuilder::new()
        .with(exec(
            ActionBuilder::build_action("slow"),
            json!({ "command": "sleep 30" }),
        ))
        .actions();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
    }

    let started = std::time::Instant::now();
    let report = run(
        dir.path(),
        &set,
        &[TaskRequest::new(aref("build:slow"))],
        cancel,
    )
    .await;

    assert_eq!(report.state_of(&key("build:slow")), Some(&TaskState::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_ne!(
        report.state_of(&key("build:slow")),
        Some(&TaskState::Failed(FailureReason::TimedOut))
    );
}

#[tokio::test]
async fn sync_passes_changed_files() {
    let dir = tempfile::tempdir().unwrap();
    let action = exec(
        ActionBuilder::deploy("web").sync(&["web/**"], "/srv"),
        json!({
            "command": "true",
            "sync": "printf '%s' \"$ACTIONGRAPH_SYNC_FILES\" > synced",
        }),
    )
    .build();
    let handler = CommandHandler::new(dir.path());

    handler
        .sync(SyncRequest {
            action: Arc::new(action),
            files: vec![PathBuf::from("web/a.css"), PathBuf::from("web/b.js")],
            cancel: CancellationToken::new(),
        })
        .await
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(dir.path().join("synced")).unwrap(),
        "web/a.css\nweb/b.js"
    );

    let no_sync = exec(ActionBuilder::deploy("api"), json!({ "command": "true" })).build();
    let err = handler
        .sync(SyncRequest {
            action: Arc::new(no_sync),
            files: vec![],
            cancel: CancellationToken::new(),
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("does not support sync"), "{err}");
}
