use std::path::PathBuf;
use std::sync::Arc;

use actiongraph::action::ActionSet;
use actiongraph::dag::{ActionGraph, TaskKey, TaskRequest, TaskState};
use actiongraph::engine::{ExecuteOptions, ExecutionContext};
use actiongraph::fs::MockFileSystem;
use actiongraph::watch::{DevSession, SourceDefaults, SourceResolver, WatchController, WatchEvent};
use actiongraph_test_utils::{
    ActionBuilder, ProjectBuilder, RecordingHandler, aref, init_tracing, with_timeout,
};
use tokio_util::sync::CancellationToken;

const ROOT: &str = "/proj";

fn abs(rel: &str) -> PathBuf {
    PathBuf::from(ROOT).join(rel)
}

/// `build:api` owns `api/src`, `deploy:api` owns (and can sync)
/// `api/static`, `test:api` owns `tests`.
fn project() -> ActionSet {
    ProjectBuilder::new()
        .with(ActionBuilder::build_action("api").include("api/src/**"))
        .with(
            ActionBuilder::deploy("api")
                .dep("build:api")
                .include("api/static/**")
                .sync(&["api/static/**"], "/srv/static"),
        )
        .with(
            ActionBuilder::test("api")
                .dep("deploy:api")
                .include("tests/**"),
        )
        .actions()
}

fn files() -> MockFileSystem {
    let fs = MockFileSystem::new();
    fs.add_file(abs("api/src/main.rs"), "fn main() {}");
    fs.add_file(abs("api/static/index.html"), "<h1>hi</h1>");
    fs.add_file(abs("tests/smoke.sh"), "curl api");
    fs.add_file(abs("README.md"), "docs");
    fs
}

fn controller(fs: &MockFileSystem, actions: &mut ActionSet) -> WatchController {
    let defaults = SourceDefaults {
        exclude: vec!["**/*.swp".to_string()],
    };
    let resolver = SourceResolver::new(ROOT, Arc::new(fs.clone()), &defaults, actions).unwrap();
    let graph = ActionGraph::build(actions).unwrap();
    let mut controller = WatchController::new(resolver, graph);
    controller.resolve_all(actions).unwrap();
    controller
}

#[test]
fn initial_resolution_hashes_matching_files() {
    let fs = files();
    let mut actions = project();
    controller(&fs, &mut actions);

    let build = actions.get(&aref("build:api")).unwrap();
    assert_eq!(
        build.source_inputs.files.keys().collect::<Vec<_>>(),
        vec!["api/src/main.rs"]
    );
    let test = actions.get(&aref("test:api")).unwrap();
    assert!(test.source_inputs.files.contains_key("tests/smoke.sh"));
}

#[test]
fn source_change_invalidates_dependents_without_sync() {
    let fs = files();
    let mut actions = project();
    let mut controller = controller(&fs, &mut actions);

    fs.add_file(abs("api/src/main.rs"), "fn main() { serve() }");
    let inv = controller
        .on_filesystem_event(&mut actions, &[abs("api/src/main.rs")])
        .unwrap();

    assert_eq!(inv.changed.iter().collect::<Vec<_>>(), vec![&aref("build:api")]);
    assert_eq!(inv.invalidated.len(), 3);
    assert!(inv.syncs.is_empty());
}

#[test]
fn syncable_change_yields_sync_target() {
    let fs = files();
    let mut actions = project();
    let mut controller = controller(&fs, &mut actions);

    fs.add_file(abs("api/static/index.html"), "<h1>hello</h1>");
    let inv = controller
        .on_filesystem_event(&mut actions, &[abs("api/static/index.html")])
        .unwrap();

    assert!(!inv.invalidated.contains(&aref("build:api")));
    assert!(inv.invalidated.contains(&aref("deploy:api")));
    assert!(inv.invalidated.contains(&aref("test:api")));
    assert_eq!(inv.syncs.len(), 1);
    assert_eq!(inv.syncs[0].action, aref("deploy:api"));
    assert_eq!(inv.syncs[0].files, vec![PathBuf::from("api/static/index.html")]);
}

#[test]
fn upstream_change_in_same_batch_prevents_sync() {
    let fs = files();
    let mut actions = project();
    let mut controller = controller(&fs, &mut actions);

    fs.add_file(abs("api/src/main.rs"), "changed");
    fs.add_file(abs("api/static/index.html"), "changed");
    let inv = controller
        .on_filesystem_event(
            &mut actions,
            &[abs("api/src/main.rs"), abs("api/static/index.html")],
        )
        .unwrap();

    assert_eq!(inv.changed.len(), 2);
    assert!(inv.syncs.is_empty());
}

#[test]
fn irrelevant_and_unchanged_paths_are_ignored() {
    let fs = files();
    let mut actions = project();
    let mut controller = controller(&fs, &mut actions);

    // Same content rewritten.
    fs.add_file(abs("api/src/main.rs"), "fn main() {}");
    let paths = [
        abs("api/src/main.rs"),
        abs("README.md"),
        abs(".actiongraph/results.json"),
        abs("api/src/.main.rs.swp"),
        PathBuf::from("/elsewhere/api/src/main.rs"),
    ];
    let inv = controller.on_filesystem_event(&mut actions, &paths).unwrap();
    assert!(inv.is_empty());
}

#[test]
fn added_and_removed_files_count_as_changes() {
    let fs = files();
    let mut actions = project();
    let mut controller = controller(&fs, &mut actions);

    fs.add_file(abs("tests/load.sh"), "hey");
    let inv = controller
        .on_filesystem_event(&mut actions, &[abs("tests/load.sh")])
        .unwrap();
    assert_eq!(inv.invalidated.iter().collect::<Vec<_>>(), vec![&aref("test:api")]);

    assert!(fs.remove_file(abs("tests/smoke.sh")));
    let inv = controller
        .on_filesystem_event(&mut actions, &[PathBuf::from("tests/smoke.sh")])
        .unwrap();
    assert!(inv.changed.contains(&aref("test:api")));
    let test = actions.get(&aref("test:api")).unwrap();
    assert!(!test.source_inputs.files.contains_key("tests/smoke.sh"));
}

fn session(fs: &MockFileSystem, handler: &RecordingHandler) -> DevSession {
    let mut actions = project();
    let controller = controller(fs, &mut actions);
    DevSession::new(
        actions,
        controller,
        handler.registry(),
        ExecutionContext::in_memory(),
        vec![TaskRequest::new(aref("test:api"))],
        ExecuteOptions::default(),
    )
}

fn key(s: &str) -> TaskKey {
    TaskKey::natural(aref(s))
}

#[tokio::test]
async fn session_syncs_instead_of_redeploying() {
    init_tracing();
    let fs = files();
    let handler = RecordingHandler::new();
    let mut session = session(&fs, &handler);

    let first = with_timeout(session.run_once(CancellationToken::new()))
        .await
        .unwrap();
    assert_eq!(first.succeeded, 3);
    let before = session.version_of(&aref("deploy:api")).unwrap();

    fs.add_file(abs("api/static/index.html"), "<h1>v2</h1>");
    let event = WatchEvent {
        paths: vec![abs("api/static/index.html")],
    };
    let report = with_timeout(session.apply(event, CancellationToken::new()))
        .await
        .unwrap()
        .expect("test:api was affected");

    let syncs = handler.syncs();
    assert_eq!(syncs.len(), 1);
    assert_eq!(syncs[0].action, aref("deploy:api"));

    assert_ne!(session.version_of(&aref("deploy:api")).unwrap(), before);
    assert_eq!(report.state_of(&key("build:api")), Some(&TaskState::Cached));
    assert_eq!(report.state_of(&key("deploy:api")), Some(&TaskState::Cached));
    assert_eq!(report.state_of(&key("test:api")), Some(&TaskState::Succeeded));
    assert_eq!(handler.calls_for("deploy:api"), 1);
    assert_eq!(handler.calls_for("test:api"), 2);
}

#[tokio::test]
async fn failed_sync_falls_back_to_redeploy() {
    let fs = files();
    let handler = RecordingHandler::new();
    handler.fail_sync("deploy:api");
    let mut session = session(&fs, &handler);
    with_timeout(session.run_once(CancellationToken::new()))
        .await
        .unwrap();

    fs.add_file(abs("api/static/index.html"), "<h1>v2</h1>");
    let event = WatchEvent {
        paths: vec![abs("api/static/index.html")],
    };
    let report = with_timeout(session.apply(event, CancellationToken::new()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(handler.syncs().len(), 1);
    assert_eq!(report.state_of(&key("deploy:api")), Some(&TaskState::Succeeded));
    assert_eq!(handler.calls_for("deploy:api"), 2);
    assert_eq!(handler.calls_for("build:api"), 1);
}

#[tokio::test]
async fn unaffected_change_runs_nothing() {
    let fs = files();
    let handler = RecordingHandler::new();
    let mut session = session(&fs, &handler);
    with_timeout(session.run_once(CancellationToken::new()))
        .await
        .unwrap();

    fs.add_file(abs("README.md"), "more docs");
    let event = WatchEvent {
        paths: vec![abs("README.md")],
    };
    let outcome = session.apply(event, CancellationToken::new()).await.unwrap();
    assert!(outcome.is_none());
    assert_eq!(handler.invocations().len(), 3);
}

#[tokio::test]
async fn run_loop_reacts_to_events_until_cancelled() {
    let fs = files();
    let handler = RecordingHandler::new();
    let session = session(&fs, &handler);
    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let cancel = CancellationToken::new();

    let task = tokio::spawn(session.run(rx, cancel.clone()));

    fs.add_file(abs("tests/smoke.sh"), "curl api/health");
    tx.send(WatchEvent {
        paths: vec![abs("tests/smoke.sh")],
    })
    .await
    .unwrap();

    with_timeout(async {
        while handler.calls_for("test:api") < 2 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await;

    cancel.cancel();
    with_timeout(task).await.unwrap().unwrap();
    assert_eq!(handler.calls_for("build:api"), 1);
}
