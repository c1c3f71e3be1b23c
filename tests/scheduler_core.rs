use std::collections::BTreeMap;

use actiongraph::action::{ActionSet, Outputs};
use actiongraph::dag::{FailureReason, Scheduler, TaskGraph, TaskKey, TaskOutcome, TaskRequest, TaskState};
use actiongraph::types::FailureMode;
use actiongraph_test_utils::builders::api_project;
use actiongraph_test_utils::{ActionBuilder, ProjectBuilder, RecordingHandler, aref, init_tracing};
use serde_json::json;

fn key(s: &str) -> TaskKey {
    TaskKey::natural(aref(s))
}

fn scheduler(set: &ActionSet, requests: &[&str], mode: FailureMode) -> Scheduler {
    let handler = RecordingHandler::new();
    let requests: Vec<TaskRequest> = requests.iter().map(|r| r.parse().unwrap()).collect();
    let graph = TaskGraph::plan(set, &handler.registry(), &requests).unwrap();
    Scheduler::new(graph, mode)
}

fn run(s: &mut Scheduler, task: &str, outcome: TaskOutcome) -> actiongraph::dag::SchedulerStep {
    assert!(s.mark_running(&key(task)), "{task} was not ready");
    s.complete(&key(task), outcome)
}

fn ok() -> TaskOutcome {
    TaskOutcome::Succeeded(Outputs::new())
}

/// `build:base -> build:api -> deploy:api` next to `build:web -> test:web`.
fn two_branches() -> ActionSet {
    ProjectBuilder::new()
        .with(ActionBuilder::build_action("base"))
        .with(ActionBuilder::build_action("api").dep("build:base"))
        .with(ActionBuilder::deploy("api").dep("build:api"))
        .with(ActionBuilder::build_action("web"))
        .with(ActionBuilder::test("web").dep("build:web"))
        .actions()
}

#[test]
fn chain_releases_one_task_at_a_time() {
    init_tracing();
    let set = api_project().actions();
    let mut s = scheduler(&set, &["test:api"], FailureMode::FailFast);

    let step = s.start();
    assert_eq!(step.newly_ready, vec![key("build:base")]);
    assert!(!step.run_finished);

    assert_eq!(run(&mut s, "build:base", ok()).newly_ready, vec![key("build:api")]);
    assert_eq!(run(&mut s, "build:api", ok()).newly_ready, vec![key("deploy:api")]);
    assert_eq!(run(&mut s, "deploy:api", ok()).newly_ready, vec![key("test:api")]);

    let last = run(&mut s, "test:api", TaskOutcome::Cached(None));
    assert!(last.run_finished);
    assert_eq!(s.state_of(&key("test:api")), Some(&TaskState::Cached));
}

#[test]
fn fail_fast_aborts_tasks_that_have_not_started() {
    let set = two_branches();
    let mut s = scheduler(&set, &["deploy:api", "test:web"], FailureMode::FailFast);

    let mut ready = s.start().newly_ready;
    ready.sort();
    assert_eq!(ready, vec![key("build:base"), key("build:web")]);
    assert!(s.mark_running(&key("build:base")));
    assert!(s.mark_running(&key("build:web")));

    let step = s.complete(&key("build:base"), TaskOutcome::Failed("boom".into()));
    assert!(step.newly_failed.contains(&key("build:api")));
    assert!(step.newly_failed.contains(&key("test:web")));
    assert_eq!(
        s.state_of(&key("build:api")),
        Some(&TaskState::Failed(FailureReason::DependencyFailed(key("build:base"))))
    );
    assert_eq!(
        s.state_of(&key("test:web")),
        Some(&TaskState::Failed(FailureReason::Aborted))
    );

    // The running task is allowed to finish; nothing new is released.
    let step = s.complete(&key("build:web"), ok());
    assert!(step.newly_ready.is_empty());
    assert!(step.run_finished);
    assert_eq!(s.state_of(&key("build:web")), Some(&TaskState::Succeeded));
}

#[test]
fn continue_mode_keeps_unrelated_branches_going() {
    let set = two_branches();
    let mut s = scheduler(&set, &["deploy:api", "test:web"], FailureMode::Continue);
    s.start();
    assert!(s.mark_running(&key("build:base")));
    assert!(s.mark_running(&key("build:web")));

    s.complete(&key("build:base"), TaskOutcome::Failed("boom".into()));
    assert!(matches!(
        s.state_of(&key("deploy:api")),
        Some(TaskState::Failed(FailureReason::DependencyFailed(_)))
    ));

    let step = s.complete(&key("build:web"), ok());
    assert_eq!(step.newly_ready, vec![key("test:web")]);
    let step = run(&mut s, "test:web", ok());
    assert!(step.run_finished);
}

#[test]
fn outputs_flow_to_direct_dependents() {
    let set = ProjectBuilder::new()
        .with(ActionBuilder::deploy("db"))
        .with(ActionBuilder::deploy("api").needs_outputs_of("deploy:db"))
        .actions();
    let mut s = scheduler(&set, &["deploy:api"], FailureMode::FailFast);
    s.start();

    let mut outputs = Outputs::new();
    outputs.insert("url".into(), json!("postgres://db:5432"));
    run(&mut s, "deploy:db", TaskOutcome::Succeeded(outputs.clone()));

    let mut expected = BTreeMap::new();
    expected.insert(aref("deploy:db"), outputs);
    assert_eq!(s.dependency_outputs(&key("deploy:api")), expected);
    assert_eq!(s.state_of(&key("deploy:api")), Some(&TaskState::Ready));
}

#[test]
fn cache_hit_without_outputs_fails_reader_with_missing_outputs() {
    let set = ProjectBuilder::new()
        .with(ActionBuilder::deploy("db"))
        .with(ActionBuilder::deploy("api").needs_outputs_of("deploy:db"))
        .actions();
    let mut s = scheduler(&set, &["deploy:api"], FailureMode::Continue);
    s.start();

    let step = run(&mut s, "deploy:db", TaskOutcome::Cached(None));
    assert_eq!(step.newly_failed, vec![key("deploy:api")]);
    assert_eq!(
        s.state_of(&key("deploy:api")),
        Some(&TaskState::Failed(FailureReason::MissingOutputs(aref("deploy:db"))))
    );
}

#[test]
fn disabled_tasks_resolve_without_dispatch() {
    let set = ProjectBuilder::new()
        .with(ActionBuilder::build_action("lint").disabled())
        .with(ActionBuilder::test("api").dep("build:lint"))
        .actions();
    let mut s = scheduler(&set, &["test:api"], FailureMode::FailFast);

    let step = s.start();
    assert_eq!(step.newly_ready, vec![key("test:api")]);
    assert_eq!(s.state_of(&key("build:lint")), Some(&TaskState::Disabled));
}

#[test]
fn cancelled_task_cancels_its_dependents() {
    let set = api_project().actions();
    let mut s = scheduler(&set, &["test:api"], FailureMode::FailFast);
    s.start();

    let step = run(&mut s, "build:base", TaskOutcome::Cancelled);
    assert!(step.run_finished);
    for task in ["build:base", "build:api", "deploy:api", "test:api"] {
        assert_eq!(s.state_of(&key(task)), Some(&TaskState::Cancelled), "{task}");
    }
}

#[test]
fn cancel_pending_leaves_running_tasks_alone() {
    let set = two_branches();
    let mut s = scheduler(&set, &["deploy:api", "test:web"], FailureMode::FailFast);
    s.start();
    assert!(s.mark_running(&key("build:base")));

    let cancelled = s.cancel_pending();
    assert!(cancelled.contains(&key("build:web")));
    assert!(!cancelled.contains(&key("build:base")));
    assert_eq!(s.running(), vec![key("build:base")]);

    // A ready task that was cancelled can no longer be dispatched.
    assert!(!s.mark_running(&key("build:web")));

    let step = s.complete(&key("build:base"), TaskOutcome::TimedOut);
    assert!(step.run_finished);
    assert_eq!(
        s.state_of(&key("build:base")),
        Some(&TaskState::Failed(FailureReason::TimedOut))
    );
}

#[test]
fn late_completions_are_ignored() {
    let set = api_project().actions();
    let mut s = scheduler(&set, &["build:base"], FailureMode::FailFast);
    s.start();
    run(&mut s, "build:base", ok());

    let step = s.complete(&key("build:base"), TaskOutcome::Failed("late".into()));
    assert!(step.is_empty());
    assert_eq!(s.state_of(&key("build:base")), Some(&TaskState::Succeeded));
}
