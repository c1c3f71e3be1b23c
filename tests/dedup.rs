use std::time::Duration;

use actiongraph::action::ActionSet;
use actiongraph::dag::{TaskGraph, TaskKey, TaskRequest, TaskState};
use actiongraph::engine::{ExecuteOptions, ExecutionContext, ExecutionReport, execute};
use actiongraph_test_utils::{
    ActionBuilder, ProjectBuilder, RecordingHandler, aref, init_tracing, with_timeout,
};
use tokio_util::sync::CancellationToken;

fn project() -> ActionSet {
    ProjectBuilder::new()
        .with(ActionBuilder::build_action("api"))
        .with(ActionBuilder::deploy("api").dep("build:api"))
        .actions()
}

async fn run(
    set: &ActionSet,
    handler: &RecordingHandler,
    ctx: &ExecutionContext,
    cancel: CancellationToken,
) -> ExecutionReport {
    let graph = TaskGraph::plan(
        set,
        &handler.registry(),
        &[TaskRequest::new(aref("deploy:api"))],
    )
    .unwrap();
    execute(graph, ctx, ExecuteOptions::default(), cancel).await
}

#[tokio::test]
async fn identical_tasks_in_concurrent_runs_execute_once() {
    init_tracing();
    let set = project();
    let handler = RecordingHandler::new();
    handler.default_delay(Duration::from_millis(40));
    let ctx = ExecutionContext::in_memory();

    let (first, second) = with_timeout(async {
        tokio::join!(
            run(&set, &handler, &ctx, CancellationToken::new()),
            run(&set, &handler, &ctx, CancellationToken::new()),
        )
    })
    .await;

    assert!(first.is_success(), "{first}");
    assert!(second.is_success(), "{second}");
    assert_eq!(handler.calls_for("build:api"), 1);
    assert_eq!(handler.calls_for("deploy:api"), 1);
    assert_eq!(first.succeeded + second.succeeded, 2);
    assert_eq!(first.cached + second.cached, 2);
    assert_eq!(ctx.in_flight(), 0);
}

#[tokio::test]
async fn leader_failure_is_shared_with_followers() {
    let set = project();
    let handler = RecordingHandler::new();
    handler
        .delay("build:api", Duration::from_millis(40))
        .fail("build:api", "out of disk");
    let ctx = ExecutionContext::in_memory();

    let (first, second) = with_timeout(async {
        tokio::join!(
            run(&set, &handler, &ctx, CancellationToken::new()),
            run(&set, &handler, &ctx, CancellationToken::new()),
        )
    })
    .await;

    assert_eq!(handler.calls_for("build:api"), 1);
    for report in [&first, &second] {
        assert_eq!(report.failed, 1);
        assert!(report.failures[0].message.contains("out of disk"));
    }
    assert!(ctx.cache().is_empty());
}

#[tokio::test]
async fn follower_takes_over_when_leader_is_cancelled() {
    let set = project();
    let handler = RecordingHandler::new();
    handler.delay("build:api", Duration::from_millis(60));
    let ctx = ExecutionContext::in_memory();

    let leader_cancel = CancellationToken::new();
    let (leader, follower) = with_timeout(async {
        tokio::join!(
            async {
                let cancel = leader_cancel.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    cancel.cancel();
                });
                run(&set, &handler, &ctx, leader_cancel.clone()).await
            },
            async {
                // Let the first run claim the build.
                tokio::time::sleep(Duration::from_millis(5)).await;
                run(&set, &handler, &ctx, CancellationToken::new()).await
            },
        )
    })
    .await;

    let build = TaskKey::natural(aref("build:api"));
    assert_eq!(leader.state_of(&build), Some(&TaskState::Cancelled));
    assert!(follower.is_success(), "{follower}");
    assert_eq!(follower.state_of(&build), Some(&TaskState::Succeeded));
    assert_eq!(handler.calls_for("build:api"), 2);
}
