use std::collections::BTreeSet;

use actiongraph::dag::{TaskGraph, TaskRequest};
use actiongraph::engine::{
    ExecuteOptions, ExecutionContext, FileResultStore, RESULTS_FILE_PATH, ResultStore, execute,
};
use actiongraph_test_utils::builders::api_project;
use actiongraph_test_utils::{RecordingHandler, aref, with_timeout};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn file_context(root: &std::path::Path) -> ExecutionContext {
    ExecutionContext::new(Box::new(FileResultStore::open(root).unwrap()))
}

#[tokio::test]
async fn results_survive_reopening_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let set = api_project().actions();
    let handler = RecordingHandler::new();
    handler.outputs("deploy:api", json!({ "endpoint": "http://api:8080" }));
    let requests = [TaskRequest::new(aref("test:api"))];

    let ctx = file_context(dir.path());
    let graph = TaskGraph::plan(&set, &handler.registry(), &requests).unwrap();
    let first = with_timeout(execute(
        graph,
        &ctx,
        ExecuteOptions::default(),
        CancellationToken::new(),
    ))
    .await;
    assert_eq!(first.succeeded, 4);
    assert!(dir.path().join(RESULTS_FILE_PATH).is_file());
    drop(ctx);

    // A fresh process: new context, same directory.
    let ctx = file_context(dir.path());
    assert_eq!(ctx.cache().len(), 4);
    let graph = TaskGraph::plan(&set, &handler.registry(), &requests).unwrap();
    let second = with_timeout(execute(
        graph,
        &ctx,
        ExecuteOptions::default(),
        CancellationToken::new(),
    ))
    .await;

    assert_eq!(second.cached, 4);
    assert_eq!(handler.invocations().len(), 4);
    let deploy = actiongraph::dag::TaskKey::natural(aref("deploy:api"));
    assert_eq!(
        second.outputs_of(&deploy).unwrap()["endpoint"],
        json!("http://api:8080")
    );
}

#[test]
fn prune_drops_removed_actions_and_rewrites_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = file_context(dir.path());
    let versions = actiongraph::version::VersionCalculator::new()
        .resolve_all(&api_project().actions())
        .unwrap();
    for (action, version) in &versions {
        let key = actiongraph::engine::CacheKey::new(
            action.clone(),
            action.kind.natural_intent(),
            version,
        );
        ctx.cache()
            .put(&key, actiongraph::engine::CachedResult::now(None))
            .unwrap();
    }
    assert_eq!(ctx.cache().len(), 4);

    let active: BTreeSet<_> = [aref("build:base"), aref("build:api")].into_iter().collect();
    assert_eq!(ctx.cache().prune(&active).unwrap(), 2);
    assert_eq!(ctx.cache().prune(&active).unwrap(), 0);

    let reopened = FileResultStore::open(dir.path()).unwrap();
    assert_eq!(reopened.path(), dir.path().join(RESULTS_FILE_PATH));
    assert_eq!(reopened.len(), 2);
}

#[test]
fn empty_or_missing_file_is_an_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(FileResultStore::open(dir.path()).unwrap().len(), 0);

    let path = dir.path().join(RESULTS_FILE_PATH);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "  \n").unwrap();
    assert_eq!(FileResultStore::open(dir.path()).unwrap().len(), 0);

    std::fs::write(&path, "{ not json").unwrap();
    assert!(FileResultStore::open(dir.path()).is_err());
}

#[tokio::test]
async fn recorded_results_reach_the_file_and_delete_clears_the_deploy() {
    use actiongraph::action::Intent;
    use actiongraph::engine::{CacheKey, CachedResult};

    let dir = tempfile::tempdir().unwrap();
    let ctx = file_context(dir.path());
    let version = actiongraph::version::VersionCalculator::new()
        .version_of(&api_project().actions(), &aref("deploy:api"))
        .unwrap();
    let deploy = CacheKey::new(aref("deploy:api"), Intent::Deploy, &version);
    let delete = CacheKey::new(aref("deploy:api"), Intent::Delete, &version);

    ctx.record(&deploy, CachedResult::now(None)).await.unwrap();
    assert!(FileResultStore::open(dir.path()).unwrap().load(&deploy).unwrap().is_some());

    ctx.record(&delete, CachedResult::now(None)).await.unwrap();
    let reopened = FileResultStore::open(dir.path()).unwrap();
    assert_eq!(reopened.len(), 0);
    assert!(ctx.cache().get(&delete).is_none());
}
