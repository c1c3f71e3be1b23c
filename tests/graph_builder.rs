use actiongraph::action::{ActionKind, DependencyMode, Intent};
use actiongraph::dag::{ActionGraph, TaskGraph, TaskKey, TaskRequest, find_cycle};
use actiongraph::errors::{ActionGraphError, ConfigError};
use actiongraph::exec::HandlerRegistry;
use actiongraph_test_utils::builders::api_project;
use actiongraph_test_utils::{ActionBuilder, ProjectBuilder, RecordingHandler, aref};

fn key(s: &str) -> TaskKey {
    TaskKey::natural(aref(s))
}

#[test]
fn unknown_dependency_is_rejected() {
    let set = ProjectBuilder::new()
        .with(ActionBuilder::deploy("api").dep("build:missing"))
        .actions();

    let err = ActionGraph::build(&set).unwrap_err();
    assert!(matches!(
        err,
        ActionGraphError::Configuration(ConfigError::UnknownDependency { .. })
    ));
}

#[test]
fn build_cycle_names_every_member() {
    let set = ProjectBuilder::new()
        .with(ActionBuilder::build_action("a").dep("build:b"))
        .with(ActionBuilder::build_action("b").dep("build:c"))
        .with(ActionBuilder::build_action("c").dep("build:a"))
        .actions();

    match ActionGraph::build(&set).unwrap_err() {
        ActionGraphError::Configuration(ConfigError::Cycle { cycle }) => {
            assert_eq!(cycle.first(), cycle.last());
            for name in ["build:a", "build:b", "build:c"] {
                assert!(cycle.contains(&aref(name)), "{name} missing from {cycle:?}");
            }
        }
        other => panic!("expected cycle, got {other:?}"),
    }
}

#[test]
fn runtime_cycle_is_also_rejected() {
    let set = ProjectBuilder::new()
        .with(ActionBuilder::deploy("a").dep_with("deploy:b", DependencyMode::Runtime, false))
        .with(ActionBuilder::deploy("b").dep_with("deploy:a", DependencyMode::Runtime, false))
        .actions();

    assert!(matches!(
        ActionGraph::build(&set),
        Err(ActionGraphError::Configuration(ConfigError::Cycle { .. }))
    ));
}

#[test]
fn topological_order_puts_dependencies_first() {
    let (_, graph) = api_project().build();
    let order: Vec<String> = graph
        .topological_order()
        .iter()
        .map(|r| r.to_string())
        .collect();

    let pos = |s: &str| order.iter().position(|o| o == s).unwrap();
    assert!(pos("build:base") < pos("build:api"));
    assert!(pos("build:api") < pos("deploy:api"));
    assert!(pos("deploy:api") < pos("test:api"));
}

#[test]
fn find_cycle_on_plain_adjacency() {
    let mut edges = std::collections::BTreeMap::new();
    edges.insert(1, vec![2]);
    edges.insert(2, vec![3]);
    edges.insert(3, vec![]);
    assert_eq!(find_cycle(&edges), None);

    edges.insert(3, vec![1]);
    let cycle = find_cycle(&edges).unwrap();
    assert_eq!(cycle.len(), 4);
}

#[test]
fn requesting_a_test_pulls_in_the_whole_chain() {
    let handler = RecordingHandler::new();
    let set = api_project().actions();

    let tasks = TaskGraph::plan(
        &set,
        &handler.registry(),
        &[TaskRequest::new(aref("test:api"))],
    )
    .unwrap();

    assert_eq!(tasks.len(), 4);
    assert_eq!(tasks.get(&key("deploy:api")).unwrap().deps, vec![key("build:api")]);
    assert_eq!(tasks.get(&key("test:api")).unwrap().deps, vec![key("deploy:api")]);
    assert!(tasks.get(&key("test:api")).unwrap().requested);
    assert!(!tasks.get(&key("build:api")).unwrap().requested);
    assert_eq!(tasks.order().first(), Some(&key("build:base")));
}

#[test]
fn shared_dependencies_become_one_task() {
    let handler = RecordingHandler::new();
    let set = ProjectBuilder::new()
        .with(ActionBuilder::build_action("base"))
        .with(ActionBuilder::deploy("api").dep("build:base"))
        .with(ActionBuilder::deploy("web").dep("build:base"))
        .actions();

    let tasks = TaskGraph::plan(
        &set,
        &handler.registry(),
        &[
            TaskRequest::new(aref("deploy:api")),
            TaskRequest::new(aref("deploy:web")),
        ],
    )
    .unwrap();

    assert_eq!(tasks.len(), 3);
    let mut dependents = tasks.dependents_of(&key("build:base")).to_vec();
    dependents.sort();
    assert_eq!(dependents, vec![key("deploy:api"), key("deploy:web")]);
}

#[test]
fn force_applies_to_requested_tasks_only() {
    let handler = RecordingHandler::new();
    let set = api_project().actions();

    let tasks = TaskGraph::plan(
        &set,
        &handler.registry(),
        &[TaskRequest::new(aref("deploy:api")).forced(true)],
    )
    .unwrap();

    assert!(tasks.get(&key("deploy:api")).unwrap().force);
    assert!(!tasks.get(&key("build:api")).unwrap().force);
}

#[test]
fn delete_tears_down_runtime_dependents_first() {
    let handler = RecordingHandler::new();
    let set = ProjectBuilder::new()
        .with(ActionBuilder::deploy("db"))
        .with(ActionBuilder::deploy("api").dep("deploy:db"))
        .with(ActionBuilder::test("api").dep("deploy:api"))
        .actions();

    let tasks = TaskGraph::plan(&set, &handler.registry(), &[TaskRequest::delete("db")]).unwrap();

    let delete_db = TaskKey::new(aref("deploy:db"), Intent::Delete);
    let delete_api = TaskKey::new(aref("deploy:api"), Intent::Delete);
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks.get(&delete_db).unwrap().deps, vec![delete_api.clone()]);
    assert_eq!(tasks.order(), &[delete_api, delete_db]);
}

#[test]
fn missing_handler_fails_before_anything_runs() {
    let set = ProjectBuilder::new()
        .with(ActionBuilder::build_action("api").action_type("container"))
        .actions();

    let err = TaskGraph::plan(
        &set,
        &HandlerRegistry::new(),
        &[TaskRequest::new(aref("build:api"))],
    )
    .unwrap_err();

    match err {
        ActionGraphError::Configuration(ConfigError::MissingHandler {
            kind, action_type, ..
        }) => {
            assert_eq!(kind, ActionKind::Build);
            assert_eq!(action_type, "container");
        }
        other => panic!("expected missing handler, got {other:?}"),
    }
}

#[test]
fn invalid_requests_are_configuration_errors() {
    let handler = RecordingHandler::new();
    let set = api_project().actions();

    let unknown = TaskGraph::plan(
        &set,
        &handler.registry(),
        &[TaskRequest::new(aref("deploy:web"))],
    );
    assert!(matches!(
        unknown,
        Err(ActionGraphError::Configuration(ConfigError::UnknownAction(_)))
    ));

    let delete_build = TaskRequest {
        action: aref("build:api"),
        intent: Intent::Delete,
        force: false,
    };
    let unsupported = TaskGraph::plan(&set, &handler.registry(), &[delete_build]);
    assert!(matches!(
        unsupported,
        Err(ActionGraphError::Configuration(ConfigError::UnsupportedIntent { .. }))
    ));
}

#[test]
fn disabled_actions_are_not_expanded() {
    let handler = RecordingHandler::new();
    let set = ProjectBuilder::new()
        .with(ActionBuilder::build_action("base"))
        .with(ActionBuilder::build_action("api").dep("build:base").disabled())
        .with(ActionBuilder::deploy("api").dep("build:api"))
        .actions();

    let tasks = TaskGraph::plan(
        &set,
        &handler.registry(),
        &[TaskRequest::new(aref("deploy:api"))],
    )
    .unwrap();

    assert!(tasks.get(&key("build:api")).unwrap().is_disabled());
    assert!(!tasks.contains(&key("build:base")));
}

#[test]
fn request_parsing() {
    let r: TaskRequest = "deploy:api".parse().unwrap();
    assert_eq!(r.intent, Intent::Deploy);
    let d: TaskRequest = "delete:api".parse().unwrap();
    assert_eq!(d.key(), TaskKey::new(aref("deploy:api"), Intent::Delete));
    assert_eq!(d.to_string(), "delete:api");
    assert!("delete:".parse::<TaskRequest>().is_err());
}
