// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::action::{ActionRef, ActionSet, Dependency, DependencyMode};
use crate::errors::{ConfigError, Result};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct DagNode {
    /// Direct dependencies, in declaration order.
    deps: Vec<Dependency>,
    /// Direct dependents: actions that depend on this one.
    dependents: Vec<ActionRef>,
}

/// Directed graph over the actions of a project.
///
/// Construction validates that every reference exists and that the graph is
/// acyclic, so everything downstream can rely on a topological order.
#[derive(Debug, Clone)]
pub struct ActionGraph {
    nodes: BTreeMap<ActionRef, DagNode>,
    order: Vec<ActionRef>,
}

impl ActionGraph {
    /// Build the graph for `actions`.
    ///
    /// Fails with [`ConfigError::UnknownDependency`] for dangling references
    /// and [`ConfigError::Cycle`] (naming the whole cycle) when the
    /// dependency relation is not a DAG. Build-time edges are checked first
    /// so that a build cycle is reported as such even when run-time edges
    /// would also close a loop.
    pub fn build(actions: &ActionSet) -> Result<Self> {
        let mut nodes: BTreeMap<ActionRef, DagNode> = BTreeMap::new();

        for action in actions.iter() {
            for dep in &action.dependencies {
                if !actions.contains(&dep.target) {
                    return Err(ConfigError::UnknownDependency {
                        action: action.reference.clone(),
                        reference: dep.target.clone(),
                    }
                    .into());
                }
            }
            nodes.insert(
                action.reference.clone(),
                DagNode {
                    deps: action.dependencies.clone(),
                    dependents: Vec::new(),
                },
            );
        }

        // Second pass: populate dependents based on deps.
        let names: Vec<ActionRef> = nodes.keys().cloned().collect();
        for name in names {
            let deps = nodes
                .get(&name)
                .map(|n| n.deps.clone())
                .unwrap_or_default();
            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(&dep.target) {
                    if !dep_node.dependents.contains(&name) {
                        dep_node.dependents.push(name.clone());
                    }
                }
            }
        }

        let build_edges = adjacency(&nodes, |d| d.mode == DependencyMode::Build);
        if let Some(cycle) = find_cycle(&build_edges) {
            return Err(ConfigError::Cycle { cycle }.into());
        }

        let all_edges = adjacency(&nodes, |_| true);
        let order = topo_sort(&all_edges).map_err(|cycle| ConfigError::Cycle { cycle })?;

        debug!(actions = order.len(), "built action graph");

        Ok(Self { nodes, order })
    }

    /// All action references, in topological order (dependencies first).
    pub fn topological_order(&self) -> &[ActionRef] {
        &self.order
    }

    pub fn contains(&self, reference: &ActionRef) -> bool {
        self.nodes.contains_key(reference)
    }

    /// Immediate dependencies of an action.
    pub fn dependencies_of(&self, reference: &ActionRef) -> &[Dependency] {
        self.nodes
            .get(reference)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of an action.
    pub fn dependents_of(&self, reference: &ActionRef) -> &[ActionRef] {
        self.nodes
            .get(reference)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// `roots` plus everything that depends on them, directly or not.
    pub fn transitive_dependents<'a, I>(&self, roots: I) -> BTreeSet<ActionRef>
    where
        I: IntoIterator<Item = &'a ActionRef>,
    {
        let mut out = BTreeSet::new();
        let mut stack: Vec<ActionRef> = roots.into_iter().cloned().collect();

        while let Some(current) = stack.pop() {
            if !out.insert(current.clone()) {
                continue;
            }
            stack.extend(self.dependents_of(&current).iter().cloned());
        }

        out
    }

    /// Whether `ancestor` is reachable from `reference` by following
    /// dependency edges.
    pub fn depends_transitively_on(&self, reference: &ActionRef, ancestor: &ActionRef) -> bool {
        let mut stack: Vec<&ActionRef> = self
            .dependencies_of(reference)
            .iter()
            .map(|d| &d.target)
            .collect();
        let mut visited: BTreeSet<&ActionRef> = BTreeSet::new();

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if current == ancestor {
                return true;
            }
            stack.extend(self.dependencies_of(current).iter().map(|d| &d.target));
        }

        false
    }
}

fn adjacency<F>(nodes: &BTreeMap<ActionRef, DagNode>, keep: F) -> BTreeMap<ActionRef, Vec<ActionRef>>
where
    F: Fn(&Dependency) -> bool,
{
    nodes
        .iter()
        .map(|(name, node)| {
            let targets = node
                .deps
                .iter()
                .filter(|d| keep(d))
                .map(|d| d.target.clone())
                .collect();
            (name.clone(), targets)
        })
        .collect()
}

/// Topologically sort `edges` (node -> the nodes it depends on), leaves
/// first.
///
/// When the graph is not a DAG the error holds one full cycle.
pub fn topo_sort<N>(edges: &BTreeMap<N, Vec<N>>) -> std::result::Result<Vec<N>, Vec<N>>
where
    N: Ord + Clone + Hash,
{
    // Edge direction: dep -> dependent, so toposort yields dependencies first.
    let mut graph: DiGraph<N, ()> = DiGraph::new();
    let mut index: HashMap<&N, NodeIndex> = HashMap::new();

    for name in edges.keys() {
        index.insert(name, graph.add_node(name.clone()));
    }
    for (name, deps) in edges {
        for dep in deps {
            if let (Some(&from), Some(&to)) = (index.get(dep), index.get(name)) {
                graph.add_edge(from, to, ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(|ix| graph[ix].clone()).collect()),
        Err(_) => Err(find_cycle(edges).unwrap_or_default()),
    }
}

/// Find one cycle in `edges` (node -> the nodes it depends on).
///
/// The result starts and ends with the same node, e.g. `[A, B, A]` for
/// `A -> B -> A`. Traversal order is deterministic (sorted keys).
pub fn find_cycle<N>(edges: &BTreeMap<N, Vec<N>>) -> Option<Vec<N>>
where
    N: Ord + Clone,
{
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Visiting,
        Done,
    }

    let mut marks: BTreeMap<&N, Mark> = BTreeMap::new();

    for start in edges.keys() {
        if marks.contains_key(start) {
            continue;
        }

        // Explicit DFS stack of (node, next edge index); `path` mirrors the
        // nodes currently marked Visiting.
        let mut stack: Vec<(&N, usize)> = vec![(start, 0)];
        let mut path: Vec<&N> = vec![start];
        marks.insert(start, Mark::Visiting);

        while let Some((node, next)) = stack.last().copied() {
            let deps = edges.get(node).map(|d| d.as_slice()).unwrap_or(&[]);
            if next < deps.len() {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                let dep = &deps[next];
                match marks.get(dep) {
                    Some(Mark::Visiting) => {
                        let pos = path.iter().position(|n| *n == dep).unwrap_or(0);
                        let mut cycle: Vec<N> = path[pos..].iter().map(|n| (*n).clone()).collect();
                        cycle.push(dep.clone());
                        return Some(cycle);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        if edges.contains_key(dep) {
                            marks.insert(dep, Mark::Visiting);
                            stack.push((dep, 0));
                            path.push(dep);
                        }
                    }
                }
            } else {
                marks.insert(node, Mark::Done);
                stack.pop();
                path.pop();
            }
        }
    }

    None
}
