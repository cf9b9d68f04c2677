//! Static service catalog and its required-services graph.
//!
//! Edges point from a service to each service it requires. The enable order
//! is a post-order walk along those edges (prerequisites first); the disable
//! order walks them backwards (dependents first).

use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub required_services: Vec<String>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, required: &[&str]) -> Self {
        Self {
            name: name.into(),
            required_services: required.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

/// Services known to this client, in declaration order.
#[must_use]
pub fn default_catalog() -> Vec<ServiceSpec> {
    vec![
        ServiceSpec::new("anbox-cloud", &[]),
        ServiceSpec::new("cc-eal", &[]),
        ServiceSpec::new("usg", &[]),
        ServiceSpec::new("esm-apps", &[]),
        ServiceSpec::new("esm-infra", &[]),
        ServiceSpec::new("fips", &[]),
        ServiceSpec::new("fips-updates", &[]),
        ServiceSpec::new("fips-preview", &[]),
        ServiceSpec::new("landscape", &[]),
        ServiceSpec::new("livepatch", &[]),
        ServiceSpec::new("realtime-kernel", &[]),
        ServiceSpec::new("ros", &["esm-apps", "esm-infra"]),
        ServiceSpec::new("ros-updates", &["esm-apps", "esm-infra", "ros"]),
    ]
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("service `{0}` is declared more than once")]
    Duplicate(String),
    #[error("service `{service}` requires unknown service `{required}`")]
    UnknownService { service: String, required: String },
    #[error("service dependency cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },
}

#[derive(Clone, Debug)]
pub struct ServiceGraph {
    graph: DiGraph<String, ()>,
    nodes: IndexMap<String, NodeIndex>,
    enable_order: Vec<String>,
    disable_order: Vec<String>,
}

impl ServiceGraph {
    pub fn new(specs: &[ServiceSpec]) -> Result<Self, GraphError> {
        let mut graph = DiGraph::new();
        let mut nodes = IndexMap::new();
        for spec in specs {
            if nodes.contains_key(&spec.name) {
                return Err(GraphError::Duplicate(spec.name.clone()));
            }
            let node = graph.add_node(spec.name.clone());
            nodes.insert(spec.name.clone(), node);
        }
        for spec in specs {
            let from = nodes[&spec.name];
            for required in &spec.required_services {
                let Some(&to) = nodes.get(required) else {
                    return Err(GraphError::UnknownService {
                        service: spec.name.clone(),
                        required: required.clone(),
                    });
                };
                graph.add_edge(from, to, ());
            }
        }

        let enable_order = names(&graph, &post_order(&graph, Direction::Outgoing)?);
        let disable_order = names(&graph, &post_order(&graph, Direction::Incoming)?);
        Ok(Self {
            graph,
            nodes,
            enable_order,
            disable_order,
        })
    }

    pub fn with_default_catalog() -> Result<Self, GraphError> {
        Self::new(&default_catalog())
    }

    /// Prerequisites always precede the services that require them.
    #[must_use]
    pub fn enable_order(&self) -> &[String] {
        &self.enable_order
    }

    /// Dependents always precede the services they require.
    #[must_use]
    pub fn disable_order(&self) -> &[String] {
        &self.disable_order
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    #[must_use]
    pub fn required_services(&self, name: &str) -> Vec<&str> {
        self.related(name, Direction::Outgoing)
    }

    #[must_use]
    pub fn dependent_services(&self, name: &str) -> Vec<&str> {
        self.related(name, Direction::Incoming)
    }

    fn related(&self, name: &str, direction: Direction) -> Vec<&str> {
        let Some(&node) = self.nodes.get(name) else {
            return Vec::new();
        };
        let mut related = sorted_neighbors(&self.graph, node, direction);
        related.reverse();
        related
            .into_iter()
            .map(|idx| self.graph[idx].as_str())
            .collect()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Iterative post-order DFS over `direction` edges, roots in declaration order.
fn post_order(
    graph: &DiGraph<String, ()>,
    direction: Direction,
) -> Result<Vec<NodeIndex>, GraphError> {
    let mut marks = vec![Mark::Unvisited; graph.node_count()];
    let mut order = Vec::with_capacity(graph.node_count());

    for root in graph.node_indices() {
        if marks[root.index()] != Mark::Unvisited {
            continue;
        }
        marks[root.index()] = Mark::InProgress;
        let mut stack = vec![(root, sorted_neighbors(graph, root, direction))];

        loop {
            let Some(frame) = stack.last_mut() else {
                break;
            };
            match frame.1.pop() {
                Some(next) => match marks[next.index()] {
                    Mark::Unvisited => {
                        marks[next.index()] = Mark::InProgress;
                        stack.push((next, sorted_neighbors(graph, next, direction)));
                    }
                    Mark::InProgress => {
                        let start = stack
                            .iter()
                            .position(|(node, _)| *node == next)
                            .unwrap_or(0);
                        let mut path: Vec<String> = stack[start..]
                            .iter()
                            .map(|(node, _)| graph[*node].clone())
                            .collect();
                        path.push(graph[next].clone());
                        return Err(GraphError::Cycle { path });
                    }
                    Mark::Done => {}
                },
                None => {
                    let node = frame.0;
                    marks[node.index()] = Mark::Done;
                    order.push(node);
                    stack.pop();
                }
            }
        }
    }
    Ok(order)
}

/// Neighbors in descending index order, so popping yields declaration order.
fn sorted_neighbors(
    graph: &DiGraph<String, ()>,
    node: NodeIndex,
    direction: Direction,
) -> Vec<NodeIndex> {
    let mut neighbors: Vec<NodeIndex> = graph.neighbors_directed(node, direction).collect();
    neighbors.sort_unstable_by(|a, b| b.cmp(a));
    neighbors.dedup();
    neighbors
}

fn names(graph: &DiGraph<String, ()>, order: &[NodeIndex]) -> Vec<String> {
    order.iter().map(|idx| graph[*idx].clone()).collect()
}
