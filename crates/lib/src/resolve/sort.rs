use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

/// Order services so that every service comes after its dependencies.
///
/// Uses Kahn's algorithm. Edges to services not present in `dependencies` are
/// ignored. Among services that are ready at the same time, the
/// lexicographically smallest name goes first.
///
/// On a cycle, returns the services that could not be ordered.
pub fn topological_sort(dependencies: &BTreeMap<String, Vec<String>>) -> Result<Vec<String>, Vec<String>> {
  let mut graph: DiGraph<&str, ()> = DiGraph::new();
  let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

  for name in dependencies.keys() {
    nodes.insert(name.as_str(), graph.add_node(name.as_str()));
  }

  for (name, deps) in dependencies {
    let dependent = nodes[name.as_str()];
    for dep in deps {
      if let Some(&dependency) = nodes.get(dep.as_str()) {
        graph.update_edge(dependency, dependent, ());
      }
    }
  }

  let mut in_degree: HashMap<NodeIndex, usize> = graph
    .node_indices()
    .map(|idx| (idx, graph.neighbors_directed(idx, Direction::Incoming).count()))
    .collect();

  let mut ready: BTreeSet<&str> = graph
    .node_indices()
    .filter(|idx| in_degree[idx] == 0)
    .map(|idx| graph[idx])
    .collect();

  let mut order = Vec::with_capacity(dependencies.len());
  while let Some(name) = ready.pop_first() {
    order.push(name.to_string());
    let idx = nodes[name];
    for dependent in graph.neighbors_directed(idx, Direction::Outgoing) {
      if let Some(degree) = in_degree.get_mut(&dependent) {
        *degree = degree.saturating_sub(1);
        if *degree == 0 {
          ready.insert(graph[dependent]);
        }
      }
    }
  }

  if order.len() < dependencies.len() {
    let stuck = dependencies
      .keys()
      .filter(|name| in_degree[&nodes[name.as_str()]] > 0)
      .cloned()
      .collect();
    return Err(stuck);
  }

  Ok(order)
}
