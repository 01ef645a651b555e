use std::collections::HashMap;

use crate::node::NodeDefinition;

/// Dependency graph structure for traversal and analysis.
///
/// Edges point from a dependency to its dependents: `depends_on: [a]` on node
/// `b` yields the edge `a -> b`.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
  /// node_id -> nodes that depend on it.
  dependents: HashMap<String, Vec<String>>,
  /// node_id -> its dependencies.
  dependencies: HashMap<String, Vec<String>>,
  /// Nodes with no dependencies.
  start_nodes: Vec<String>,
}

impl DependencyGraph {
  /// Build a graph from node definitions.
  pub fn new(nodes: &[NodeDefinition]) -> Self {
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();

    for node in nodes {
      dependents.entry(node.node_id.clone()).or_default();
      dependencies
        .entry(node.node_id.clone())
        .or_default()
        .extend(node.depends_on.iter().cloned());
      for dep in &node.depends_on {
        dependents
          .entry(dep.clone())
          .or_default()
          .push(node.node_id.clone());
      }
    }

    let start_nodes: Vec<String> = nodes
      .iter()
      .filter(|n| n.depends_on.is_empty())
      .map(|n| n.node_id.clone())
      .collect();

    Self {
      dependents,
      dependencies,
      start_nodes,
    }
  }

  /// Nodes with no dependencies.
  pub fn start_nodes(&self) -> &[String] {
    &self.start_nodes
  }

  /// Nodes that depend on the given node.
  pub fn dependents(&self, node_id: &str) -> &[String] {
    self
      .dependents
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Dependencies of the given node.
  pub fn dependencies(&self, node_id: &str) -> &[String] {
    self
      .dependencies
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }
}
