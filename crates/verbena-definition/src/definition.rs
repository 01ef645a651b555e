use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::graph::DependencyGraph;
use crate::node::NodeDefinition;
use crate::policy::{CompensationPolicy, RetryPolicy};

/// An immutable, registered workflow definition.
///
/// Definitions are validated once at registration time ([`validate`]) and
/// never mutated afterwards. All run-time state lives on the run aggregate.
///
/// [`validate`]: WorkflowDefinition::validate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
  pub definition_id: String,
  pub tenant: String,
  pub name: String,
  pub version: u32,
  /// Nodes in declaration order.
  pub nodes: Vec<NodeDefinition>,
  #[serde(default)]
  pub inputs: HashMap<String, InputDefinition>,
  #[serde(default)]
  pub outputs: HashMap<String, OutputDefinition>,
  /// Definition-level default, overridable per node.
  #[serde(default)]
  pub retry_policy: RetryPolicy,
  #[serde(default)]
  pub compensation: CompensationPolicy,
}

/// A named run input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDefinition {
  #[serde(default)]
  pub required: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub default: Option<serde_json::Value>,
  #[serde(default)]
  pub description: String,
}

/// A named run output, sourced from a node's output variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDefinition {
  /// Variable name the output is read from; defaults to the output name.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub source: Option<String>,
  #[serde(default)]
  pub description: String,
}

impl WorkflowDefinition {
  /// Look up a node by id.
  pub fn node(&self, node_id: &str) -> Option<&NodeDefinition> {
    self.nodes.iter().find(|n| n.node_id == node_id)
  }

  /// The retry policy effective for a node (node override or definition default).
  pub fn retry_policy_for(&self, node_id: &str) -> &RetryPolicy {
    self
      .node(node_id)
      .and_then(|n| n.retry_policy.as_ref())
      .unwrap_or(&self.retry_policy)
  }

  /// Nodes with no dependencies.
  pub fn start_nodes(&self) -> Vec<&NodeDefinition> {
    self.nodes.iter().filter(|n| n.depends_on.is_empty()).collect()
  }

  /// Build the dependency graph for traversal.
  pub fn graph(&self) -> DependencyGraph {
    DependencyGraph::new(&self.nodes)
  }

  /// Validate the definition.
  ///
  /// Runs at registration time only; this is O(V+E) and must not be called
  /// from the planning hot path.
  pub fn validate(&self) -> Result<(), ValidationError> {
    crate::validate::validate(self)
  }
}
