use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::policy::RetryPolicy;

/// A unit of work within a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
  /// Unique within the definition.
  pub node_id: String,
  pub name: String,
  /// Free-form node kind tag (e.g. "task", "human_task", "timer").
  pub node_type: String,
  /// Which class of executor may run this node.
  pub executor_type: String,
  /// Free-form node configuration, merged into the dispatch context.
  #[serde(default)]
  pub config: HashMap<String, serde_json::Value>,
  /// Node ids that must complete before this node becomes ready.
  #[serde(default)]
  pub depends_on: Vec<String>,
  /// Outgoing transitions to downstream nodes.
  #[serde(default)]
  pub transitions: Vec<Transition>,
  /// Per-node override of the definition-level retry policy.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub retry_policy: Option<RetryPolicy>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  /// Failure of a critical node fails the run; non-critical failures may be
  /// tolerated and routed around via error transitions.
  #[serde(default)]
  pub critical: bool,
}

/// An outgoing edge from one node to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
  /// Target node id.
  pub target: String,
  #[serde(default)]
  pub kind: TransitionKind,
  /// Boolean expression over run variables, required for `Conditional`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub condition: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
  /// Taken whenever the source node completes.
  #[default]
  Unconditional,
  /// Taken when the source node completes and the condition evaluates true.
  Conditional,
  /// Taken only when the source node fails.
  OnError,
}

impl Transition {
  /// An unconditional transition to `target`.
  pub fn to(target: impl Into<String>) -> Self {
    Self {
      target: target.into(),
      kind: TransitionKind::Unconditional,
      condition: None,
    }
  }

  /// A conditional transition guarded by `condition`.
  pub fn when(target: impl Into<String>, condition: impl Into<String>) -> Self {
    Self {
      target: target.into(),
      kind: TransitionKind::Conditional,
      condition: Some(condition.into()),
    }
  }

  /// A transition taken only on source failure.
  pub fn on_error(target: impl Into<String>) -> Self {
    Self {
      target: target.into(),
      kind: TransitionKind::OnError,
      condition: None,
    }
  }
}
