use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of one node's execution within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeExecutionStatus {
  Pending,
  Running,
  /// Failed with a retryable error; a re-dispatch is scheduled.
  WaitingRetry,
  /// Waiting for an external signal.
  Waiting,
  Completed,
  Failed,
}

impl NodeExecutionStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Failed)
  }
}

/// Per-node execution state, keyed by node id on the run aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
  pub node_id: String,
  pub status: NodeExecutionStatus,
  /// 1-based; incremented on each dispatch.
  pub attempt: u32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub output: HashMap<String, serde_json::Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  /// Earliest time the next attempt may be dispatched (set in WaitingRetry).
  #[serde(skip_serializing_if = "Option::is_none")]
  pub retry_at: Option<DateTime<Utc>>,
}

impl NodeExecution {
  pub fn new(node_id: impl Into<String>) -> Self {
    Self {
      node_id: node_id.into(),
      status: NodeExecutionStatus::Pending,
      attempt: 0,
      started_at: None,
      completed_at: None,
      output: HashMap::new(),
      error: None,
      retry_at: None,
    }
  }
}
