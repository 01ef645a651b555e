use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use verbena_dispatch::ExecutionToken;

/// A node result reported by an executor.
///
/// The single ingress type mutating run state from execution outcomes.
/// Delivery is at-least-once over any transport; `(run_id, node_id,
/// attempt)` is the dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
  pub run_id: String,
  pub node_id: String,
  pub attempt: u32,
  /// The token the task was dispatched with. Results presented with an
  /// expired or mismatched token are rejected.
  pub token: ExecutionToken,
  /// Reporting executor, used to release selection-strategy load slots.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub executor_id: Option<String>,
  pub outcome: NodeOutcome,
}

/// Business outcome of one node execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeOutcome {
  Completed {
    #[serde(default)]
    output: HashMap<String, serde_json::Value>,
  },
  Failed {
    error_code: String,
    error_message: String,
  },
}

/// What the run manager did with a delivered result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultDisposition {
  /// The result mutated the run. When `compensation_reason` is set, the
  /// caller must run compensation and then fail the run.
  Applied {
    compensation_reason: Option<String>,
  },
  /// Already processed; dropped silently.
  Duplicate,
  /// Rejected without mutating the run (terminal run, bad token).
  Rejected { reason: String },
}
