use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::token::ExecutionToken;

/// One unit of work sent to an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchTask {
  pub run_id: String,
  pub node_id: String,
  /// 1-based dispatch attempt.
  pub attempt: u32,
  /// Freshly minted for this attempt; never reused across attempts.
  pub token: ExecutionToken,
  /// Node configuration merged with the relevant run variables.
  pub context: HashMap<String, serde_json::Value>,
  /// `"{run_id}:{node_id}:{attempt}"`, the dedup key for result application.
  pub idempotency_key: String,
  /// HMAC-SHA256 over the idempotency key and token (see `TaskSigner`).
  pub signature: String,
  /// True when this task undoes a previously completed node.
  #[serde(default)]
  pub compensation: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
}

impl DispatchTask {
  /// The dedup key format shared by dispatch and result application.
  pub fn idempotency_key_for(run_id: &str, node_id: &str, attempt: u32) -> String {
    format!("{run_id}:{node_id}:{attempt}")
  }
}
