use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport an executor is reachable over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationType {
  Grpc,
  Kafka,
  Rest,
  InProcess,
}

/// A known executor: an external worker that performs node work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorInfo {
  pub executor_id: String,
  /// Which class of nodes this executor can run (matched against
  /// `NodeDefinition::executor_type`).
  pub executor_type: String,
  pub communication_type: CommunicationType,
  pub endpoint: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  #[serde(default)]
  pub metadata: HashMap<String, String>,
}

/// Health bookkeeping for one executor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutorHealthInfo {
  pub last_heartbeat: DateTime<Utc>,
}
