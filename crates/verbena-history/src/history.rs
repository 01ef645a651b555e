use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::event::{ExecutionEvent, ExecutionEventType};

/// Error type for history operations.
#[derive(Debug, Error)]
pub enum HistoryError {
  #[error("history backend error: {message}")]
  Backend { message: String },
}

/// Append-only execution history plus the idempotency ledger.
#[async_trait]
pub trait ExecutionHistory: Send + Sync {
  /// Append an event to a run's history.
  async fn append(
    &self,
    run_id: &str,
    event_type: ExecutionEventType,
    message: &str,
    metadata: HashMap<String, serde_json::Value>,
  ) -> Result<ExecutionEvent, HistoryError>;

  /// Atomically check the `(run_id, node_id, attempt)` ledger and append.
  ///
  /// Returns `false` without appending when the result was already recorded;
  /// duplicate delivery is not an error.
  async fn record_node_result(
    &self,
    run_id: &str,
    node_id: &str,
    attempt: u32,
    event_type: ExecutionEventType,
    message: &str,
    metadata: HashMap<String, serde_json::Value>,
  ) -> Result<bool, HistoryError>;

  /// Whether a node result has already been applied.
  async fn is_node_result_processed(
    &self,
    run_id: &str,
    node_id: &str,
    attempt: u32,
  ) -> Result<bool, HistoryError>;

  /// Load a run's events ordered by sequence.
  async fn load(&self, run_id: &str) -> Result<Vec<ExecutionEvent>, HistoryError>;
}
