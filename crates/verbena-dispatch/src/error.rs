use thiserror::Error;

use verbena_registry::CommunicationType;

/// Error type for dispatch operations.
///
/// Dispatch errors never mutate run state directly; the orchestrator routes
/// them through the node-failure path, subject to the node's retry policy.
#[derive(Debug, Error)]
pub enum DispatchError {
  #[error("no suitable dispatcher for communication type {communication_type:?}")]
  NoSuitableDispatcher { communication_type: CommunicationType },

  #[error("executor '{executor_id}' unreachable: {message}")]
  Unreachable { executor_id: String, message: String },

  #[error("executor '{executor_id}' rejected task: {message}")]
  Rejected { executor_id: String, message: String },
}

impl DispatchError {
  /// Error code carried into the node-failure path for retry classification.
  pub fn error_code(&self) -> &'static str {
    match self {
      Self::NoSuitableDispatcher { .. } => "NO_SUITABLE_DISPATCHER",
      Self::Unreachable { .. } => "EXECUTOR_UNREACHABLE",
      Self::Rejected { .. } => "EXECUTOR_REJECTED",
    }
  }
}
