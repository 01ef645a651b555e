use thiserror::Error;

use crate::status::RunStatus;

#[derive(Debug, Error)]
pub enum RunError {
  #[error("invalid run status transition: {from:?} -> {to:?}")]
  InvalidTransition { from: RunStatus, to: RunStatus },

  #[error("run is already terminal ({status:?}): {reason}")]
  AlreadyTerminal { status: RunStatus, reason: String },

  #[error("node '{node_id}' has no execution state in this run")]
  NodeNotFound { node_id: String },

  #[error("node '{node_id}' is not waiting for a signal")]
  NotWaitingForSignal { node_id: String },

  #[error("required input '{name}' is missing")]
  MissingInput { name: String },
}
