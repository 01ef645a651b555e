use serde::{Deserialize, Serialize};

/// Status of a workflow run.
///
/// Transitions only move forward:
/// `Created -> Running -> {Suspended <-> Running} -> Completed | Failed | Cancelled`.
/// Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Created,
  Running,
  /// Waiting on a human task, external callback, or timer.
  Suspended,
  Completed,
  Failed,
  Cancelled,
}

impl RunStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
  }

  /// Whether the state machine permits moving from `self` to `to`.
  pub fn can_transition_to(self, to: RunStatus) -> bool {
    use RunStatus::*;
    match (self, to) {
      (Created, Running) => true,
      (Created, Cancelled) => true,
      (Running, Suspended) => true,
      (Running, Completed | Failed | Cancelled) => true,
      (Suspended, Running) => true,
      (Suspended, Failed | Cancelled) => true,
      _ => false,
    }
  }
}
