use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event types recorded in a run's history.
///
/// The set is closed: tags that do not map to a known variant parse to
/// [`Unknown`] explicitly rather than being silently coerced.
///
/// [`Unknown`]: ExecutionEventType::Unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionEventType {
  RunCreated,
  RunStarted,
  RunSuspended,
  RunResumed,
  RunCancelled,
  RunCompleted,
  RunFailed,
  NodeDispatched,
  NodeCompleted,
  NodeFailed,
  NodeRetryScheduled,
  SignalReceived,
  CompensationStarted,
  CompensationNodeCompleted,
  CompensationNodeFailed,
  CompensationCompleted,
  /// An event tag this build does not recognize (e.g. written by a newer
  /// version). Preserved rather than dropped.
  Unknown,
}

impl ExecutionEventType {
  /// Parse a stored tag. Unrecognized tags map to `Unknown`.
  pub fn parse(tag: &str) -> Self {
    match tag {
      "run_created" => Self::RunCreated,
      "run_started" => Self::RunStarted,
      "run_suspended" => Self::RunSuspended,
      "run_resumed" => Self::RunResumed,
      "run_cancelled" => Self::RunCancelled,
      "run_completed" => Self::RunCompleted,
      "run_failed" => Self::RunFailed,
      "node_dispatched" => Self::NodeDispatched,
      "node_completed" => Self::NodeCompleted,
      "node_failed" => Self::NodeFailed,
      "node_retry_scheduled" => Self::NodeRetryScheduled,
      "signal_received" => Self::SignalReceived,
      "compensation_started" => Self::CompensationStarted,
      "compensation_node_completed" => Self::CompensationNodeCompleted,
      "compensation_node_failed" => Self::CompensationNodeFailed,
      "compensation_completed" => Self::CompensationCompleted,
      _ => Self::Unknown,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::RunCreated => "run_created",
      Self::RunStarted => "run_started",
      Self::RunSuspended => "run_suspended",
      Self::RunResumed => "run_resumed",
      Self::RunCancelled => "run_cancelled",
      Self::RunCompleted => "run_completed",
      Self::RunFailed => "run_failed",
      Self::NodeDispatched => "node_dispatched",
      Self::NodeCompleted => "node_completed",
      Self::NodeFailed => "node_failed",
      Self::NodeRetryScheduled => "node_retry_scheduled",
      Self::SignalReceived => "signal_received",
      Self::CompensationStarted => "compensation_started",
      Self::CompensationNodeCompleted => "compensation_node_completed",
      Self::CompensationNodeFailed => "compensation_node_failed",
      Self::CompensationCompleted => "compensation_completed",
      Self::Unknown => "unknown",
    }
  }
}

/// One history entry.
///
/// `sequence` is per-run and strictly increasing, assigned by the store at
/// append time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
  pub event_id: String,
  pub run_id: String,
  pub event_type: ExecutionEventType,
  pub sequence: u64,
  pub timestamp: DateTime<Utc>,
  pub message: String,
  #[serde(default)]
  pub metadata: HashMap<String, serde_json::Value>,
}
