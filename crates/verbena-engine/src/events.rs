//! Run-level events and notifiers for observability.
//!
//! Events are emitted as runs progress so consumers can observe them
//! (persist, stream to UIs, feed dashboards). They are strictly
//! observational: the drive loop is triggered by internal signals, not by
//! these events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted as a run progresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
  RunCreated {
    run_id: String,
    definition_id: String,
  },

  RunStarted {
    run_id: String,
  },

  RunSuspended {
    run_id: String,
    reason: String,
  },

  RunResumed {
    run_id: String,
  },

  RunCompleted {
    run_id: String,
  },

  RunFailed {
    run_id: String,
    reason: String,
  },

  RunCancelled {
    run_id: String,
    reason: String,
  },

  NodeDispatched {
    run_id: String,
    node_id: String,
    attempt: u32,
    executor_id: String,
  },

  NodeCompleted {
    run_id: String,
    node_id: String,
  },

  NodeFailed {
    run_id: String,
    node_id: String,
    error: String,
  },

  NodeRetryScheduled {
    run_id: String,
    node_id: String,
    retry_at: DateTime<Utc>,
  },

  CompensationStarted {
    run_id: String,
  },

  CompensationCompleted {
    run_id: String,
    failures: usize,
  },
}

/// Trait for receiving run events.
///
/// The engine calls `notify` for each event; implementations decide what to
/// do with them (persist, broadcast, log, ignore).
pub trait RunNotifier: Send + Sync {
  fn notify(&self, event: RunEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl RunNotifier for NoopNotifier {
  fn notify(&self, _event: RunEvent) {
    // Intentionally empty
  }
}

/// A notifier that sends events to an unbounded channel.
///
/// Unbounded so a slow consumer never blocks the engine; event volume is one
/// per run/node state change, so growth is bounded in practice.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<RunEvent>) -> Self {
    Self { sender }
  }
}

impl RunNotifier for ChannelNotifier {
  fn notify(&self, event: RunEvent) {
    // Ignore send errors: the receiver may have been dropped.
    let _ = self.sender.send(event);
  }
}
