use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::event::{ExecutionEvent, ExecutionEventType};
use crate::history::{ExecutionHistory, HistoryError};

/// In-memory execution history.
///
/// One mutex guards both the event log and the dedup ledger so the
/// check-and-append in `record_node_result` is atomic.
#[derive(Default)]
pub struct InMemoryExecutionHistory {
  inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
  events: HashMap<String, Vec<ExecutionEvent>>,
  processed: HashSet<(String, String, u32)>,
}

impl InMemoryExecutionHistory {
  pub fn new() -> Self {
    Self::default()
  }
}

impl Inner {
  fn push(
    &mut self,
    run_id: &str,
    event_type: ExecutionEventType,
    message: &str,
    metadata: HashMap<String, serde_json::Value>,
  ) -> ExecutionEvent {
    let events = self.events.entry(run_id.to_string()).or_default();
    let event = ExecutionEvent {
      event_id: uuid::Uuid::new_v4().to_string(),
      run_id: run_id.to_string(),
      event_type,
      sequence: events.len() as u64 + 1,
      timestamp: Utc::now(),
      message: message.to_string(),
      metadata,
    };
    events.push(event.clone());
    event
  }
}

#[async_trait]
impl ExecutionHistory for InMemoryExecutionHistory {
  async fn append(
    &self,
    run_id: &str,
    event_type: ExecutionEventType,
    message: &str,
    metadata: HashMap<String, serde_json::Value>,
  ) -> Result<ExecutionEvent, HistoryError> {
    let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    Ok(inner.push(run_id, event_type, message, metadata))
  }

  async fn record_node_result(
    &self,
    run_id: &str,
    node_id: &str,
    attempt: u32,
    event_type: ExecutionEventType,
    message: &str,
    metadata: HashMap<String, serde_json::Value>,
  ) -> Result<bool, HistoryError> {
    let key = (run_id.to_string(), node_id.to_string(), attempt);
    let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    if !inner.processed.insert(key) {
      return Ok(false);
    }
    inner.push(run_id, event_type, message, metadata);
    Ok(true)
  }

  async fn is_node_result_processed(
    &self,
    run_id: &str,
    node_id: &str,
    attempt: u32,
  ) -> Result<bool, HistoryError> {
    let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    Ok(
      inner
        .processed
        .contains(&(run_id.to_string(), node_id.to_string(), attempt)),
    )
  }

  async fn load(&self, run_id: &str) -> Result<Vec<ExecutionEvent>, HistoryError> {
    let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    Ok(inner.events.get(run_id).cloned().unwrap_or_default())
  }
}
