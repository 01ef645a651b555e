//! In-process reference transport.
//!
//! Delivers tasks over an mpsc channel to an executor running in the same
//! process. The reference binary and the integration tests use it; real
//! deployments register gRPC/Kafka/REST dispatchers instead.

use async_trait::async_trait;
use tokio::sync::mpsc;
use verbena_registry::{CommunicationType, ExecutorInfo};

use crate::dispatcher::TaskDispatcher;
use crate::error::DispatchError;
use crate::task::DispatchTask;

/// Dispatcher for executors with communication type `InProcess`.
pub struct InProcessDispatcher {
  sender: mpsc::Sender<DispatchTask>,
  priority: i32,
}

impl InProcessDispatcher {
  /// Create a dispatcher delivering into `sender`, and default priority.
  pub fn new(sender: mpsc::Sender<DispatchTask>) -> Self {
    Self::with_priority(sender, 0)
  }

  pub fn with_priority(sender: mpsc::Sender<DispatchTask>, priority: i32) -> Self {
    Self { sender, priority }
  }

  /// Convenience constructor returning the receiving end as well.
  pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<DispatchTask>) {
    let (sender, receiver) = mpsc::channel(buffer);
    (Self::new(sender), receiver)
  }
}

#[async_trait]
impl TaskDispatcher for InProcessDispatcher {
  async fn dispatch(
    &self,
    task: &DispatchTask,
    executor: &ExecutorInfo,
  ) -> Result<(), DispatchError> {
    self
      .sender
      .send(task.clone())
      .await
      .map_err(|_| DispatchError::Unreachable {
        executor_id: executor.executor_id.clone(),
        message: "in-process executor channel closed".to_string(),
      })
  }

  fn supports(&self, executor: &ExecutorInfo) -> bool {
    executor.communication_type == CommunicationType::InProcess
  }

  fn is_healthy(&self) -> bool {
    !self.sender.is_closed()
  }

  fn priority(&self) -> i32 {
    self.priority
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use crate::token::TokenIssuer;

  use super::*;

  fn executor() -> ExecutorInfo {
    ExecutorInfo {
      executor_id: "e1".to_string(),
      executor_type: "generic".to_string(),
      communication_type: CommunicationType::InProcess,
      endpoint: "mem://e1".to_string(),
      timeout_ms: None,
      metadata: HashMap::new(),
    }
  }

  fn task() -> DispatchTask {
    DispatchTask {
      run_id: "run-1".to_string(),
      node_id: "a".to_string(),
      attempt: 1,
      token: TokenIssuer::default().issue("run-1", "a", 1),
      context: HashMap::new(),
      idempotency_key: DispatchTask::idempotency_key_for("run-1", "a", 1),
      signature: String::new(),
      compensation: false,
      timeout_ms: None,
    }
  }

  #[tokio::test]
  async fn delivers_task_to_channel() {
    let (dispatcher, mut receiver) = InProcessDispatcher::channel(4);
    dispatcher.dispatch(&task(), &executor()).await.unwrap();

    let received = receiver.recv().await.unwrap();
    assert_eq!(received.node_id, "a");
  }

  #[tokio::test]
  async fn closed_channel_is_unreachable() {
    let (dispatcher, receiver) = InProcessDispatcher::channel(4);
    drop(receiver);

    assert!(matches!(
      dispatcher.dispatch(&task(), &executor()).await,
      Err(DispatchError::Unreachable { .. })
    ));
    assert!(!dispatcher.is_healthy());
  }
}
