use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use verbena_definition::WorkflowDefinition;

use crate::error::RunError;
use crate::node_execution::{NodeExecution, NodeExecutionStatus};
use crate::status::RunStatus;

/// One execution instance of a workflow definition.
///
/// The aggregate is mutated exclusively through these methods, and only by
/// the run manager while holding the per-run lock. The planner and the
/// dispatcher read it but never write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
  pub run_id: String,
  pub tenant: String,
  pub definition_id: String,
  pub status: RunStatus,
  /// Run inputs merged with node outputs, in application order.
  pub variables: HashMap<String, serde_json::Value>,
  pub node_executions: HashMap<String, NodeExecution>,
  /// Node ids in completion order.
  pub execution_path: Vec<String>,
  pub created_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
  /// Human-readable reason, always set on terminal states.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub terminal_reason: Option<String>,
  /// Node the run is suspended on, if any.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub waiting_node_id: Option<String>,
  /// Why the run is suspended, if it is.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub suspend_reason: Option<String>,
}

impl WorkflowRun {
  /// Create a run in `Created` state with one pending execution per node.
  ///
  /// `input` must already be resolved against the definition's input
  /// declarations (see `RunManager::create_run`).
  pub fn new(
    run_id: impl Into<String>,
    definition: &WorkflowDefinition,
    input: HashMap<String, serde_json::Value>,
  ) -> Self {
    let node_executions = definition
      .nodes
      .iter()
      .map(|n| (n.node_id.clone(), NodeExecution::new(&n.node_id)))
      .collect();

    Self {
      run_id: run_id.into(),
      tenant: definition.tenant.clone(),
      definition_id: definition.definition_id.clone(),
      status: RunStatus::Created,
      variables: input,
      node_executions,
      execution_path: Vec::new(),
      created_at: Utc::now(),
      started_at: None,
      completed_at: None,
      terminal_reason: None,
      waiting_node_id: None,
      suspend_reason: None,
    }
  }

  fn transition(&mut self, to: RunStatus) -> Result<(), RunError> {
    if !self.status.can_transition_to(to) {
      return Err(RunError::InvalidTransition {
        from: self.status,
        to,
      });
    }
    self.status = to;
    Ok(())
  }

  /// `Created -> Running`.
  pub fn start(&mut self) -> Result<(), RunError> {
    self.transition(RunStatus::Running)?;
    self.started_at = Some(Utc::now());
    Ok(())
  }

  /// `Running -> Suspended`, recording what the run is waiting on.
  pub fn suspend(
    &mut self,
    reason: impl Into<String>,
    waiting_node_id: Option<String>,
  ) -> Result<(), RunError> {
    self.transition(RunStatus::Suspended)?;
    self.suspend_reason = Some(reason.into());
    self.waiting_node_id = waiting_node_id.clone();
    if let Some(node_id) = waiting_node_id {
      if let Some(exec) = self.node_executions.get_mut(&node_id) {
        exec.status = NodeExecutionStatus::Waiting;
      }
    }
    Ok(())
  }

  /// `Suspended -> Running`, merging resume data into run variables.
  pub fn resume(
    &mut self,
    merge_data: HashMap<String, serde_json::Value>,
  ) -> Result<(), RunError> {
    self.transition(RunStatus::Running)?;
    self.variables.extend(merge_data);
    self.waiting_node_id = None;
    self.suspend_reason = None;
    Ok(())
  }

  /// Direct transition to terminal `Cancelled`.
  pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), RunError> {
    self.transition(RunStatus::Cancelled)?;
    self.completed_at = Some(Utc::now());
    self.terminal_reason = Some(reason.into());
    Ok(())
  }

  /// Terminal `Completed`. Declared outputs are read from the variable map
  /// by whoever consumes the finished run.
  pub fn complete(&mut self) -> Result<(), RunError> {
    self.transition(RunStatus::Completed)?;
    self.completed_at = Some(Utc::now());
    self.terminal_reason = Some("completed".to_string());
    Ok(())
  }

  /// Terminal `Failed` with a human-readable reason.
  pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), RunError> {
    self.transition(RunStatus::Failed)?;
    self.completed_at = Some(Utc::now());
    self.terminal_reason = Some(reason.into());
    Ok(())
  }

  fn node_mut(&mut self, node_id: &str) -> Result<&mut NodeExecution, RunError> {
    self
      .node_executions
      .get_mut(node_id)
      .ok_or_else(|| RunError::NodeNotFound {
        node_id: node_id.to_string(),
      })
  }

  /// Mark a node dispatched: `Running` with the given attempt number.
  pub fn mark_node_running(&mut self, node_id: &str, attempt: u32) -> Result<(), RunError> {
    let exec = self.node_mut(node_id)?;
    exec.status = NodeExecutionStatus::Running;
    exec.attempt = attempt;
    exec.started_at = Some(Utc::now());
    exec.retry_at = None;
    Ok(())
  }

  /// Apply a successful node result: merge output into run variables and
  /// append the node to the execution path.
  pub fn complete_node(
    &mut self,
    node_id: &str,
    output: HashMap<String, serde_json::Value>,
  ) -> Result<(), RunError> {
    let exec = self.node_mut(node_id)?;
    exec.status = NodeExecutionStatus::Completed;
    exec.completed_at = Some(Utc::now());
    exec.output = output.clone();
    exec.error = None;
    self.variables.extend(output);
    self.execution_path.push(node_id.to_string());
    Ok(())
  }

  /// Apply a terminal node failure.
  pub fn fail_node(&mut self, node_id: &str, error: impl Into<String>) -> Result<(), RunError> {
    let exec = self.node_mut(node_id)?;
    exec.status = NodeExecutionStatus::Failed;
    exec.completed_at = Some(Utc::now());
    exec.error = Some(error.into());
    Ok(())
  }

  /// Park a node for retry after a retryable failure.
  pub fn mark_node_waiting_retry(
    &mut self,
    node_id: &str,
    retry_at: DateTime<Utc>,
    error: impl Into<String>,
  ) -> Result<(), RunError> {
    let exec = self.node_mut(node_id)?;
    exec.status = NodeExecutionStatus::WaitingRetry;
    exec.retry_at = Some(retry_at);
    exec.error = Some(error.into());
    Ok(())
  }

  /// Complete a `Waiting` node with a signal payload as its output.
  pub fn apply_signal(
    &mut self,
    node_id: &str,
    payload: HashMap<String, serde_json::Value>,
  ) -> Result<(), RunError> {
    {
      let exec = self.node_mut(node_id)?;
      if exec.status != NodeExecutionStatus::Waiting {
        return Err(RunError::NotWaitingForSignal {
          node_id: node_id.to_string(),
        });
      }
    }
    self.complete_node(node_id, payload)
  }
}
