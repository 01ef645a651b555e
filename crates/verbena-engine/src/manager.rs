//! Run manager: the orchestration entry point for all run mutations.
//!
//! Every mutation follows the same discipline: acquire the per-run lock,
//! load the aggregate, apply the transition, persist, release. The lock is
//! never held across outbound dispatch I/O. Result application additionally
//! goes through the history ledger first, which is what makes delivery
//! effectively at-most-once.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use verbena_definition::DefinitionRegistry;
use verbena_history::{ExecutionEventType, ExecutionHistory};
use verbena_run::{RunError, RunLockManager, RunRepository, RunStatus, WorkflowRun};

use crate::error::EngineError;
use crate::events::{RunEvent, RunNotifier};
use crate::result::{NodeOutcome, NodeResult, ResultDisposition};
use crate::signal::OrchestratorSignal;

/// Applies incoming node results idempotently under per-run mutual
/// exclusion, advances run state, and triggers replanning.
pub struct RunManager {
  definitions: Arc<dyn DefinitionRegistry>,
  runs: Arc<dyn RunRepository>,
  history: Arc<dyn ExecutionHistory>,
  locks: RunLockManager,
  signals: mpsc::Sender<OrchestratorSignal>,
  notifier: Arc<dyn RunNotifier>,
}

impl RunManager {
  pub fn new(
    definitions: Arc<dyn DefinitionRegistry>,
    runs: Arc<dyn RunRepository>,
    history: Arc<dyn ExecutionHistory>,
    locks: RunLockManager,
    signals: mpsc::Sender<OrchestratorSignal>,
    notifier: Arc<dyn RunNotifier>,
  ) -> Self {
    Self {
      definitions,
      runs,
      history,
      locks,
      signals,
      notifier,
    }
  }

  /// Load a run (read-only).
  pub async fn run(&self, run_id: &str) -> Result<WorkflowRun, EngineError> {
    Ok(self.runs.find_by_id(run_id).await?)
  }

  /// Create a run in `Created` state from a registered definition.
  ///
  /// Declared inputs are resolved against `input`: defaults fill gaps, and a
  /// missing required input rejects the run before anything is persisted.
  pub async fn create_run(
    &self,
    tenant: &str,
    definition_id: &str,
    input: HashMap<String, serde_json::Value>,
  ) -> Result<WorkflowRun, EngineError> {
    let definition = self.definitions.get(tenant, definition_id).await?;

    let mut variables = input;
    for (name, declared) in &definition.inputs {
      if variables.contains_key(name) {
        continue;
      }
      if let Some(default) = &declared.default {
        variables.insert(name.clone(), default.clone());
      } else if declared.required {
        return Err(RunError::MissingInput { name: name.clone() }.into());
      }
    }

    let run = WorkflowRun::new(uuid::Uuid::new_v4().to_string(), &definition, variables);
    self.runs.insert(&run).await?;
    self
      .history
      .append(
        &run.run_id,
        ExecutionEventType::RunCreated,
        &format!(
          "run created from definition '{}' v{}",
          definition.definition_id, definition.version
        ),
        HashMap::new(),
      )
      .await?;
    self.notifier.notify(RunEvent::RunCreated {
      run_id: run.run_id.clone(),
      definition_id: definition.definition_id.clone(),
    });
    info!(run_id = %run.run_id, tenant = %tenant, definition_id = %definition_id, "run created");
    Ok(run)
  }

  /// Start a created run and trigger the first planning cycle.
  pub async fn start_run(&self, run_id: &str) -> Result<(), EngineError> {
    self.mutate(run_id, |run| run.start()).await?;
    self
      .history
      .append(run_id, ExecutionEventType::RunStarted, "run started", HashMap::new())
      .await?;
    self.notifier.notify(RunEvent::RunStarted {
      run_id: run_id.to_string(),
    });
    self.publish_run_updated(run_id).await;
    Ok(())
  }

  /// Suspend a running run (human task, external callback, timer).
  pub async fn suspend_run(
    &self,
    run_id: &str,
    reason: &str,
    waiting_node_id: Option<String>,
  ) -> Result<(), EngineError> {
    self
      .mutate(run_id, |run| run.suspend(reason, waiting_node_id))
      .await?;
    self
      .history
      .append(run_id, ExecutionEventType::RunSuspended, reason, HashMap::new())
      .await?;
    self.notifier.notify(RunEvent::RunSuspended {
      run_id: run_id.to_string(),
      reason: reason.to_string(),
    });
    Ok(())
  }

  /// Resume a suspended run, merging data carried by the resume operation.
  pub async fn resume_run(
    &self,
    run_id: &str,
    merge_data: HashMap<String, serde_json::Value>,
    human_task_id: Option<String>,
  ) -> Result<(), EngineError> {
    self.mutate(run_id, |run| run.resume(merge_data)).await?;
    let metadata = human_task_id
      .map(|id| HashMap::from([("human_task_id".to_string(), serde_json::json!(id))]))
      .unwrap_or_default();
    self
      .history
      .append(run_id, ExecutionEventType::RunResumed, "run resumed", metadata)
      .await?;
    self.notifier.notify(RunEvent::RunResumed {
      run_id: run_id.to_string(),
    });
    self.publish_run_updated(run_id).await;
    Ok(())
  }

  /// Cancel a run. In-flight dispatched tasks are not aborted; their late
  /// results are detected against the terminal state and dropped.
  pub async fn cancel_run(&self, run_id: &str, reason: &str) -> Result<(), EngineError> {
    self.mutate(run_id, |run| run.cancel(reason)).await?;
    self
      .history
      .append(run_id, ExecutionEventType::RunCancelled, reason, HashMap::new())
      .await?;
    self.notifier.notify(RunEvent::RunCancelled {
      run_id: run_id.to_string(),
      reason: reason.to_string(),
    });
    self.locks.release(run_id);
    info!(run_id = %run_id, reason = %reason, "run cancelled");
    Ok(())
  }

  /// Deliver a named signal to a node waiting for it, resuming the run if it
  /// is suspended. The payload becomes the node's output.
  pub async fn signal(
    &self,
    run_id: &str,
    name: &str,
    target_node_id: &str,
    payload: HashMap<String, serde_json::Value>,
  ) -> Result<(), EngineError> {
    self
      .mutate(run_id, |run| {
        if run.status == RunStatus::Suspended {
          run.resume(HashMap::new())?;
        }
        run.apply_signal(target_node_id, payload)
      })
      .await?;
    self
      .history
      .append(
        run_id,
        ExecutionEventType::SignalReceived,
        &format!("signal '{name}' delivered to node '{target_node_id}'"),
        HashMap::from([("signal".to_string(), serde_json::json!(name))]),
      )
      .await?;
    self.notifier.notify(RunEvent::NodeCompleted {
      run_id: run_id.to_string(),
      node_id: target_node_id.to_string(),
    });
    self.publish_run_updated(run_id).await;
    Ok(())
  }

  /// Mark a node as dispatched with the next attempt number.
  ///
  /// Returns the updated run and the attempt the dispatch must carry.
  pub async fn mark_node_dispatched(
    &self,
    run_id: &str,
    node_id: &str,
  ) -> Result<(WorkflowRun, u32), EngineError> {
    let mut attempt = 0;
    let run = self
      .mutate(run_id, |run| {
        let current = run
          .node_executions
          .get(node_id)
          .map(|e| e.attempt)
          .unwrap_or(0);
        attempt = current + 1;
        run.mark_node_running(node_id, attempt)
      })
      .await?;
    Ok((run, attempt))
  }

  /// Record a dispatch in history and notify observers.
  pub async fn record_dispatch(
    &self,
    run_id: &str,
    node_id: &str,
    attempt: u32,
    executor_id: &str,
  ) -> Result<(), EngineError> {
    self
      .history
      .append(
        run_id,
        ExecutionEventType::NodeDispatched,
        &format!("node '{node_id}' dispatched to '{executor_id}' (attempt {attempt})"),
        HashMap::from([
          ("node_id".to_string(), serde_json::json!(node_id)),
          ("attempt".to_string(), serde_json::json!(attempt)),
          ("executor_id".to_string(), serde_json::json!(executor_id)),
        ]),
      )
      .await?;
    self.notifier.notify(RunEvent::NodeDispatched {
      run_id: run_id.to_string(),
      node_id: node_id.to_string(),
      attempt,
      executor_id: executor_id.to_string(),
    });
    Ok(())
  }

  /// Apply a node result. Tolerates at-least-once delivery from any
  /// transport.
  ///
  /// Order of defenses: token validation, idempotency ledger, terminal-run
  /// check under the per-run lock. Duplicates are dropped silently; they are
  /// not errors.
  #[instrument(
    name = "handle_node_result",
    skip(self, result),
    fields(
      run_id = %result.run_id,
      node_id = %result.node_id,
      attempt = result.attempt,
    )
  )]
  pub async fn handle_node_result(
    &self,
    result: NodeResult,
  ) -> Result<ResultDisposition, EngineError> {
    let run_id = result.run_id.clone();
    let node_id = result.node_id.clone();
    let attempt = result.attempt;

    // A superseded attempt's token (or one past its expiry) must not be
    // allowed to race a newer attempt's state.
    if let Err(token_error) =
      result
        .token
        .validate(&run_id, &node_id, attempt, Utc::now())
    {
      warn!(error = %token_error, "node result rejected: invalid execution token");
      return Ok(ResultDisposition::Rejected {
        reason: token_error.to_string(),
      });
    }

    if self
      .history
      .is_node_result_processed(&run_id, &node_id, attempt)
      .await?
    {
      debug!("duplicate node result dropped");
      return Ok(ResultDisposition::Duplicate);
    }

    let (event_type, message) = match &result.outcome {
      NodeOutcome::Completed { .. } => (
        ExecutionEventType::NodeCompleted,
        format!("node '{node_id}' completed (attempt {attempt})"),
      ),
      NodeOutcome::Failed {
        error_code,
        error_message,
      } => (
        ExecutionEventType::NodeFailed,
        format!("node '{node_id}' failed (attempt {attempt}): {error_code}: {error_message}"),
      ),
    };
    let metadata = HashMap::from([
      ("node_id".to_string(), serde_json::json!(node_id)),
      ("attempt".to_string(), serde_json::json!(attempt)),
    ]);
    let recorded = self
      .history
      .record_node_result(&run_id, &node_id, attempt, event_type, &message, metadata)
      .await?;
    if !recorded {
      // Lost the check-and-record race to a concurrent delivery.
      debug!("duplicate node result dropped");
      return Ok(ResultDisposition::Duplicate);
    }

    // Tenant and definition id are immutable on the run, so this unlocked
    // read is safe; the aggregate is reloaded under the lock below.
    let probe = self.runs.find_by_id(&run_id).await?;
    let definition = self
      .definitions
      .get(&probe.tenant, &probe.definition_id)
      .await?;

    let mut compensation_reason: Option<String> = None;
    let mut failed_reason: Option<String> = None;
    let mut retry: Option<(DateTime<Utc>, std::time::Duration)> = None;
    let mut node_event: Option<RunEvent> = None;

    {
      let _guard = self.locks.lock(&run_id).await;
      let mut run = self.runs.find_by_id(&run_id).await?;

      if run.status.is_terminal() {
        warn!(status = ?run.status, "late node result for terminal run dropped");
        return Ok(ResultDisposition::Rejected {
          reason: format!("run is terminal ({:?})", run.status),
        });
      }

      match result.outcome {
        NodeOutcome::Completed { output } => {
          run.complete_node(&node_id, output)?;
          node_event = Some(RunEvent::NodeCompleted {
            run_id: run_id.clone(),
            node_id: node_id.clone(),
          });
        }
        NodeOutcome::Failed {
          error_code,
          error_message,
        } => {
          let error = format!("{error_code}: {error_message}");
          let policy = definition.retry_policy_for(&node_id);

          if policy.is_retryable(&error_code) && policy.has_attempts_remaining(attempt) {
            let delay = policy.delay_after_attempt(attempt);
            let retry_at = Utc::now()
              + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            run.mark_node_waiting_retry(&node_id, retry_at, error.clone())?;
            retry = Some((retry_at, delay));
          } else {
            run.fail_node(&node_id, error.clone())?;
            node_event = Some(RunEvent::NodeFailed {
              run_id: run_id.clone(),
              node_id: node_id.clone(),
              error: error.clone(),
            });

            let critical = definition
              .node(&node_id)
              .map(|n| n.critical)
              .unwrap_or(false);
            if critical {
              let reason = format!("critical node '{node_id}' failed: {error}");
              if definition.compensation.enabled {
                compensation_reason = Some(reason);
              } else {
                run.fail(reason.clone())?;
                failed_reason = Some(reason);
              }
            }
          }
        }
      }

      self.runs.update(&run).await?;
    }

    if let Some(event) = node_event {
      self.notifier.notify(event);
    }

    if let Some((retry_at, delay)) = retry {
      self
        .history
        .append(
          &run_id,
          ExecutionEventType::NodeRetryScheduled,
          &format!(
            "node '{node_id}' retry scheduled in {}ms (after attempt {attempt})",
            delay.as_millis()
          ),
          HashMap::new(),
        )
        .await?;
      self.notifier.notify(RunEvent::NodeRetryScheduled {
        run_id: run_id.clone(),
        node_id: node_id.clone(),
        retry_at,
      });
      self.schedule_retry(run_id.clone(), node_id.clone(), delay);
    }

    if let Some(reason) = &failed_reason {
      self
        .history
        .append(&run_id, ExecutionEventType::RunFailed, reason, HashMap::new())
        .await?;
      self.notifier.notify(RunEvent::RunFailed {
        run_id: run_id.clone(),
        reason: reason.clone(),
      });
      self.locks.release(&run_id);
    }

    self.publish_run_updated(&run_id).await;
    Ok(ResultDisposition::Applied {
      compensation_reason,
    })
  }

  /// Complete a run. A no-op when the run is already terminal.
  pub async fn complete_run(&self, run_id: &str) -> Result<(), EngineError> {
    {
      let _guard = self.locks.lock(run_id).await;
      let mut run = self.runs.find_by_id(run_id).await?;
      if run.status.is_terminal() {
        return Ok(());
      }
      run.complete()?;
      self.runs.update(&run).await?;
    }
    self
      .history
      .append(run_id, ExecutionEventType::RunCompleted, "run completed", HashMap::new())
      .await?;
    self.notifier.notify(RunEvent::RunCompleted {
      run_id: run_id.to_string(),
    });
    self.locks.release(run_id);
    info!(run_id = %run_id, "run completed");
    Ok(())
  }

  /// Fail a run with a reason. A no-op when the run is already terminal.
  pub async fn fail_run(&self, run_id: &str, reason: &str) -> Result<(), EngineError> {
    {
      let _guard = self.locks.lock(run_id).await;
      let mut run = self.runs.find_by_id(run_id).await?;
      if run.status.is_terminal() {
        return Ok(());
      }
      run.fail(reason)?;
      self.runs.update(&run).await?;
    }
    self
      .history
      .append(run_id, ExecutionEventType::RunFailed, reason, HashMap::new())
      .await?;
    self.notifier.notify(RunEvent::RunFailed {
      run_id: run_id.to_string(),
      reason: reason.to_string(),
    });
    self.locks.release(run_id);
    info!(run_id = %run_id, reason = %reason, "run failed");
    Ok(())
  }

  /// Load, mutate, persist under the per-run lock.
  async fn mutate<F>(&self, run_id: &str, f: F) -> Result<WorkflowRun, EngineError>
  where
    F: FnOnce(&mut WorkflowRun) -> Result<(), RunError>,
  {
    let _guard = self.locks.lock(run_id).await;
    let mut run = self.runs.find_by_id(run_id).await?;
    f(&mut run)?;
    self.runs.update(&run).await?;
    Ok(run)
  }

  fn schedule_retry(&self, run_id: String, node_id: String, delay: std::time::Duration) {
    let signals = self.signals.clone();
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      if signals
        .send(OrchestratorSignal::RetryDue { run_id, node_id })
        .await
        .is_err()
      {
        debug!("retry signal dropped: orchestrator stopped");
      }
    });
  }

  async fn publish_run_updated(&self, run_id: &str) {
    if self
      .signals
      .send(OrchestratorSignal::RunUpdated {
        run_id: run_id.to_string(),
      })
      .await
      .is_err()
    {
      debug!(run_id = %run_id, "run-updated signal dropped: orchestrator stopped");
    }
  }
}
