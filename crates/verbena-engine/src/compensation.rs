//! Saga-style compensation.
//!
//! When a run fails unrecoverably with compensation enabled, every node that
//! completed is undone by a compensation task dispatched through the same
//! transport mechanism as forward work, tagged `compensation: true`.
//! Compensation never turns a failed run into a successful one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use verbena_definition::{CompensationStrategy, WorkflowDefinition};
use verbena_dispatch::{DispatchTask, DispatcherAggregator, TaskSigner, TokenIssuer};
use verbena_history::{ExecutionEventType, ExecutionHistory};
use verbena_registry::ExecutorRegistry;
use verbena_run::{NodeExecutionStatus, WorkflowRun};

use crate::error::EngineError;
use crate::events::{RunEvent, RunNotifier};

/// Result of a compensation walk.
#[derive(Debug, Clone, Default)]
pub struct CompensationOutcome {
  /// Nodes a compensation task was attempted for.
  pub attempted: usize,
  /// `(node_id, error)` per failed compensation step.
  pub failures: Vec<(String, String)>,
}

impl CompensationOutcome {
  /// Detail string for the run's terminal reason, if any step failed.
  pub fn failure_detail(&self) -> Option<String> {
    if self.failures.is_empty() {
      return None;
    }
    let detail: Vec<String> = self
      .failures
      .iter()
      .map(|(node_id, error)| format!("{node_id}: {error}"))
      .collect();
    Some(format!("compensation failed for [{}]", detail.join(", ")))
  }
}

/// Walks a failed run's execution path in reverse, undoing completed nodes.
pub struct CompensationRunner {
  registry: Arc<ExecutorRegistry>,
  aggregator: Arc<DispatcherAggregator>,
  issuer: TokenIssuer,
  signer: TaskSigner,
  history: Arc<dyn ExecutionHistory>,
  notifier: Arc<dyn RunNotifier>,
}

impl CompensationRunner {
  pub fn new(
    registry: Arc<ExecutorRegistry>,
    aggregator: Arc<DispatcherAggregator>,
    issuer: TokenIssuer,
    signer: TaskSigner,
    history: Arc<dyn ExecutionHistory>,
    notifier: Arc<dyn RunNotifier>,
  ) -> Self {
    Self {
      registry,
      aggregator,
      issuer,
      signer,
      history,
      notifier,
    }
  }

  /// Undo every completed node of `run` per the definition's compensation
  /// policy. Returns what was attempted and what failed; the caller decides
  /// the run's terminal reason from it.
  pub async fn compensate(
    &self,
    run: &WorkflowRun,
    definition: &WorkflowDefinition,
  ) -> Result<CompensationOutcome, EngineError> {
    let policy = &definition.compensation;

    // Reverse completion order: the most recently completed node is undone
    // first.
    let targets: Vec<&str> = run
      .execution_path
      .iter()
      .rev()
      .filter(|node_id| {
        run
          .node_executions
          .get(node_id.as_str())
          .is_some_and(|e| e.status == NodeExecutionStatus::Completed)
      })
      .map(|s| s.as_str())
      .collect();

    info!(
      run_id = %run.run_id,
      nodes = targets.len(),
      strategy = ?policy.strategy,
      "compensation started"
    );
    self
      .history
      .append(
        &run.run_id,
        ExecutionEventType::CompensationStarted,
        &format!("compensating {} completed node(s)", targets.len()),
        HashMap::new(),
      )
      .await?;
    self.notifier.notify(RunEvent::CompensationStarted {
      run_id: run.run_id.clone(),
    });

    let budget = Duration::from_millis(policy.timeout_ms);
    let walk = self.walk(run, definition, &targets, policy.strategy, policy.fail_on_compensation_error);
    let outcome = match tokio::time::timeout(budget, walk).await {
      Ok(outcome) => outcome,
      Err(_) => {
        warn!(run_id = %run.run_id, timeout_ms = policy.timeout_ms, "compensation timed out");
        let mut outcome = CompensationOutcome::default();
        outcome
          .failures
          .push(("compensation".to_string(), "timed out".to_string()));
        outcome
      }
    };

    self
      .history
      .append(
        &run.run_id,
        ExecutionEventType::CompensationCompleted,
        &format!(
          "compensation finished with {} failure(s)",
          outcome.failures.len()
        ),
        HashMap::new(),
      )
      .await?;
    self.notifier.notify(RunEvent::CompensationCompleted {
      run_id: run.run_id.clone(),
      failures: outcome.failures.len(),
    });
    Ok(outcome)
  }

  async fn walk(
    &self,
    run: &WorkflowRun,
    definition: &WorkflowDefinition,
    targets: &[&str],
    strategy: CompensationStrategy,
    fail_fast: bool,
  ) -> CompensationOutcome {
    let mut outcome = CompensationOutcome::default();

    match strategy {
      CompensationStrategy::Sequential => {
        for node_id in targets {
          outcome.attempted += 1;
          if let Err(error) = self.compensate_node(run, definition, node_id).await {
            outcome.failures.push((node_id.to_string(), error));
            if fail_fast {
              break;
            }
          }
        }
      }
      CompensationStrategy::Parallel => {
        outcome.attempted = targets.len();
        let results = join_all(
          targets
            .iter()
            .map(|node_id| async move {
              (*node_id, self.compensate_node(run, definition, node_id).await)
            }),
        )
        .await;
        for (node_id, result) in results {
          if let Err(error) = result {
            outcome.failures.push((node_id.to_string(), error));
          }
        }
      }
    }

    outcome
  }

  /// Dispatch one compensation task. Errors come back as strings; they feed
  /// the run's terminal reason, not the retry machinery.
  async fn compensate_node(
    &self,
    run: &WorkflowRun,
    definition: &WorkflowDefinition,
    node_id: &str,
  ) -> Result<(), String> {
    let node = definition
      .node(node_id)
      .ok_or_else(|| format!("node '{node_id}' not in definition"))?;
    let Some(execution) = run.node_executions.get(node_id) else {
      return Err(format!("node '{node_id}' has no execution state"));
    };

    let executor = self
      .registry
      .executor_for_node(node)
      .map_err(|e| e.to_string())?;

    // The compensation context is the node's config plus what it produced.
    let mut context = node.config.clone();
    context.extend(
      execution
        .output
        .iter()
        .map(|(k, v)| (k.clone(), v.clone())),
    );

    let token = self
      .issuer
      .issue(&run.run_id, node_id, execution.attempt);
    let idempotency_key =
      DispatchTask::idempotency_key_for(&run.run_id, node_id, execution.attempt);
    let signature = self.signer.sign(&idempotency_key, &token.token);
    let task = DispatchTask {
      run_id: run.run_id.clone(),
      node_id: node_id.to_string(),
      attempt: execution.attempt,
      token,
      context,
      idempotency_key,
      signature,
      compensation: true,
      timeout_ms: node.timeout_ms,
    };

    let result = self
      .aggregator
      .dispatch(&task, &executor)
      .await
      .map_err(|e| e.to_string());
    // Compensation results do not come back through result handling, so the
    // load slot is released as soon as delivery settles.
    self.registry.task_finished(&executor.executor_id);

    let (event_type, message) = match &result {
      Ok(()) => (
        ExecutionEventType::CompensationNodeCompleted,
        format!("compensation dispatched for node '{node_id}'"),
      ),
      Err(error) => (
        ExecutionEventType::CompensationNodeFailed,
        format!("compensation failed for node '{node_id}': {error}"),
      ),
    };
    if let Err(history_error) = self
      .history
      .append(&run.run_id, event_type, &message, HashMap::new())
      .await
    {
      warn!(error = %history_error, "failed to record compensation event");
    }

    result
  }
}
