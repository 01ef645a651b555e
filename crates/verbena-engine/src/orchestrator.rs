//! Orchestration drive loop.
//!
//! The loop is push-driven: it reacts to "result received" and "run updated"
//! signals and cycles planner -> executor selection -> dispatch until the
//! run reaches a terminal state. No polling; the only fixed-interval
//! component in the system is the executor health monitor.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use verbena_definition::DefinitionRegistry;
use verbena_dispatch::{DispatchTask, DispatcherAggregator, TaskSigner, TokenIssuer};
use verbena_history::ExecutionHistory;
use verbena_registry::ExecutorRegistry;
use verbena_run::{plan_next_execution, NodeExecutionStatus, RunLockManager, RunRepository};

use crate::compensation::CompensationRunner;
use crate::error::EngineError;
use crate::events::RunNotifier;
use crate::manager::RunManager;
use crate::result::{NodeOutcome, NodeResult, ResultDisposition};
use crate::signal::OrchestratorSignal;

/// Collaborators the orchestrator is wired with at startup.
///
/// Everything is injected explicitly; there is no runtime discovery of
/// dispatchers or stores.
pub struct OrchestratorConfig {
  pub definitions: Arc<dyn DefinitionRegistry>,
  pub runs: Arc<dyn RunRepository>,
  pub history: Arc<dyn ExecutionHistory>,
  pub registry: Arc<ExecutorRegistry>,
  pub aggregator: Arc<DispatcherAggregator>,
  pub signer: TaskSigner,
  pub notifier: Arc<dyn RunNotifier>,
}

/// Glue between planner, executor selection, and dispatch.
pub struct Orchestrator {
  manager: Arc<RunManager>,
  definitions: Arc<dyn DefinitionRegistry>,
  registry: Arc<ExecutorRegistry>,
  aggregator: Arc<DispatcherAggregator>,
  issuer: TokenIssuer,
  signer: TaskSigner,
  compensation: Arc<CompensationRunner>,
  /// Runs currently being compensated; replanning skips them.
  compensating: Arc<StdMutex<HashSet<String>>>,
  sender: mpsc::Sender<OrchestratorSignal>,
  receiver: mpsc::Receiver<OrchestratorSignal>,
}

impl Orchestrator {
  pub fn new(config: OrchestratorConfig) -> Self {
    let (sender, receiver) = mpsc::channel(256);
    let issuer = TokenIssuer::default();
    let manager = Arc::new(RunManager::new(
      config.definitions.clone(),
      config.runs.clone(),
      config.history.clone(),
      RunLockManager::new(),
      sender.clone(),
      config.notifier.clone(),
    ));
    let compensation = Arc::new(CompensationRunner::new(
      config.registry.clone(),
      config.aggregator.clone(),
      issuer.clone(),
      config.signer.clone(),
      config.history.clone(),
      config.notifier.clone(),
    ));

    Self {
      manager,
      definitions: config.definitions,
      registry: config.registry,
      aggregator: config.aggregator,
      issuer,
      signer: config.signer,
      compensation,
      compensating: Arc::new(StdMutex::new(HashSet::new())),
      sender,
      receiver,
    }
  }

  /// The run manager, for administrative operations (create, start,
  /// suspend, resume, cancel, signal, direct result delivery).
  pub fn manager(&self) -> Arc<RunManager> {
    self.manager.clone()
  }

  /// A handle for feeding signals in (transport ingestion, tests).
  pub fn sender(&self) -> mpsc::Sender<OrchestratorSignal> {
    self.sender.clone()
  }

  /// Run the drive loop until cancelled or every sender is dropped.
  pub async fn start(mut self, cancel: CancellationToken) {
    info!("orchestrator started");
    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("orchestrator cancelled");
          break;
        }
        signal = self.receiver.recv() => {
          match signal {
            Some(signal) => self.handle_signal(signal).await,
            None => {
              info!("orchestrator signal channel closed");
              break;
            }
          }
        }
      }
    }
  }

  async fn handle_signal(&self, signal: OrchestratorSignal) {
    match signal {
      OrchestratorSignal::ResultReceived(result) => {
        let run_id = result.run_id.clone();
        if let Some(executor_id) = &result.executor_id {
          self.registry.task_finished(executor_id);
        }
        match self.manager.handle_node_result(result).await {
          Ok(ResultDisposition::Applied {
            compensation_reason: Some(reason),
          }) => {
            self.begin_compensation(run_id, reason);
          }
          Ok(_) => {}
          Err(e) => {
            error!(run_id = %run_id, error = %e, "failed to apply node result");
          }
        }
      }
      OrchestratorSignal::RunUpdated { run_id } => {
        if let Err(e) = self.replan(&run_id).await {
          error!(run_id = %run_id, error = %e, "replanning failed");
        }
      }
      OrchestratorSignal::RetryDue { run_id, node_id } => {
        if let Err(e) = self.retry_node(&run_id, &node_id).await {
          error!(run_id = %run_id, node_id = %node_id, error = %e, "retry dispatch failed");
        }
      }
    }
  }

  /// One planning cycle: plan, then dispatch every ready node concurrently.
  /// The cycle does not finish until all dispatch attempts for it have been
  /// issued; their completions arrive asynchronously as results.
  async fn replan(&self, run_id: &str) -> Result<(), EngineError> {
    if self.is_compensating(run_id) {
      return Ok(());
    }

    let run = self.manager.run(run_id).await?;
    if run.status.is_terminal() {
      return Ok(());
    }
    let definition = self.definitions.get(&run.tenant, &run.definition_id).await?;

    let plan = plan_next_execution(&run, &definition);
    if plan.is_complete {
      return self.manager.complete_run(run_id).await;
    }
    if plan.is_stuck {
      warn!(
        run_id = %run_id,
        "run is stuck: no ready nodes, nothing in flight, not complete"
      );
      return Ok(());
    }

    let dispatches = plan
      .ready_nodes
      .iter()
      .map(|node_id| self.dispatch_node(run_id, node_id));
    for (node_id, result) in plan.ready_nodes.iter().zip(join_all(dispatches).await) {
      if let Err(e) = result {
        error!(run_id = %run_id, node_id = %node_id, error = %e, "dispatch failed");
      }
    }
    Ok(())
  }

  /// Mark, select, sign, send. The run lock is only held inside
  /// `mark_node_dispatched`; the outbound send happens outside it.
  async fn dispatch_node(&self, run_id: &str, node_id: &str) -> Result<(), EngineError> {
    let (run, attempt) = self.manager.mark_node_dispatched(run_id, node_id).await?;
    let definition = self.definitions.get(&run.tenant, &run.definition_id).await?;
    let Some(node) = definition.node(node_id) else {
      // Definitions are validated at registration; a missing node here is a
      // registry swap gone wrong.
      return self
        .fail_dispatch(
          run_id,
          node_id,
          attempt,
          None,
          "NODE_NOT_IN_DEFINITION",
          &format!("node '{node_id}' not found in definition"),
        )
        .await;
    };

    let token = self.issuer.issue(run_id, node_id, attempt);

    let executor = match self.registry.executor_for_node(node) {
      Ok(executor) => executor,
      Err(selection_error) => {
        warn!(
          run_id = %run_id,
          node_id = %node_id,
          error = %selection_error,
          "no executor available"
        );
        return self
          .fail_dispatch(
            run_id,
            node_id,
            attempt,
            None,
            "NO_HEALTHY_EXECUTOR",
            &selection_error.to_string(),
          )
          .await;
      }
    };

    // Dispatch context: run variables overlaid with node config.
    let mut context = run.variables.clone();
    context.extend(node.config.clone());

    let idempotency_key = DispatchTask::idempotency_key_for(run_id, node_id, attempt);
    let signature = self.signer.sign(&idempotency_key, &token.token);
    let task = DispatchTask {
      run_id: run_id.to_string(),
      node_id: node_id.to_string(),
      attempt,
      token: token.clone(),
      context,
      idempotency_key,
      signature,
      compensation: false,
      timeout_ms: node.timeout_ms,
    };

    self
      .manager
      .record_dispatch(run_id, node_id, attempt, &executor.executor_id)
      .await?;

    if let Err(dispatch_error) = self.aggregator.dispatch(&task, &executor).await {
      self.registry.task_finished(&executor.executor_id);
      warn!(
        run_id = %run_id,
        node_id = %node_id,
        executor_id = %executor.executor_id,
        error = %dispatch_error,
        "dispatch failed; routing through node-failure path"
      );
      let code = dispatch_error.error_code().to_string();
      let result = NodeResult {
        run_id: run_id.to_string(),
        node_id: node_id.to_string(),
        attempt,
        token,
        executor_id: Some(executor.executor_id.clone()),
        outcome: NodeOutcome::Failed {
          error_code: code,
          error_message: dispatch_error.to_string(),
        },
      };
      self.apply_internal_result(result).await?;
    }
    Ok(())
  }

  /// Route an internally detected failure (selection, dispatch) through the
  /// same node-failure path as an execution error.
  async fn fail_dispatch(
    &self,
    run_id: &str,
    node_id: &str,
    attempt: u32,
    executor_id: Option<String>,
    error_code: &str,
    error_message: &str,
  ) -> Result<(), EngineError> {
    let token = self.issuer.issue(run_id, node_id, attempt);
    let result = NodeResult {
      run_id: run_id.to_string(),
      node_id: node_id.to_string(),
      attempt,
      token,
      executor_id,
      outcome: NodeOutcome::Failed {
        error_code: error_code.to_string(),
        error_message: error_message.to_string(),
      },
    };
    self.apply_internal_result(result).await
  }

  async fn apply_internal_result(&self, result: NodeResult) -> Result<(), EngineError> {
    let run_id = result.run_id.clone();
    if let ResultDisposition::Applied {
      compensation_reason: Some(reason),
    } = self.manager.handle_node_result(result).await?
    {
      self.begin_compensation(run_id, reason);
    }
    Ok(())
  }

  /// Re-dispatch a node whose backoff timer fired, unless a newer state
  /// change superseded the retry.
  async fn retry_node(&self, run_id: &str, node_id: &str) -> Result<(), EngineError> {
    if self.is_compensating(run_id) {
      return Ok(());
    }
    let run = self.manager.run(run_id).await?;
    if run.status.is_terminal() {
      return Ok(());
    }
    let waiting = run
      .node_executions
      .get(node_id)
      .is_some_and(|e| e.status == NodeExecutionStatus::WaitingRetry);
    if !waiting {
      return Ok(());
    }
    self.dispatch_node(run_id, node_id).await
  }

  fn is_compensating(&self, run_id: &str) -> bool {
    self
      .compensating
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .contains(run_id)
  }

  /// Kick off the compensation walk in the background and fail the run once
  /// it finishes. The walk dispatches through the normal transports, so it
  /// must not block the drive loop.
  fn begin_compensation(&self, run_id: String, reason: String) {
    {
      let mut compensating = self.compensating.lock().unwrap_or_else(|e| e.into_inner());
      if !compensating.insert(run_id.clone()) {
        return;
      }
    }

    let manager = self.manager.clone();
    let definitions = self.definitions.clone();
    let compensation = self.compensation.clone();
    let compensating = self.compensating.clone();

    tokio::spawn(async move {
      let fallback_reason = reason.clone();
      let flow = async {
        let run = manager.run(&run_id).await?;
        let definition = definitions.get(&run.tenant, &run.definition_id).await?;
        let outcome = compensation.compensate(&run, &definition).await?;

        let mut terminal_reason = reason;
        if definition.compensation.fail_on_compensation_error {
          if let Some(detail) = outcome.failure_detail() {
            terminal_reason = format!("{terminal_reason}; {detail}");
          }
        }
        manager.fail_run(&run_id, &terminal_reason).await
      };

      if let Err(e) = flow.await {
        error!(run_id = %run_id, error = %e, "compensation flow failed");
        // The run still ends failed with the original reason.
        if let Err(e) = manager.fail_run(&run_id, &fallback_reason).await {
          error!(run_id = %run_id, error = %e, "failed to fail run after compensation error");
        }
      }

      compensating
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&run_id);
    });
  }
}
