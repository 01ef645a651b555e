//! End-to-end orchestration tests over the in-process transport.
//!
//! Each test wires the full engine (definition registry, run repository,
//! history, executor registry, dispatcher aggregator, orchestrator) with a
//! scripted in-process executor, then drives a run to a terminal state.
//! The executor deliberately delivers every result twice: the engine must
//! behave identically under at-least-once delivery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use verbena_definition::{
  CompensationPolicy, CompensationStrategy, DefinitionRegistry, InMemoryDefinitionRegistry,
  NodeDefinition, RetryPolicy, WorkflowDefinition,
};
use verbena_dispatch::{DispatchTask, DispatcherAggregator, InProcessDispatcher, TaskSigner};
use verbena_engine::{
  NodeOutcome, NodeResult, NoopNotifier, Orchestrator, OrchestratorConfig, OrchestratorSignal,
  ResultDisposition, RunManager,
};
use verbena_history::{ExecutionEventType, ExecutionHistory, InMemoryExecutionHistory};
use verbena_registry::{CommunicationType, ExecutorInfo, ExecutorRegistry, RoundRobin};
use verbena_run::{InMemoryRunRepository, NodeExecutionStatus, RunStatus};

const TENANT: &str = "acme";

fn node(id: &str, depends_on: &[&str]) -> NodeDefinition {
  NodeDefinition {
    node_id: id.to_string(),
    name: id.to_string(),
    node_type: "task".to_string(),
    executor_type: "generic".to_string(),
    config: HashMap::new(),
    depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
    transitions: Vec::new(),
    retry_policy: None,
    timeout_ms: None,
    critical: false,
  }
}

fn definition(id: &str, nodes: Vec<NodeDefinition>) -> WorkflowDefinition {
  WorkflowDefinition {
    definition_id: id.to_string(),
    tenant: TENANT.to_string(),
    name: id.to_string(),
    version: 1,
    nodes,
    inputs: HashMap::new(),
    outputs: HashMap::new(),
    retry_policy: RetryPolicy::default(),
    compensation: CompensationPolicy::default(),
  }
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
  RetryPolicy {
    max_attempts,
    initial_delay_ms: 10,
    max_delay_ms: 50,
    backoff_multiplier: 1.0,
    retryable_errors: vec!["TRANSIENT".to_string()],
  }
}

type Behavior = dyn Fn(&DispatchTask) -> NodeOutcome + Send + Sync;

struct Harness {
  manager: Arc<RunManager>,
  history: Arc<InMemoryExecutionHistory>,
  /// Node ids of compensation tasks, in delivery order.
  compensation_log: Arc<Mutex<Vec<String>>>,
  cancel: CancellationToken,
}

impl Drop for Harness {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

/// Wire up the full engine with a scripted executor.
///
/// The executor applies `behavior` to every non-compensation task and
/// reports the result TWICE after `result_delay`, exercising the dedup path
/// on every single node.
async fn start_engine(
  definition: WorkflowDefinition,
  behavior: Box<Behavior>,
  result_delay: Duration,
) -> Harness {
  let definitions = Arc::new(InMemoryDefinitionRegistry::new());
  definitions.register(definition).await.unwrap();

  let runs = Arc::new(InMemoryRunRepository::new());
  let history = Arc::new(InMemoryExecutionHistory::new());
  let registry = Arc::new(ExecutorRegistry::new(Arc::new(RoundRobin::new())));
  registry.register(ExecutorInfo {
    executor_id: "e1".to_string(),
    executor_type: "generic".to_string(),
    communication_type: CommunicationType::InProcess,
    endpoint: "mem://e1".to_string(),
    timeout_ms: None,
    metadata: HashMap::new(),
  });

  let (dispatcher, mut task_rx) = InProcessDispatcher::channel(64);
  let aggregator = Arc::new(DispatcherAggregator::new(vec![Arc::new(dispatcher)]));

  let orchestrator = Orchestrator::new(OrchestratorConfig {
    definitions: definitions.clone(),
    runs,
    history: history.clone(),
    registry,
    aggregator,
    signer: TaskSigner::new(b"test-secret".to_vec()),
    notifier: Arc::new(NoopNotifier),
  });
  let manager = orchestrator.manager();

  let compensation_log = Arc::new(Mutex::new(Vec::new()));
  let executor_log = compensation_log.clone();
  let executor_sender = orchestrator.sender();
  tokio::spawn(async move {
    while let Some(task) = task_rx.recv().await {
      if task.compensation {
        executor_log.lock().unwrap().push(task.node_id.clone());
        continue;
      }
      let outcome = behavior(&task);
      tokio::time::sleep(result_delay).await;
      let result = NodeResult {
        run_id: task.run_id.clone(),
        node_id: task.node_id.clone(),
        attempt: task.attempt,
        token: task.token.clone(),
        executor_id: Some("e1".to_string()),
        outcome,
      };
      // At-least-once delivery: report every result twice.
      let _ = executor_sender
        .send(OrchestratorSignal::ResultReceived(result.clone()))
        .await;
      let _ = executor_sender
        .send(OrchestratorSignal::ResultReceived(result))
        .await;
    }
  });

  let cancel = CancellationToken::new();
  tokio::spawn(orchestrator.start(cancel.clone()));

  Harness {
    manager,
    history,
    compensation_log,
    cancel,
  }
}

async fn wait_for_terminal(harness: &Harness, run_id: &str) -> RunStatus {
  for _ in 0..500 {
    let run = harness.manager.run(run_id).await.unwrap();
    if run.status.is_terminal() {
      return run.status;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!("run '{run_id}' did not reach a terminal state");
}

fn completes_with_marker() -> Box<Behavior> {
  Box::new(|task| NodeOutcome::Completed {
    output: HashMap::from([(
      format!("{}_done", task.node_id),
      serde_json::json!(true),
    )]),
  })
}

#[tokio::test]
async fn diamond_run_completes_under_duplicate_delivery() {
  let def = definition(
    "diamond",
    vec![
      node("a", &[]),
      node("b", &["a"]),
      node("c", &["a"]),
      node("d", &["b", "c"]),
    ],
  );
  let harness = start_engine(def, completes_with_marker(), Duration::ZERO).await;

  let run = harness
    .manager
    .create_run(TENANT, "diamond", HashMap::new())
    .await
    .unwrap();
  harness.manager.start_run(&run.run_id).await.unwrap();

  assert_eq!(wait_for_terminal(&harness, &run.run_id).await, RunStatus::Completed);

  let run = harness.manager.run(&run.run_id).await.unwrap();
  // Exactly one path entry per node despite every result arriving twice.
  assert_eq!(run.execution_path.len(), 4);
  assert_eq!(run.execution_path.first().map(String::as_str), Some("a"));
  assert_eq!(run.execution_path.last().map(String::as_str), Some("d"));
  for node_id in ["a", "b", "c", "d"] {
    assert_eq!(
      run.node_executions[node_id].status,
      NodeExecutionStatus::Completed
    );
    assert_eq!(run.variables[&format!("{node_id}_done")], serde_json::json!(true));
  }

  let events = harness.history.load(&run.run_id).await.unwrap();
  let completions = events
    .iter()
    .filter(|e| e.event_type == ExecutionEventType::NodeCompleted)
    .count();
  assert_eq!(completions, 4);
}

#[tokio::test]
async fn wide_fanout_applies_every_concurrent_result() {
  let mut nodes = vec![node("start", &[])];
  for i in 0..8 {
    nodes.push(node(&format!("worker_{i}"), &["start"]));
  }
  let def = definition("fanout", nodes);
  let harness = start_engine(def, completes_with_marker(), Duration::ZERO).await;

  let run = harness
    .manager
    .create_run(TENANT, "fanout", HashMap::new())
    .await
    .unwrap();
  harness.manager.start_run(&run.run_id).await.unwrap();

  assert_eq!(wait_for_terminal(&harness, &run.run_id).await, RunStatus::Completed);

  let run = harness.manager.run(&run.run_id).await.unwrap();
  // No update may be lost: the path grows by exactly one entry per node.
  assert_eq!(run.execution_path.len(), 9);
  for i in 0..8 {
    assert_eq!(
      run.node_executions[&format!("worker_{i}")].status,
      NodeExecutionStatus::Completed
    );
  }
}

#[tokio::test]
async fn transient_failure_retries_with_backoff_then_succeeds() {
  let mut flaky = node("flaky", &[]);
  flaky.critical = true;
  flaky.retry_policy = Some(fast_retry(3));
  let def = definition("retrying", vec![flaky]);

  let attempts = Arc::new(Mutex::new(0u32));
  let behavior_attempts = attempts.clone();
  let behavior: Box<Behavior> = Box::new(move |_task| {
    let mut attempts = behavior_attempts.lock().unwrap();
    *attempts += 1;
    if *attempts < 3 {
      NodeOutcome::Failed {
        error_code: "TRANSIENT".to_string(),
        error_message: "try again".to_string(),
      }
    } else {
      NodeOutcome::Completed {
        output: HashMap::new(),
      }
    }
  });
  let harness = start_engine(def, behavior, Duration::ZERO).await;

  let run = harness
    .manager
    .create_run(TENANT, "retrying", HashMap::new())
    .await
    .unwrap();
  harness.manager.start_run(&run.run_id).await.unwrap();

  assert_eq!(wait_for_terminal(&harness, &run.run_id).await, RunStatus::Completed);

  let run = harness.manager.run(&run.run_id).await.unwrap();
  assert_eq!(run.node_executions["flaky"].attempt, 3);

  let events = harness.history.load(&run.run_id).await.unwrap();
  let retries = events
    .iter()
    .filter(|e| e.event_type == ExecutionEventType::NodeRetryScheduled)
    .count();
  assert_eq!(retries, 2);
}

#[tokio::test]
async fn exhausted_retries_compensate_in_reverse_order_then_fail() {
  let mut doomed = node("doomed", &["second"]);
  doomed.critical = true;
  doomed.retry_policy = Some(fast_retry(3));
  let mut def = definition(
    "saga",
    vec![node("first", &[]), node("second", &["first"]), doomed],
  );
  def.compensation = CompensationPolicy {
    enabled: true,
    strategy: CompensationStrategy::Sequential,
    timeout_ms: 5_000,
    fail_on_compensation_error: false,
  };

  let behavior: Box<Behavior> = Box::new(|task| {
    if task.node_id == "doomed" {
      NodeOutcome::Failed {
        error_code: "TRANSIENT".to_string(),
        error_message: "persistent outage".to_string(),
      }
    } else {
      NodeOutcome::Completed {
        output: HashMap::new(),
      }
    }
  });
  let harness = start_engine(def, behavior, Duration::ZERO).await;

  let run = harness
    .manager
    .create_run(TENANT, "saga", HashMap::new())
    .await
    .unwrap();
  harness.manager.start_run(&run.run_id).await.unwrap();

  assert_eq!(wait_for_terminal(&harness, &run.run_id).await, RunStatus::Failed);

  let run = harness.manager.run(&run.run_id).await.unwrap();
  assert!(
    run
      .terminal_reason
      .as_deref()
      .unwrap_or_default()
      .contains("critical node 'doomed' failed")
  );
  // All three attempts were used before giving up.
  assert_eq!(run.node_executions["doomed"].attempt, 3);

  // Completed nodes are undone in reverse completion order, and the run
  // only becomes failed after the walk has finished.
  let compensated = harness.compensation_log.lock().unwrap().clone();
  assert_eq!(compensated, vec!["second".to_string(), "first".to_string()]);

  let events = harness.history.load(&run.run_id).await.unwrap();
  assert!(
    events
      .iter()
      .any(|e| e.event_type == ExecutionEventType::CompensationCompleted)
  );
}

#[tokio::test]
async fn cancelled_run_drops_late_results() {
  let def = definition("cancellable", vec![node("slow", &[])]);
  let harness = start_engine(def, completes_with_marker(), Duration::from_millis(150)).await;

  let run = harness
    .manager
    .create_run(TENANT, "cancellable", HashMap::new())
    .await
    .unwrap();
  harness.manager.start_run(&run.run_id).await.unwrap();

  // Let the dispatch go out, then cancel while the executor is working.
  tokio::time::sleep(Duration::from_millis(50)).await;
  harness
    .manager
    .cancel_run(&run.run_id, "operator request")
    .await
    .unwrap();

  // Wait out the late result delivery.
  tokio::time::sleep(Duration::from_millis(300)).await;

  let run = harness.manager.run(&run.run_id).await.unwrap();
  assert_eq!(run.status, RunStatus::Cancelled);
  assert_eq!(run.terminal_reason.as_deref(), Some("operator request"));
  // The late result must not have reopened the run.
  assert!(run.execution_path.is_empty());
  assert_ne!(
    run.node_executions["slow"].status,
    NodeExecutionStatus::Completed
  );
}

#[tokio::test]
async fn non_critical_failure_is_tolerated() {
  let def = definition(
    "tolerant",
    vec![node("a", &[]), node("optional", &["a"]), node("b", &["a"])],
  );

  let behavior: Box<Behavior> = Box::new(|task| {
    if task.node_id == "optional" {
      NodeOutcome::Failed {
        error_code: "INVALID_INPUT".to_string(),
        error_message: "bad config".to_string(),
      }
    } else {
      NodeOutcome::Completed {
        output: HashMap::new(),
      }
    }
  });
  let harness = start_engine(def, behavior, Duration::ZERO).await;

  let run = harness
    .manager
    .create_run(TENANT, "tolerant", HashMap::new())
    .await
    .unwrap();
  harness.manager.start_run(&run.run_id).await.unwrap();

  assert_eq!(wait_for_terminal(&harness, &run.run_id).await, RunStatus::Completed);

  let run = harness.manager.run(&run.run_id).await.unwrap();
  assert_eq!(
    run.node_executions["optional"].status,
    NodeExecutionStatus::Failed
  );
  assert_eq!(run.node_executions["b"].status, NodeExecutionStatus::Completed);
}

#[tokio::test]
async fn duplicate_result_reports_duplicate_disposition() {
  let def = definition("single", vec![node("only", &[])]);
  let harness = start_engine(def, completes_with_marker(), Duration::ZERO).await;

  let run = harness
    .manager
    .create_run(TENANT, "single", HashMap::new())
    .await
    .unwrap();
  harness.manager.start_run(&run.run_id).await.unwrap();
  assert_eq!(wait_for_terminal(&harness, &run.run_id).await, RunStatus::Completed);

  // Replay the applied result through the manager directly.
  let run = harness.manager.run(&run.run_id).await.unwrap();
  let attempt = run.node_executions["only"].attempt;
  let replay = NodeResult {
    run_id: run.run_id.clone(),
    node_id: "only".to_string(),
    attempt,
    token: verbena_dispatch::TokenIssuer::default().issue(&run.run_id, "only", attempt),
    executor_id: Some("e1".to_string()),
    outcome: NodeOutcome::Completed {
      output: HashMap::new(),
    },
  };
  let disposition = harness.manager.handle_node_result(replay).await.unwrap();
  assert_eq!(disposition, ResultDisposition::Duplicate);
}
