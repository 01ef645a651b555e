//! Execution planning.
//!
//! [`plan_next_execution`] is a pure function of (run, definition): it decides
//! which nodes are ready to dispatch, whether the run has finished all the
//! work the definition requires, and whether it is stuck. It never mutates
//! the run; all mutation goes through the run manager under the per-run lock.

use std::collections::HashMap;

use tracing::debug;
use verbena_definition::{NodeDefinition, TransitionKind, WorkflowDefinition};

use crate::condition::evaluate_condition;
use crate::node_execution::NodeExecutionStatus;
use crate::run::WorkflowRun;
use crate::status::RunStatus;

/// Outcome of one planning pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
  /// Nodes whose dependencies are satisfied and whose guards pass.
  /// Multiple entries are a legitimate fan-out; all must be dispatched,
  /// in no particular order.
  pub ready_nodes: Vec<String>,
  /// Every required node has reached a terminal execution state.
  pub is_complete: bool,
  /// Nothing is ready, nothing is in flight, and the run is not complete.
  /// A deadlock/misconfiguration signal: logged, never auto-resolved.
  pub is_stuck: bool,
}

/// How a node currently stands with respect to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
  /// Dependencies satisfied, guards pass: dispatch now.
  Ready,
  /// Waiting on upstream work that is still pending or in flight.
  Blocked,
  /// In flight: running, parked for retry, or waiting for a signal.
  InFlight,
  /// Reached a terminal execution status.
  Done,
  /// Can never run in this run: an upstream failed with no error route to
  /// it, or its guards are decidably false.
  Unreachable,
}

/// Compute the next execution plan for a run.
pub fn plan_next_execution(run: &WorkflowRun, definition: &WorkflowDefinition) -> ExecutionPlan {
  let mut states: HashMap<&str, NodeState> = HashMap::with_capacity(definition.nodes.len());
  for node in &definition.nodes {
    classify(node, run, definition, &mut states);
  }

  let ready_nodes: Vec<String> = if run.status == RunStatus::Running {
    definition
      .nodes
      .iter()
      .filter(|n| states.get(n.node_id.as_str()) == Some(&NodeState::Ready))
      .map(|n| n.node_id.clone())
      .collect()
  } else {
    Vec::new()
  };

  let in_flight = states.values().any(|s| *s == NodeState::InFlight);
  let is_complete = states
    .values()
    .all(|s| matches!(s, NodeState::Done | NodeState::Unreachable));
  let is_stuck = !is_complete && ready_nodes.is_empty() && !in_flight
    && run.status == RunStatus::Running;

  if is_stuck {
    debug!(run_id = %run.run_id, "planner found no ready nodes and nothing in flight");
  }

  ExecutionPlan {
    ready_nodes,
    is_complete,
    is_stuck,
  }
}

fn classify<'a>(
  node: &'a NodeDefinition,
  run: &WorkflowRun,
  definition: &'a WorkflowDefinition,
  states: &mut HashMap<&'a str, NodeState>,
) -> NodeState {
  if let Some(state) = states.get(node.node_id.as_str()) {
    return *state;
  }

  let state = compute_state(node, run, definition, states);
  states.insert(&node.node_id, state);
  state
}

fn compute_state<'a>(
  node: &'a NodeDefinition,
  run: &WorkflowRun,
  definition: &'a WorkflowDefinition,
  states: &mut HashMap<&'a str, NodeState>,
) -> NodeState {
  use NodeExecutionStatus::*;

  match run.node_executions.get(&node.node_id).map(|e| e.status) {
    Some(Completed | Failed) => return NodeState::Done,
    Some(Running | WaitingRetry | Waiting) => return NodeState::InFlight,
    Some(Pending) | None => {}
  }

  // Dependency satisfaction: a dependency counts when it completed, or when
  // it failed and an error transition routes from it to this node.
  let mut blocked = false;
  for dep_id in &node.depends_on {
    let Some(dep) = definition.node(dep_id) else {
      // Unresolvable references are rejected at registration.
      return NodeState::Unreachable;
    };
    match run.node_executions.get(dep_id).map(|e| e.status) {
      Some(Completed) => {}
      Some(Failed) => {
        if !has_error_route(dep, &node.node_id) {
          return NodeState::Unreachable;
        }
      }
      _ => {
        // The graph is acyclic, so this recursion terminates.
        match classify(dep, run, definition, states) {
          NodeState::Unreachable => return NodeState::Unreachable,
          _ => blocked = true,
        }
      }
    }
  }
  if blocked {
    return NodeState::Blocked;
  }

  gate_state(node, run, definition)
}

fn has_error_route(source: &NodeDefinition, target: &str) -> bool {
  source
    .transitions
    .iter()
    .any(|t| t.kind == TransitionKind::OnError && t.target == target)
}

/// Evaluate incoming transition guards for a node whose dependencies are all
/// satisfied.
///
/// A node with no incoming transitions is gated open. Otherwise at least one
/// incoming transition must permit it: unconditional from a completed source,
/// conditional from a completed source with a true guard, or error-only from
/// a failed source. When every incoming source is terminal and nothing
/// permits, the node is unreachable in this run.
fn gate_state(
  node: &NodeDefinition,
  run: &WorkflowRun,
  definition: &WorkflowDefinition,
) -> NodeState {
  let incoming: Vec<(&NodeDefinition, &verbena_definition::Transition)> = definition
    .nodes
    .iter()
    .flat_map(|source| {
      source
        .transitions
        .iter()
        .filter(|t| t.target == node.node_id)
        .map(move |t| (source, t))
    })
    .collect();

  if incoming.is_empty() {
    return NodeState::Ready;
  }

  let mut all_sources_terminal = true;
  for (source, transition) in &incoming {
    let source_status = run
      .node_executions
      .get(&source.node_id)
      .map(|e| e.status)
      .unwrap_or(NodeExecutionStatus::Pending);

    if !source_status.is_terminal() {
      all_sources_terminal = false;
      continue;
    }

    let permits = match transition.kind {
      TransitionKind::Unconditional => source_status == NodeExecutionStatus::Completed,
      TransitionKind::Conditional => {
        source_status == NodeExecutionStatus::Completed
          && transition
            .condition
            .as_deref()
            .map(|c| evaluate_condition(c, &run.variables).unwrap_or(false))
            .unwrap_or(false)
      }
      TransitionKind::OnError => source_status == NodeExecutionStatus::Failed,
    };
    if permits {
      return NodeState::Ready;
    }
  }

  if all_sources_terminal {
    NodeState::Unreachable
  } else {
    NodeState::Blocked
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use serde_json::json;
  use verbena_definition::{
    CompensationPolicy, NodeDefinition, RetryPolicy, Transition, WorkflowDefinition,
  };

  use super::*;
  use crate::run::WorkflowRun;

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

  fn definition(nodes: Vec<NodeDefinition>) -> WorkflowDefinition {
    let def = WorkflowDefinition {
      definition_id: "def-1".to_string(),
      tenant: "acme".to_string(),
      name: "test".to_string(),
      version: 1,
      nodes,
      inputs: HashMap::new(),
      outputs: HashMap::new(),
      retry_policy: RetryPolicy::default(),
      compensation: CompensationPolicy::default(),
    };
    def.validate().expect("test definition must be valid");
    def
  }

  fn diamond() -> WorkflowDefinition {
    definition(vec![
      node("a", &[]),
      node("b", &["a"]),
      node("c", &["a"]),
      node("d", &["b", "c"]),
    ])
  }

  fn started_run(def: &WorkflowDefinition) -> WorkflowRun {
    let mut run = WorkflowRun::new("run-1", def, HashMap::new());
    run.start().unwrap();
    run
  }

  fn complete(run: &mut WorkflowRun, node_id: &str) {
    run.mark_node_running(node_id, 1).unwrap();
    run.complete_node(node_id, HashMap::new()).unwrap();
  }

  #[test]
  fn diamond_progression() {
    let def = diamond();
    let mut run = started_run(&def);

    let plan = plan_next_execution(&run, &def);
    assert_eq!(plan.ready_nodes, vec!["a".to_string()]);

    complete(&mut run, "a");
    let mut ready = plan_next_execution(&run, &def).ready_nodes;
    ready.sort();
    assert_eq!(ready, vec!["b".to_string(), "c".to_string()]);

    complete(&mut run, "b");
    complete(&mut run, "c");
    let plan = plan_next_execution(&run, &def);
    assert_eq!(plan.ready_nodes, vec!["d".to_string()]);
    assert!(!plan.is_complete);

    complete(&mut run, "d");
    let plan = plan_next_execution(&run, &def);
    assert!(plan.ready_nodes.is_empty());
    assert!(plan.is_complete);
    assert!(!plan.is_stuck);
  }

  #[test]
  fn running_node_is_not_ready_again() {
    let def = diamond();
    let mut run = started_run(&def);
    run.mark_node_running("a", 1).unwrap();

    let plan = plan_next_execution(&run, &def);
    assert!(plan.ready_nodes.is_empty());
    assert!(!plan.is_complete);
    assert!(!plan.is_stuck);
  }

  #[test]
  fn failed_dependency_makes_downstream_unreachable() {
    let def = diamond();
    let mut run = started_run(&def);
    complete(&mut run, "a");
    run.mark_node_running("b", 1).unwrap();
    run.fail_node("b", "boom").unwrap();
    complete(&mut run, "c");

    let plan = plan_next_execution(&run, &def);
    assert!(plan.ready_nodes.is_empty());
    // d can never run; everything else is terminal.
    assert!(plan.is_complete);
  }

  #[test]
  fn error_transition_routes_around_failure() {
    let mut fail_node_def = node("risky", &["a"]);
    fail_node_def.transitions.push(Transition::on_error("cleanup"));
    let def = definition(vec![
      node("a", &[]),
      fail_node_def,
      node("cleanup", &["risky"]),
    ]);
    let mut run = started_run(&def);
    complete(&mut run, "a");
    run.mark_node_running("risky", 1).unwrap();
    run.fail_node("risky", "boom").unwrap();

    let plan = plan_next_execution(&run, &def);
    assert_eq!(plan.ready_nodes, vec!["cleanup".to_string()]);
  }

  #[test]
  fn conditional_gate_respects_variables() {
    let mut source = node("a", &[]);
    source
      .transitions
      .push(Transition::when("premium", "tier == 'gold'"));
    source.transitions.push(Transition::to("standard"));
    let def = definition(vec![source, node("premium", &["a"]), node("standard", &["a"])]);

    let mut run = WorkflowRun::new(
      "run-1",
      &def,
      HashMap::from([("tier".to_string(), json!("gold"))]),
    );
    run.start().unwrap();
    complete(&mut run, "a");

    let mut ready = plan_next_execution(&run, &def).ready_nodes;
    ready.sort();
    assert_eq!(ready, vec!["premium".to_string(), "standard".to_string()]);
  }

  #[test]
  fn false_conditional_gate_excludes_node_and_allows_completion() {
    let mut source = node("a", &[]);
    source
      .transitions
      .push(Transition::when("premium", "tier == 'gold'"));
    let def = definition(vec![source, node("premium", &["a"])]);

    let mut run = WorkflowRun::new(
      "run-1",
      &def,
      HashMap::from([("tier".to_string(), json!("basic"))]),
    );
    run.start().unwrap();
    complete(&mut run, "a");

    let plan = plan_next_execution(&run, &def);
    assert!(plan.ready_nodes.is_empty());
    assert!(plan.is_complete);
  }

  #[test]
  fn waiting_retry_counts_as_in_flight() {
    let def = diamond();
    let mut run = started_run(&def);
    run.mark_node_running("a", 1).unwrap();
    run
      .mark_node_waiting_retry("a", chrono::Utc::now(), "transient")
      .unwrap();

    let plan = plan_next_execution(&run, &def);
    assert!(plan.ready_nodes.is_empty());
    assert!(!plan.is_stuck);
  }

  #[test]
  fn suspended_run_plans_no_work() {
    let def = diamond();
    let mut run = started_run(&def);
    run.suspend("manual review", None).unwrap();

    let plan = plan_next_execution(&run, &def);
    assert!(plan.ready_nodes.is_empty());
  }
}
