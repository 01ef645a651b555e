//! Definition validation.
//!
//! Runs once at registration time. The checks are independent so each failure
//! maps to a specific [`ValidationError`] variant.

use std::collections::{HashMap, HashSet};

use crate::definition::WorkflowDefinition;
use crate::error::ValidationError;

pub(crate) fn validate(def: &WorkflowDefinition) -> Result<(), ValidationError> {
  check_unique_node_ids(def)?;
  check_start_node(def)?;
  check_references(def)?;
  check_no_cycles(def)?;
  check_io_keys(def)?;
  check_retry_policies(def)?;
  Ok(())
}

fn check_unique_node_ids(def: &WorkflowDefinition) -> Result<(), ValidationError> {
  let mut seen = HashSet::new();
  for node in &def.nodes {
    if !seen.insert(node.node_id.as_str()) {
      return Err(ValidationError::DuplicateNodeId {
        node_id: node.node_id.clone(),
      });
    }
  }
  Ok(())
}

fn check_start_node(def: &WorkflowDefinition) -> Result<(), ValidationError> {
  if def.nodes.iter().any(|n| n.depends_on.is_empty()) {
    Ok(())
  } else {
    Err(ValidationError::NoStartNode)
  }
}

/// Every `depends_on` entry and transition target must resolve, and
/// conditional transitions must carry a condition.
fn check_references(def: &WorkflowDefinition) -> Result<(), ValidationError> {
  let ids: HashSet<&str> = def.nodes.iter().map(|n| n.node_id.as_str()).collect();

  for node in &def.nodes {
    for dep in &node.depends_on {
      if !ids.contains(dep.as_str()) {
        return Err(ValidationError::UnknownDependency {
          node_id: node.node_id.clone(),
          dependency: dep.clone(),
        });
      }
    }
    for transition in &node.transitions {
      if !ids.contains(transition.target.as_str()) {
        return Err(ValidationError::UnknownTransitionTarget {
          node_id: node.node_id.clone(),
          target: transition.target.clone(),
        });
      }
      if transition.kind == crate::node::TransitionKind::Conditional
        && transition.condition.is_none()
      {
        return Err(ValidationError::MissingCondition {
          node_id: node.node_id.clone(),
          target: transition.target.clone(),
        });
      }
    }
  }
  Ok(())
}

/// Depth-first cycle detection over dependency edges.
///
/// A node already on the recursion stack signals a cycle.
fn check_no_cycles(def: &WorkflowDefinition) -> Result<(), ValidationError> {
  let deps: HashMap<&str, &[String]> = def
    .nodes
    .iter()
    .map(|n| (n.node_id.as_str(), n.depends_on.as_slice()))
    .collect();

  let mut visited: HashSet<&str> = HashSet::new();
  let mut on_stack: HashSet<&str> = HashSet::new();

  fn visit<'a>(
    node_id: &'a str,
    deps: &HashMap<&'a str, &'a [String]>,
    visited: &mut HashSet<&'a str>,
    on_stack: &mut HashSet<&'a str>,
  ) -> Result<(), ValidationError> {
    if on_stack.contains(node_id) {
      return Err(ValidationError::CycleDetected {
        node_id: node_id.to_string(),
      });
    }
    if !visited.insert(node_id) {
      return Ok(());
    }
    on_stack.insert(node_id);
    if let Some(node_deps) = deps.get(node_id) {
      for dep in node_deps.iter() {
        visit(dep, deps, visited, on_stack)?;
      }
    }
    on_stack.remove(node_id);
    Ok(())
  }

  for node in &def.nodes {
    visit(&node.node_id, &deps, &mut visited, &mut on_stack)?;
  }
  Ok(())
}

fn check_io_keys(def: &WorkflowDefinition) -> Result<(), ValidationError> {
  if def.inputs.keys().any(|k| k.is_empty()) {
    return Err(ValidationError::EmptyIoKey { kind: "input" });
  }
  if def.outputs.keys().any(|k| k.is_empty()) {
    return Err(ValidationError::EmptyIoKey { kind: "output" });
  }
  Ok(())
}

fn check_retry_policies(def: &WorkflowDefinition) -> Result<(), ValidationError> {
  if !def.retry_policy.in_bounds() {
    return Err(ValidationError::RetryPolicyOutOfBounds {
      scope: "definition".to_string(),
    });
  }
  for node in &def.nodes {
    if let Some(policy) = &node.retry_policy {
      if !policy.in_bounds() {
        return Err(ValidationError::RetryPolicyOutOfBounds {
          scope: node.node_id.clone(),
        });
      }
    }
  }
  Ok(())
}
