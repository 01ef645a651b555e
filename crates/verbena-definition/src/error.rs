use thiserror::Error;

/// A malformed workflow definition, rejected at registration time.
///
/// Validation errors never reach the execution path.
#[derive(Debug, Error)]
pub enum ValidationError {
  #[error("definition has no start node (every node has dependencies)")]
  NoStartNode,

  #[error("circular dependency detected at node '{node_id}'")]
  CycleDetected { node_id: String },

  #[error("node '{node_id}' depends on unknown node '{dependency}'")]
  UnknownDependency { node_id: String, dependency: String },

  #[error("node '{node_id}' has a transition to unknown node '{target}'")]
  UnknownTransitionTarget { node_id: String, target: String },

  #[error("duplicate node id '{node_id}'")]
  DuplicateNodeId { node_id: String },

  #[error("conditional transition from '{node_id}' to '{target}' has no condition")]
  MissingCondition { node_id: String, target: String },

  #[error("{kind} definition has an empty key")]
  EmptyIoKey { kind: &'static str },

  #[error(
    "retry policy out of bounds on '{scope}': max_attempts must be 1..=10, \
     backoff_multiplier must be 1.0..=10.0"
  )]
  RetryPolicyOutOfBounds { scope: String },
}
