//! Verbena Run
//!
//! This crate provides the run aggregate and the execution planner.
//! A run is one execution instance of a workflow definition: per-node
//! execution state, merged variables, and the ordered execution path.
//!
//! Runs are mutated exclusively through [`WorkflowRun`] methods, invoked by
//! the run manager under a per-run lock. The planner is a pure function of
//! (run, definition) and decides which nodes are ready next.

mod condition;
mod error;
mod node_execution;
mod planner;
mod repository;
mod run;
mod status;

pub use condition::{evaluate_condition, ConditionError};
pub use error::RunError;
pub use node_execution::{NodeExecution, NodeExecutionStatus};
pub use planner::{plan_next_execution, ExecutionPlan};
pub use repository::{InMemoryRunRepository, RunLockManager, RunRepository, StoreError};
pub use run::WorkflowRun;
pub use status::RunStatus;
