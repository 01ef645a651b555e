//! Verbena History
//!
//! Append-only per-run event log, doubling as the idempotency ledger.
//! The event sequence is the durable source of truth for replay and
//! auditing; the `(run_id, node_id, attempt)` ledger is what guarantees
//! at-most-once effective application of node results under at-least-once
//! delivery.

mod event;
mod history;
mod memory;

pub use event::{ExecutionEvent, ExecutionEventType};
pub use history::{ExecutionHistory, HistoryError};
pub use memory::InMemoryExecutionHistory;
