//! Verbena Engine
//!
//! The execution orchestration core: the run manager applies node results
//! idempotently under per-run mutual exclusion, the orchestrator drives the
//! plan -> select -> dispatch cycle off "result received" and "run updated"
//! signals, and the compensation runner undoes completed work when a run
//! fails unrecoverably.
//!
//! Collaborators (definition registry, run repository, history store,
//! executor registry, dispatch transports) are injected at startup via
//! [`OrchestratorConfig`]; nothing is discovered at runtime.

mod compensation;
mod error;
mod events;
mod manager;
mod orchestrator;
mod result;
mod signal;

pub use compensation::{CompensationOutcome, CompensationRunner};
pub use error::EngineError;
pub use events::{ChannelNotifier, NoopNotifier, RunEvent, RunNotifier};
pub use manager::RunManager;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use result::{NodeOutcome, NodeResult, ResultDisposition};
pub use signal::OrchestratorSignal;
