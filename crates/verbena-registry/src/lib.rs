//! Verbena Registry
//!
//! Tracks known executors and their health, and selects one for a node via a
//! pluggable strategy. An executor is healthy iff its last heartbeat is
//! within the staleness threshold (30s by default).
//!
//! The registry's health map and the strategy counters are the only mutable
//! state shared across runs; they carry their own cheap synchronization,
//! independent of the per-run locks.

mod error;
mod executor;
mod monitor;
mod registry;
mod strategy;

pub use error::SelectionError;
pub use executor::{CommunicationType, ExecutorHealthInfo, ExecutorInfo};
pub use monitor::HealthMonitor;
pub use registry::{ExecutorRegistry, HEALTH_THRESHOLD};
pub use strategy::{LeastLoad, Random, RoundRobin, SelectionStrategy};
