//! Run persistence contract and the per-run lock manager.
//!
//! The core needs exactly three things from storage: load a run, insert a
//! run, update a run. Storage technology is the collaborator's choice; the
//! in-memory implementation here backs tests and the reference binary.
//!
//! Mutual exclusion is not the repository's job: the [`RunLockManager`]
//! serializes all mutations to one run, and the lock is held only across
//! load -> mutate -> persist, never across outbound dispatch I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::run::WorkflowRun;

/// Error type for run storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("run not found: {run_id}")]
  NotFound { run_id: String },

  #[error("run already exists: {run_id}")]
  AlreadyExists { run_id: String },

  #[error("storage backend error: {message}")]
  Backend { message: String },
}

/// Storage contract for run aggregates.
#[async_trait]
pub trait RunRepository: Send + Sync {
  async fn find_by_id(&self, run_id: &str) -> Result<WorkflowRun, StoreError>;

  async fn insert(&self, run: &WorkflowRun) -> Result<(), StoreError>;

  async fn update(&self, run: &WorkflowRun) -> Result<(), StoreError>;
}

/// In-memory run repository.
#[derive(Default)]
pub struct InMemoryRunRepository {
  runs: RwLock<HashMap<String, WorkflowRun>>,
}

impl InMemoryRunRepository {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
  async fn find_by_id(&self, run_id: &str) -> Result<WorkflowRun, StoreError> {
    self
      .runs
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .get(run_id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound {
        run_id: run_id.to_string(),
      })
  }

  async fn insert(&self, run: &WorkflowRun) -> Result<(), StoreError> {
    let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
    if runs.contains_key(&run.run_id) {
      return Err(StoreError::AlreadyExists {
        run_id: run.run_id.clone(),
      });
    }
    runs.insert(run.run_id.clone(), run.clone());
    Ok(())
  }

  async fn update(&self, run: &WorkflowRun) -> Result<(), StoreError> {
    let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
    if !runs.contains_key(&run.run_id) {
      return Err(StoreError::NotFound {
        run_id: run.run_id.clone(),
      });
    }
    runs.insert(run.run_id.clone(), run.clone());
    Ok(())
  }
}

/// Hands out one async mutex per run id.
///
/// All mutations to a run's aggregate are serialized through its lock, which
/// makes concurrent fan-out safe: updates interleave but never race.
#[derive(Default, Clone)]
pub struct RunLockManager {
  locks: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl RunLockManager {
  pub fn new() -> Self {
    Self::default()
  }

  /// Acquire the exclusive lock for a run.
  ///
  /// The guard must be dropped before any outbound I/O is awaited.
  pub async fn lock(&self, run_id: &str) -> OwnedMutexGuard<()> {
    let lock = {
      let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
      locks
        .entry(run_id.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
    };
    lock.lock_owned().await
  }

  /// Drop the lock entry for a run that reached a terminal state.
  pub fn release(&self, run_id: &str) {
    self
      .locks
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .remove(run_id);
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use verbena_definition::{
    CompensationPolicy, NodeDefinition, RetryPolicy, WorkflowDefinition,
  };

  use super::*;

  fn definition() -> WorkflowDefinition {
    WorkflowDefinition {
      definition_id: "def-1".to_string(),
      tenant: "acme".to_string(),
      name: "test".to_string(),
      version: 1,
      nodes: vec![NodeDefinition {
        node_id: "a".to_string(),
        name: "a".to_string(),
        node_type: "task".to_string(),
        executor_type: "generic".to_string(),
        config: HashMap::new(),
        depends_on: Vec::new(),
        transitions: Vec::new(),
        retry_policy: None,
        timeout_ms: None,
        critical: false,
      }],
      inputs: HashMap::new(),
      outputs: HashMap::new(),
      retry_policy: RetryPolicy::default(),
      compensation: CompensationPolicy::default(),
    }
  }

  #[tokio::test]
  async fn insert_then_find_round_trips() {
    let repo = InMemoryRunRepository::new();
    let run = WorkflowRun::new("run-1", &definition(), HashMap::new());
    repo.insert(&run).await.unwrap();

    let loaded = repo.find_by_id("run-1").await.unwrap();
    assert_eq!(loaded.run_id, "run-1");
  }

  #[tokio::test]
  async fn double_insert_is_rejected() {
    let repo = InMemoryRunRepository::new();
    let run = WorkflowRun::new("run-1", &definition(), HashMap::new());
    repo.insert(&run).await.unwrap();
    assert!(matches!(
      repo.insert(&run).await,
      Err(StoreError::AlreadyExists { .. })
    ));
  }

  #[tokio::test]
  async fn update_requires_existing_run() {
    let repo = InMemoryRunRepository::new();
    let run = WorkflowRun::new("run-1", &definition(), HashMap::new());
    assert!(matches!(
      repo.update(&run).await,
      Err(StoreError::NotFound { .. })
    ));
  }

  #[tokio::test]
  async fn lock_serializes_critical_sections() {
    let locks = RunLockManager::new();
    let counter = Arc::new(StdMutex::new(0u32));

    let mut handles = Vec::new();
    for _ in 0..16 {
      let locks = locks.clone();
      let counter = counter.clone();
      handles.push(tokio::spawn(async move {
        let _guard = locks.lock("run-1").await;
        let mut value = counter.lock().unwrap();
        *value += 1;
      }));
    }
    for handle in handles {
      handle.await.unwrap();
    }

    assert_eq!(*counter.lock().unwrap(), 16);
  }
}
