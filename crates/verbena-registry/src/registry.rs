use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;
use verbena_definition::NodeDefinition;

use crate::error::SelectionError;
use crate::executor::{ExecutorHealthInfo, ExecutorInfo};
use crate::strategy::SelectionStrategy;

/// Heartbeats older than this exclude an executor from selection.
pub const HEALTH_THRESHOLD: Duration = Duration::from_secs(30);

/// In-memory table of known executors plus per-executor heartbeat state.
///
/// Selection filters to currently healthy executors of the node's executor
/// type and delegates the pick to the configured [`SelectionStrategy`].
pub struct ExecutorRegistry {
  executors: RwLock<HashMap<String, (ExecutorInfo, ExecutorHealthInfo)>>,
  strategy: Arc<dyn SelectionStrategy>,
  threshold: Duration,
}

impl ExecutorRegistry {
  pub fn new(strategy: Arc<dyn SelectionStrategy>) -> Self {
    Self::with_threshold(strategy, HEALTH_THRESHOLD)
  }

  pub fn with_threshold(strategy: Arc<dyn SelectionStrategy>, threshold: Duration) -> Self {
    Self {
      executors: RwLock::new(HashMap::new()),
      strategy,
      threshold,
    }
  }

  /// Register an executor (or refresh its registration). The registration
  /// itself counts as a heartbeat.
  pub fn register(&self, info: ExecutorInfo) {
    info!(executor_id = %info.executor_id, executor_type = %info.executor_type, "executor registered");
    let health = ExecutorHealthInfo {
      last_heartbeat: Utc::now(),
    };
    self
      .executors
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .insert(info.executor_id.clone(), (info, health));
  }

  pub fn deregister(&self, executor_id: &str) {
    self
      .executors
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .remove(executor_id);
  }

  /// Record a heartbeat with the current time.
  pub fn heartbeat(&self, executor_id: &str) -> Result<(), SelectionError> {
    self.heartbeat_at(executor_id, Utc::now())
  }

  /// Record a heartbeat observed at `when`.
  pub fn heartbeat_at(
    &self,
    executor_id: &str,
    when: DateTime<Utc>,
  ) -> Result<(), SelectionError> {
    let mut executors = self.executors.write().unwrap_or_else(|e| e.into_inner());
    let (_, health) = executors
      .get_mut(executor_id)
      .ok_or_else(|| SelectionError::UnknownExecutor {
        executor_id: executor_id.to_string(),
      })?;
    health.last_heartbeat = when;
    Ok(())
  }

  fn is_healthy(&self, health: &ExecutorHealthInfo, now: DateTime<Utc>) -> bool {
    (now - health.last_heartbeat).to_std().map_or(true, |age| age <= self.threshold)
  }

  /// Executors whose last heartbeat is within the staleness threshold.
  pub fn get_healthy_executors(&self) -> Vec<ExecutorInfo> {
    self.healthy_executors_at(Utc::now())
  }

  pub fn healthy_executors_at(&self, now: DateTime<Utc>) -> Vec<ExecutorInfo> {
    self
      .executors
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .values()
      .filter(|(_, health)| self.is_healthy(health, now))
      .map(|(info, _)| info.clone())
      .collect()
  }

  /// Executors past the staleness threshold, for the health monitor sweep.
  pub fn stale_executors_at(&self, now: DateTime<Utc>) -> Vec<(ExecutorInfo, ExecutorHealthInfo)> {
    self
      .executors
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .values()
      .filter(|(_, health)| !self.is_healthy(health, now))
      .cloned()
      .collect()
  }

  /// Select a healthy executor for a node via the configured strategy.
  ///
  /// The strategy's in-flight accounting is updated on selection; callers
  /// must pair it with [`task_finished`] when the node's result arrives.
  ///
  /// [`task_finished`]: ExecutorRegistry::task_finished
  pub fn executor_for_node(&self, node: &NodeDefinition) -> Result<ExecutorInfo, SelectionError> {
    let now = Utc::now();
    let candidates: Vec<ExecutorInfo> = {
      let executors = self.executors.read().unwrap_or_else(|e| e.into_inner());
      let mut candidates: Vec<ExecutorInfo> = executors
        .values()
        .filter(|(info, health)| {
          info.executor_type == node.executor_type && self.is_healthy(health, now)
        })
        .map(|(info, _)| info.clone())
        .collect();
      // Stable order so cursor-based strategies see a consistent list.
      candidates.sort_by(|a, b| a.executor_id.cmp(&b.executor_id));
      candidates
    };

    let selected =
      self
        .strategy
        .select(&candidates)
        .ok_or_else(|| SelectionError::NoHealthyExecutor {
          node_id: node.node_id.clone(),
          executor_type: node.executor_type.clone(),
        })?;
    self.strategy.on_dispatched(&selected.executor_id);
    Ok(selected)
  }

  /// Release the strategy's in-flight slot for an executor.
  pub fn task_finished(&self, executor_id: &str) {
    self.strategy.on_finished(executor_id);
  }
}
