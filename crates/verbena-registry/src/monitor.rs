//! Periodic executor health sweep.
//!
//! Selection already excludes stale executors by timestamp; the monitor's
//! job is observability: it logs executors that went quiet so operators see
//! capacity loss before runs start failing to schedule.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::ExecutorRegistry;

/// Fixed-interval sweep over the executor health map.
pub struct HealthMonitor {
  registry: Arc<ExecutorRegistry>,
  interval: Duration,
}

impl HealthMonitor {
  pub fn new(registry: Arc<ExecutorRegistry>) -> Self {
    Self::with_interval(registry, Duration::from_secs(10))
  }

  pub fn with_interval(registry: Arc<ExecutorRegistry>, interval: Duration) -> Self {
    Self { registry, interval }
  }

  /// Run the sweep loop until cancelled.
  pub async fn run(self, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(self.interval);
    info!(interval_secs = self.interval.as_secs(), "health monitor started");

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("health monitor stopped");
          break;
        }
        _ = ticker.tick() => {
          self.sweep();
        }
      }
    }
  }

  fn sweep(&self) {
    let now = Utc::now();
    for (info, health) in self.registry.stale_executors_at(now) {
      warn!(
        executor_id = %info.executor_id,
        executor_type = %info.executor_type,
        last_heartbeat = %health.last_heartbeat,
        "executor heartbeat is stale; excluded from selection"
      );
    }
  }
}
