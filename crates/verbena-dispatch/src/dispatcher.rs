use async_trait::async_trait;
use verbena_registry::ExecutorInfo;

use crate::error::DispatchError;
use crate::task::DispatchTask;

/// Transport-specific task delivery.
///
/// Implementations are registered with the aggregator at startup; there is
/// no runtime discovery. Wire encoding is the implementation's concern, as
/// long as every [`DispatchTask`] field reaches the executor.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
  /// Deliver a task to the executor. A returned error means delivery
  /// failed; execution failures are reported back asynchronously as node
  /// results, not here.
  async fn dispatch(
    &self,
    task: &DispatchTask,
    executor: &ExecutorInfo,
  ) -> Result<(), DispatchError>;

  /// Whether this dispatcher speaks the executor's communication type.
  fn supports(&self, executor: &ExecutorInfo) -> bool;

  /// Transport-level health (connection pool up, broker reachable, ...).
  fn is_healthy(&self) -> bool {
    true
  }

  /// Higher priority wins when several dispatchers support an executor.
  fn priority(&self) -> i32 {
    0
  }
}
