use std::sync::Arc;

use tracing::debug;
use verbena_registry::ExecutorInfo;

use crate::dispatcher::TaskDispatcher;
use crate::error::DispatchError;
use crate::task::DispatchTask;

/// Routes each dispatch to the right transport.
///
/// Dispatchers are supplied once at construction and sorted descending by
/// priority; each dispatch call picks the first healthy one whose
/// `supports()` matches the target executor. No match is an immediate
/// error; there is no silent fallback.
pub struct DispatcherAggregator {
  dispatchers: Vec<Arc<dyn TaskDispatcher>>,
}

impl DispatcherAggregator {
  pub fn new(mut dispatchers: Vec<Arc<dyn TaskDispatcher>>) -> Self {
    dispatchers.sort_by_key(|d| std::cmp::Reverse(d.priority()));
    Self { dispatchers }
  }

  /// Dispatch a task to an executor over the best matching transport.
  pub async fn dispatch(
    &self,
    task: &DispatchTask,
    executor: &ExecutorInfo,
  ) -> Result<(), DispatchError> {
    let dispatcher = self
      .dispatchers
      .iter()
      .find(|d| d.is_healthy() && d.supports(executor))
      .ok_or(DispatchError::NoSuitableDispatcher {
        communication_type: executor.communication_type,
      })?;

    debug!(
      run_id = %task.run_id,
      node_id = %task.node_id,
      attempt = task.attempt,
      executor_id = %executor.executor_id,
      compensation = task.compensation,
      "dispatching task"
    );
    dispatcher.dispatch(task, executor).await
  }
}
