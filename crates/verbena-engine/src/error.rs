use thiserror::Error;

use verbena_definition::RegistryError;
use verbena_dispatch::{DispatchError, TokenError};
use verbena_history::HistoryError;
use verbena_registry::SelectionError;
use verbena_run::{RunError, StoreError};

/// Umbrella error for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error(transparent)]
  Definition(#[from] RegistryError),

  #[error(transparent)]
  Run(#[from] RunError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  History(#[from] HistoryError),

  #[error(transparent)]
  Dispatch(#[from] DispatchError),

  #[error(transparent)]
  Selection(#[from] SelectionError),

  #[error(transparent)]
  Token(#[from] TokenError),

  #[error("orchestrator signal channel closed")]
  SignalChannelClosed,
}
