use thiserror::Error;

#[derive(Debug, Error)]
pub enum SelectionError {
  #[error("no healthy executor of type '{executor_type}' for node '{node_id}'")]
  NoHealthyExecutor { node_id: String, executor_type: String },

  #[error("unknown executor: {executor_id}")]
  UnknownExecutor { executor_id: String },
}
