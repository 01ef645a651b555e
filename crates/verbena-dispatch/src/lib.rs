//! Verbena Dispatch
//!
//! Delivers node work to executors. The [`TaskDispatcher`] contract is
//! transport-agnostic; implementations (gRPC, Kafka, REST, in-process bus)
//! register with the [`DispatcherAggregator`], which routes each dispatch to
//! the highest-priority healthy dispatcher supporting the target executor's
//! communication type.
//!
//! Every dispatch attempt carries a freshly minted single-use
//! [`ExecutionToken`] and an HMAC-SHA256 signature binding the task to the
//! shared dispatch secret.

mod aggregator;
mod dispatcher;
mod error;
mod in_process;
mod signature;
mod task;
mod token;

pub use aggregator::DispatcherAggregator;
pub use dispatcher::TaskDispatcher;
pub use error::DispatchError;
pub use in_process::InProcessDispatcher;
pub use signature::TaskSigner;
pub use task::DispatchTask;
pub use token::{ExecutionToken, TokenError, TokenIssuer};
