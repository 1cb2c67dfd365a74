pub mod breaker;
pub mod config;
pub mod db;
pub mod errors;
pub mod escalation;
pub mod orchestrator;
pub mod pipeline;
pub mod queue;
pub mod reaper;
pub mod results;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::Config;
pub use errors::{CircuitOpen, ProcessError, QueueError, WorkflowError};
pub use queue::{JobQueue, ProcessingLock};
pub use results::JobResult;
