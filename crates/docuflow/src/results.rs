//! Terminal per-job events. The orchestrator publishes exactly one event per
//! completed cycle; subscribers (the worker binary's result logger, tests)
//! attach via `tokio::sync::broadcast`.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub document_id: String,
    pub correlation_id: Uuid,
    pub success: bool,
    pub gpu_processed: bool,
    pub score: Option<i32>,
    pub decision: Option<String>,
    /// "completed", "requeued" or "failed".
    pub outcome: Option<String>,
    pub error: Option<String>,
}

pub type ResultSender = broadcast::Sender<JobResult>;
pub type ResultReceiver = broadcast::Receiver<JobResult>;

pub fn result_channel(capacity: usize) -> (ResultSender, ResultReceiver) {
    broadcast::channel(capacity)
}
