use std::time::Duration;

use thiserror::Error;

/// Errors from the queue/lock backing store. All of these are transient from
/// the caller's point of view: the job stays recoverable and the operation
/// can be retried on a later tick.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

/// Per-job processing failures. These are caught at the orchestrator and
/// drive the retry/fallback/fail decision; they never propagate past the
/// worker loop.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("document {0} not found")]
    DocumentNotFound(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("text extraction failed: {0}")]
    Extraction(String),
    #[error("unknown document type `{0}`")]
    UnknownDocumentType(String),
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error("escalation failed: {0}")]
    Escalation(String),
}

impl ProcessError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DocumentNotFound(_) => "DOCUMENT_NOT_FOUND",
            Self::Download(_) => "DOWNLOAD_FAILURE",
            Self::Extraction(_) => "EXTRACTION_FAILURE",
            Self::UnknownDocumentType(_) => "UNKNOWN_DOCUMENT_TYPE",
            Self::Persistence(_) => "PERSISTENCE_FAILURE",
            Self::Escalation(_) => "ESCALATION_FAILURE",
        }
    }
}

/// Fail-fast signal raised by a circuit breaker when no fallback is supplied.
#[derive(Debug, Clone, Error)]
#[error("circuit `{name}` is open")]
pub struct CircuitOpen {
    pub name: String,
}

/// Terminal review-workflow outcomes. Compensation runs before these are
/// re-raised to whatever started the workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("review timed out after {0:?}")]
    Timeout(Duration),
    #[error("review cancelled: {0}")]
    Cancelled(String),
    #[error("workflow internal error: {0}")]
    Internal(String),
}
