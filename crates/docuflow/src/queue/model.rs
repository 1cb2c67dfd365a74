use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One document's queue row. The status column is the single source of truth
/// for which logical structure the document belongs to, so a document can
/// never be in two of them at once.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueuedJob {
    pub document_id: String,
    pub document_type: String,
    pub correlation_id: Uuid,
    pub status: String,
    pub attempts: i32,
    pub queue_pos: i64,
    pub enqueued_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Processing,
    Delayed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Delayed => "delayed",
        }
    }
}
