use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::types::{DocumentType, ParsedFields, ScoreOutcome};

/// Document row as seen through the persistence collaborator. Storage schema
/// and querying belong to the surrounding system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub user_id: String,
    pub document_type: String,
    pub storage_key: String,
    pub status: String,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentUpdate {
    pub status: Option<String>,
    pub verification_status: Option<String>,
    pub ai_score: Option<i32>,
    pub ai_decision: Option<String>,
    pub result_json: Option<serde_json::Value>,
    pub ocr_text: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReview {
    pub review_id: String,
    pub document_id: String,
    pub user_id: String,
    pub status: String,
    pub schema_version: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub review_id: String,
    pub document_id: String,
    pub user_id: String,
    pub status: String,
    pub decision: Option<String>,
    pub notes: Option<String>,
    pub decided_by: Option<String>,
    pub external_task_id: Option<String>,
    pub schema_version: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewUpdate {
    pub status: Option<String>,
    pub decision: Option<String>,
    pub notes: Option<String>,
    pub decided_by: Option<String>,
    pub external_task_id: Option<String>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, id: &str) -> anyhow::Result<Option<DocumentRecord>>;
    async fn update_document(&self, id: &str, update: DocumentUpdate) -> anyhow::Result<()>;
    async fn insert_review(&self, review: NewReview) -> anyhow::Result<()>;
    async fn get_review(&self, review_id: &str) -> anyhow::Result<Option<ReviewRecord>>;
    async fn update_review(&self, review_id: &str, update: ReviewUpdate) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn download(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Whether the GPU path is currently usable at all.
    fn gpu_available(&self) -> bool;
    async fn extract_text(&self, data: &[u8], use_gpu: bool) -> anyhow::Result<String>;
}

/// Pure, type-specific field extraction.
pub trait FieldParser: Send + Sync {
    fn parse(&self, document_type: DocumentType, text: &str) -> ParsedFields;
}

/// Pure scoring heuristic over parsed fields and raw text.
pub trait Scorer: Send + Sync {
    fn score(&self, document_type: DocumentType, fields: &ParsedFields, text: &str)
        -> ScoreOutcome;
}

/// Everything the external review service needs to open a human review task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewTaskPayload {
    pub review_id: String,
    pub document_id: String,
    pub user_id: String,
    pub document_type: DocumentType,
    pub parsed_fields: serde_json::Value,
    pub ocr_text: String,
    pub ai_score: i32,
    pub ai_decision: String,
    pub ai_reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewTaskCreated {
    pub task_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewTaskState {
    pub status: String,
    pub decision: Option<String>,
    pub notes: Option<String>,
}

#[async_trait]
pub trait ReviewService: Send + Sync {
    async fn create_review_task(
        &self,
        payload: &ReviewTaskPayload,
    ) -> anyhow::Result<ReviewTaskCreated>;

    async fn get_review_task_status(&self, task_id: &str) -> anyhow::Result<ReviewTaskState>;

    /// Optional completion sync back to the external system.
    async fn sync_completion(&self, _task_id: &str, _decision: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Best-effort cancellation of the external task.
    async fn cancel_review_task(&self, _task_id: &str, _reason: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, recipient: &str, kind: &str, message: &str) -> anyhow::Result<()>;
}

/// Starts a review-workflow instance for an escalated document. The worker
/// binary routes this to the workflow registry; tests record the launches.
#[async_trait]
pub trait ReviewLauncher: Send + Sync {
    async fn launch(&self, payload: ReviewTaskPayload) -> anyhow::Result<()>;
}
