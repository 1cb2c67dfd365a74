//! Concrete collaborators behind the library's pipeline traits: Postgres
//! persistence, filesystem object storage, a dev OCR engine and the HTTP
//! review service client.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::{info, warn};

use docuflow::escalation::EscalationOutbox;
use docuflow::pipeline::traits::{
    DocumentRecord, DocumentStore, DocumentUpdate, NewReview, NotificationSink, ObjectStorage,
    OcrEngine, ReviewLauncher, ReviewRecord, ReviewService, ReviewTaskCreated, ReviewTaskPayload,
    ReviewTaskState, ReviewUpdate,
};
use docuflow::workflow::{
    ReviewWorkflow, ReviewWorkflowConfig, ReviewWorkflowDeps, ReviewWorkflowInput,
    WorkflowFeatures, WorkflowRegistry,
};

pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get_document(&self, id: &str) -> anyhow::Result<Option<DocumentRecord>> {
        let row = sqlx::query(
            "SELECT id, user_id, document_type, storage_key, status FROM documents WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| DocumentRecord {
            id: row.get("id"),
            user_id: row.get("user_id"),
            document_type: row.get("document_type"),
            storage_key: row.get("storage_key"),
            status: row.get("status"),
        }))
    }

    async fn update_document(&self, id: &str, update: DocumentUpdate) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET status              = COALESCE($2, status),
                verification_status = COALESCE($3, verification_status),
                ai_score            = COALESCE($4, ai_score),
                ai_decision         = COALESCE($5, ai_decision),
                result_json         = COALESCE($6, result_json),
                ocr_text            = COALESCE($7, ocr_text),
                processed_at        = COALESCE($8, processed_at)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.status)
        .bind(update.verification_status)
        .bind(update.ai_score)
        .bind(update.ai_decision)
        .bind(update.result_json)
        .bind(update.ocr_text)
        .bind(update.processed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_review(&self, review: NewReview) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO document_reviews (review_id, document_id, user_id, status, schema_version)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(review.review_id)
        .bind(review.document_id)
        .bind(review.user_id)
        .bind(review.status)
        .bind(review.schema_version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_review(&self, review_id: &str) -> anyhow::Result<Option<ReviewRecord>> {
        let row = sqlx::query(
            r#"
            SELECT review_id, document_id, user_id, status, decision, notes, decided_by,
                   external_task_id, schema_version
            FROM document_reviews
            WHERE review_id = $1
            "#,
        )
        .bind(review_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ReviewRecord {
            review_id: row.get("review_id"),
            document_id: row.get("document_id"),
            user_id: row.get("user_id"),
            status: row.get("status"),
            decision: row.get("decision"),
            notes: row.get("notes"),
            decided_by: row.get("decided_by"),
            external_task_id: row.get("external_task_id"),
            schema_version: row.get("schema_version"),
        }))
    }

    async fn update_review(&self, review_id: &str, update: ReviewUpdate) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE document_reviews
            SET status           = COALESCE($2, status),
                decision         = COALESCE($3, decision),
                notes            = COALESCE($4, notes),
                decided_by       = COALESCE($5, decided_by),
                external_task_id = COALESCE($6, external_task_id),
                updated_at       = now()
            WHERE review_id = $1
            "#,
        )
        .bind(review_id)
        .bind(update.status)
        .bind(update.decision)
        .bind(update.notes)
        .bind(update.decided_by)
        .bind(update.external_task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub struct FsObjectStorage {
    root: PathBuf,
}

impl FsObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn download(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.root.join(key);
        Ok(tokio::fs::read(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read {}: {e}", path.display()))?)
    }
}

/// Development OCR engine. Treats stored objects as UTF-8 text; the GPU flag
/// only gates which "path" the call reports. `auto_fallback` lets a GPU
/// request proceed on the CPU path when the GPU is disabled, instead of
/// erroring.
pub struct DevOcrEngine {
    gpu_enabled: bool,
    auto_fallback: bool,
}

impl DevOcrEngine {
    pub fn new(gpu_enabled: bool, auto_fallback: bool) -> Self {
        Self {
            gpu_enabled,
            auto_fallback,
        }
    }
}

#[async_trait]
impl OcrEngine for DevOcrEngine {
    fn gpu_available(&self) -> bool {
        self.gpu_enabled
    }

    async fn extract_text(&self, data: &[u8], use_gpu: bool) -> anyhow::Result<String> {
        if use_gpu && !self.gpu_enabled && !self.auto_fallback {
            anyhow::bail!("gpu path requested but gpu is disabled");
        }
        Ok(String::from_utf8(data.to_vec())
            .map_err(|e| anyhow::anyhow!("document is not utf-8 text: {e}"))?)
    }
}

/// HTTP client for the external human-review service.
pub struct HttpReviewService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReviewService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ReviewService for HttpReviewService {
    async fn create_review_task(
        &self,
        payload: &ReviewTaskPayload,
    ) -> anyhow::Result<ReviewTaskCreated> {
        let created = self
            .client
            .post(format!("{}/tasks", self.base_url))
            .json(payload)
            .send()
            .await?
            .error_for_status()?
            .json::<ReviewTaskCreated>()
            .await?;
        Ok(created)
    }

    async fn get_review_task_status(&self, task_id: &str) -> anyhow::Result<ReviewTaskState> {
        let state = self
            .client
            .get(format!("{}/tasks/{task_id}", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json::<ReviewTaskState>()
            .await?;
        Ok(state)
    }

    async fn sync_completion(&self, task_id: &str, decision: &str) -> anyhow::Result<()> {
        self.client
            .post(format!("{}/tasks/{task_id}/complete", self.base_url))
            .json(&serde_json::json!({ "decision": decision }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn cancel_review_task(&self, task_id: &str, reason: &str) -> anyhow::Result<()> {
        self.client
            .post(format!("{}/tasks/{task_id}/cancel", self.base_url))
            .json(&serde_json::json!({ "reason": reason }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Notification sink for environments without a real messaging channel.
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn notify(&self, recipient: &str, kind: &str, message: &str) -> anyhow::Result<()> {
        info!(recipient, kind, message, "notification");
        Ok(())
    }
}

/// Launches a review workflow per escalated document and keeps its handle in
/// the registry until the instance finishes.
pub struct WorkflowLauncher {
    registry: Arc<WorkflowRegistry>,
    deps: ReviewWorkflowDeps,
    cfg: ReviewWorkflowConfig,
}

impl WorkflowLauncher {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        store: Arc<dyn DocumentStore>,
        outbox: Arc<dyn EscalationOutbox>,
        review: Arc<dyn ReviewService>,
        notifier: Arc<dyn NotificationSink>,
        cfg: ReviewWorkflowConfig,
    ) -> Self {
        Self {
            registry,
            deps: ReviewWorkflowDeps {
                store,
                outbox,
                review,
                notifier,
            },
            cfg,
        }
    }
}

#[async_trait]
impl ReviewLauncher for WorkflowLauncher {
    async fn launch(&self, payload: ReviewTaskPayload) -> anyhow::Result<()> {
        let review_id = payload.review_id.clone();
        let (handle, join) = ReviewWorkflow::spawn(
            self.deps.clone(),
            ReviewWorkflowInput {
                payload,
                schema_version: WorkflowFeatures::CURRENT_VERSION,
            },
            self.cfg.clone(),
        );
        self.registry.register(handle);

        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            match join.await {
                Ok(Ok(out)) => info!(
                    review_id = %out.review_id,
                    decision = ?out.decision,
                    "review workflow finished"
                ),
                Ok(Err(err)) => warn!(review_id = %review_id, error = %err, "review workflow ended with error"),
                Err(err) => warn!(review_id = %review_id, error = %err, "review workflow task panicked"),
            }
            registry.remove(&review_id);
        });
        Ok(())
    }
}
