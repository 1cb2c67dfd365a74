//! In-memory collaborator doubles for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::errors::ProcessError;
use crate::escalation::{EscalationOutbox, EscalationResult};
use crate::pipeline::traits::{
    DocumentRecord, DocumentStore, DocumentUpdate, NewReview, NotificationSink, ObjectStorage,
    OcrEngine, ReviewLauncher, ReviewRecord, ReviewService, ReviewTaskCreated, ReviewTaskPayload,
    ReviewTaskState, ReviewUpdate,
};
use crate::pipeline::types::DocumentType;

#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, DocumentRecord>>,
    reviews: Mutex<HashMap<String, ReviewRecord>>,
}

impl MemoryStore {
    pub fn with_document(id: &str, user_id: &str, document_type: &str, storage_key: &str) -> Self {
        let store = Self::default();
        store.docs.lock().unwrap().insert(
            id.to_string(),
            DocumentRecord {
                id: id.to_string(),
                user_id: user_id.to_string(),
                document_type: document_type.to_string(),
                storage_key: storage_key.to_string(),
                status: "uploaded".to_string(),
            },
        );
        store
    }

    pub fn document(&self, id: &str) -> Option<DocumentRecord> {
        self.docs.lock().unwrap().get(id).cloned()
    }

    pub fn review(&self, review_id: &str) -> Option<ReviewRecord> {
        self.reviews.lock().unwrap().get(review_id).cloned()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_document(&self, id: &str) -> anyhow::Result<Option<DocumentRecord>> {
        Ok(self.docs.lock().unwrap().get(id).cloned())
    }

    async fn update_document(&self, id: &str, update: DocumentUpdate) -> anyhow::Result<()> {
        if let Some(doc) = self.docs.lock().unwrap().get_mut(id) {
            if let Some(status) = update.status {
                doc.status = status;
            }
        }
        Ok(())
    }

    async fn insert_review(&self, review: NewReview) -> anyhow::Result<()> {
        self.reviews.lock().unwrap().insert(
            review.review_id.clone(),
            ReviewRecord {
                review_id: review.review_id,
                document_id: review.document_id,
                user_id: review.user_id,
                status: review.status,
                decision: None,
                notes: None,
                decided_by: None,
                external_task_id: None,
                schema_version: review.schema_version,
            },
        );
        Ok(())
    }

    async fn get_review(&self, review_id: &str) -> anyhow::Result<Option<ReviewRecord>> {
        Ok(self.reviews.lock().unwrap().get(review_id).cloned())
    }

    async fn update_review(&self, review_id: &str, update: ReviewUpdate) -> anyhow::Result<()> {
        if let Some(review) = self.reviews.lock().unwrap().get_mut(review_id) {
            if let Some(status) = update.status {
                review.status = status;
            }
            if update.decision.is_some() {
                review.decision = update.decision;
            }
            if update.notes.is_some() {
                review.notes = update.notes;
            }
            if update.decided_by.is_some() {
                review.decided_by = update.decided_by;
            }
            if update.external_task_id.is_some() {
                review.external_task_id = update.external_task_id;
            }
        }
        Ok(())
    }
}

/// Store double whose review updates error as soon as a decision is being
/// written; everything else delegates to the in-memory store.
#[derive(Default)]
pub struct FailingDecisionStore {
    pub inner: MemoryStore,
}

#[async_trait]
impl DocumentStore for FailingDecisionStore {
    async fn get_document(&self, id: &str) -> anyhow::Result<Option<DocumentRecord>> {
        self.inner.get_document(id).await
    }

    async fn update_document(&self, id: &str, update: DocumentUpdate) -> anyhow::Result<()> {
        self.inner.update_document(id, update).await
    }

    async fn insert_review(&self, review: NewReview) -> anyhow::Result<()> {
        self.inner.insert_review(review).await
    }

    async fn get_review(&self, review_id: &str) -> anyhow::Result<Option<ReviewRecord>> {
        self.inner.get_review(review_id).await
    }

    async fn update_review(&self, review_id: &str, update: ReviewUpdate) -> anyhow::Result<()> {
        if update.decision.is_some() {
            anyhow::bail!("review row write rejected");
        }
        self.inner.update_review(review_id, update).await
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn with_object(key: &str, bytes: &[u8]) -> Self {
        let storage = Self::default();
        storage
            .objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        storage
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn download(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("object `{key}` not found"))
    }
}

/// OCR stub: "extraction" is a UTF-8 decode.
pub struct StubOcr {
    gpu: bool,
}

impl StubOcr {
    pub fn gpu() -> Self {
        Self { gpu: true }
    }

    pub fn cpu_only() -> Self {
        Self { gpu: false }
    }
}

#[async_trait]
impl OcrEngine for StubOcr {
    fn gpu_available(&self) -> bool {
        self.gpu
    }

    async fn extract_text(&self, data: &[u8], _use_gpu: bool) -> anyhow::Result<String> {
        Ok(String::from_utf8(data.to_vec()).map_err(|e| anyhow::anyhow!("not text: {e}"))?)
    }
}

#[derive(Default)]
pub struct RecordingLauncher {
    launched: Mutex<Vec<ReviewTaskPayload>>,
}

impl RecordingLauncher {
    pub fn launched(&self) -> Vec<ReviewTaskPayload> {
        self.launched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReviewLauncher for RecordingLauncher {
    async fn launch(&self, payload: ReviewTaskPayload) -> anyhow::Result<()> {
        self.launched.lock().unwrap().push(payload);
        Ok(())
    }
}

/// Review-service double with scriptable create failures and an external
/// status that flips to completed after a set number of polls.
#[derive(Default)]
pub struct RecordingReviewService {
    create_failures: AtomicU32,
    create_calls: AtomicU32,
    status_calls: AtomicU32,
    complete_after_polls: Option<u32>,
    cancels: Mutex<Vec<(String, String)>>,
    syncs: Mutex<Vec<(String, String)>>,
}

impl RecordingReviewService {
    pub fn failing_first(failures: u32) -> Self {
        Self {
            create_failures: AtomicU32::new(failures),
            ..Default::default()
        }
    }

    pub fn completing_after_polls(polls: u32) -> Self {
        Self {
            complete_after_polls: Some(polls),
            ..Default::default()
        }
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> Vec<(String, String)> {
        self.cancels.lock().unwrap().clone()
    }

    pub fn syncs(&self) -> Vec<(String, String)> {
        self.syncs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReviewService for RecordingReviewService {
    async fn create_review_task(
        &self,
        payload: &ReviewTaskPayload,
    ) -> anyhow::Result<ReviewTaskCreated> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let failures = self.create_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.create_failures.store(failures - 1, Ordering::SeqCst);
            anyhow::bail!("review service unavailable");
        }
        Ok(ReviewTaskCreated {
            task_id: format!("task-{}", payload.review_id),
            status: "open".to_string(),
        })
    }

    async fn get_review_task_status(&self, _task_id: &str) -> anyhow::Result<ReviewTaskState> {
        let calls = self.status_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(after) = self.complete_after_polls {
            if calls >= after {
                return Ok(ReviewTaskState {
                    status: "completed".to_string(),
                    decision: Some("approved".to_string()),
                    notes: Some("checked externally".to_string()),
                });
            }
        }
        Ok(ReviewTaskState {
            status: "pending".to_string(),
            decision: None,
            notes: None,
        })
    }

    async fn sync_completion(&self, task_id: &str, decision: &str) -> anyhow::Result<()> {
        self.syncs
            .lock()
            .unwrap()
            .push((task_id.to_string(), decision.to_string()));
        Ok(())
    }

    async fn cancel_review_task(&self, task_id: &str, reason: &str) -> anyhow::Result<()> {
        self.cancels
            .lock()
            .unwrap()
            .push((task_id.to_string(), reason.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String, String)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, k, _)| k == kind)
            .count()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, recipient: &str, kind: &str, message: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), kind.to_string(), message.to_string()));
        Ok(())
    }
}

/// Outbox double that talks straight to the service double; a failed call
/// reports Queued instead of parking anywhere.
pub struct DirectOutbox {
    pub review: Arc<RecordingReviewService>,
}

#[async_trait]
impl EscalationOutbox for DirectOutbox {
    async fn escalate(
        &self,
        payload: &ReviewTaskPayload,
    ) -> Result<EscalationResult, ProcessError> {
        match self.review.create_review_task(payload).await {
            Ok(created) => Ok(EscalationResult::Sent(created)),
            Err(_) => Ok(EscalationResult::Queued),
        }
    }
}

pub fn sample_payload(review_id: &str, document_id: &str) -> ReviewTaskPayload {
    ReviewTaskPayload {
        review_id: review_id.to_string(),
        document_id: document_id.to_string(),
        user_id: "user-1".to_string(),
        document_type: DocumentType::Ktp,
        parsed_fields: serde_json::json!({"nama": "BUDI SANTOSO"}),
        ocr_text: "Nama: BUDI SANTOSO".to_string(),
        ai_score: 50,
        ai_decision: "review".to_string(),
        ai_reasons: vec!["missing nik".to_string()],
    }
}
