#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

use docuflow::pipeline::traits::{
    DocumentRecord, DocumentStore, DocumentUpdate, NewReview, ObjectStorage, OcrEngine,
    ReviewLauncher, ReviewRecord, ReviewService, ReviewTaskCreated, ReviewTaskPayload,
    ReviewTaskState, ReviewUpdate,
};

/// Connects to `TEST_DATABASE_URL`, runs migrations and truncates all queue
/// tables. Returns None when the variable is unset so DB-backed tests can
/// skip instead of fail on machines without Postgres.
pub async fn try_setup_db() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let url = std::env::var("TEST_DATABASE_URL").ok()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect to TEST_DATABASE_URL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");

    for table in ["document_jobs", "processing_locks", "escalation_retry"] {
        sqlx::query(&format!("TRUNCATE TABLE {table}"))
            .execute(&pool)
            .await
            .expect("truncate");
    }

    Some(pool)
}

/// In-memory document store for orchestrator/reaper tests; the queue under
/// test is the real Postgres one, only the surrounding system is stubbed.
#[derive(Default)]
pub struct TestStore {
    docs: Mutex<HashMap<String, DocumentRecord>>,
    reviews: Mutex<HashMap<String, ReviewRecord>>,
}

impl TestStore {
    pub fn with_document(id: &str, document_type: &str, storage_key: &str) -> Self {
        let store = Self::default();
        store.docs.lock().unwrap().insert(
            id.to_string(),
            DocumentRecord {
                id: id.to_string(),
                user_id: "user-1".to_string(),
                document_type: document_type.to_string(),
                storage_key: storage_key.to_string(),
                status: "uploaded".to_string(),
            },
        );
        store
    }

    pub fn document_status(&self, id: &str) -> Option<String> {
        self.docs.lock().unwrap().get(id).map(|d| d.status.clone())
    }

    pub fn set_status(&self, id: &str, status: &str) {
        if let Some(doc) = self.docs.lock().unwrap().get_mut(id) {
            doc.status = status.to_string();
        }
    }
}

#[async_trait]
impl DocumentStore for TestStore {
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
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct TestStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl TestStorage {
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
impl ObjectStorage for TestStorage {
    async fn download(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("object `{key}` not found"))
    }
}

pub struct TestOcr {
    gpu: bool,
    failures_remaining: AtomicU32,
}

impl TestOcr {
    pub fn new(gpu: bool, failing_first: u32) -> Self {
        Self {
            gpu,
            failures_remaining: AtomicU32::new(failing_first),
        }
    }
}

#[async_trait]
impl OcrEngine for TestOcr {
    fn gpu_available(&self) -> bool {
        self.gpu
    }

    async fn extract_text(&self, data: &[u8], _use_gpu: bool) -> anyhow::Result<String> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("ocr backend unavailable");
        }
        Ok(String::from_utf8(data.to_vec())?)
    }
}

#[derive(Default)]
pub struct NoopLauncher;

#[async_trait]
impl ReviewLauncher for NoopLauncher {
    async fn launch(&self, _payload: ReviewTaskPayload) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Review-service double whose availability can be flipped mid-test.
#[derive(Default)]
pub struct TestReviewService {
    failing: std::sync::atomic::AtomicBool,
    create_calls: AtomicU32,
    created: Mutex<Vec<String>>,
}

impl TestReviewService {
    pub fn failing() -> Self {
        let svc = Self::default();
        svc.failing.store(true, Ordering::SeqCst);
        svc
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReviewService for TestReviewService {
    async fn create_review_task(
        &self,
        payload: &ReviewTaskPayload,
    ) -> anyhow::Result<ReviewTaskCreated> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("review service unavailable");
        }
        self.created.lock().unwrap().push(payload.review_id.clone());
        Ok(ReviewTaskCreated {
            task_id: format!("task-{}", payload.review_id),
            status: "open".to_string(),
        })
    }

    async fn get_review_task_status(&self, _task_id: &str) -> anyhow::Result<ReviewTaskState> {
        Ok(ReviewTaskState {
            status: "pending".to_string(),
            decision: None,
            notes: None,
        })
    }
}

pub fn review_payload(review_id: &str, document_id: &str) -> ReviewTaskPayload {
    ReviewTaskPayload {
        review_id: review_id.to_string(),
        document_id: document_id.to_string(),
        user_id: "user-1".to_string(),
        document_type: docuflow::pipeline::types::DocumentType::Ktp,
        parsed_fields: serde_json::json!({"nama": "BUDI SANTOSO"}),
        ocr_text: "Nama: BUDI SANTOSO".to_string(),
        ai_score: 50,
        ai_decision: "review".to_string(),
        ai_reasons: vec!["missing nik".to_string()],
    }
}

pub const KTP_TEXT: &str = "NIK: 3174051209900001\nNama: BUDI SANTOSO\nAlamat: JAKARTA";
