use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::ProcessError;
use crate::pipeline::traits::{
    DocumentStore, FieldParser, ObjectStorage, OcrEngine, ReviewLauncher, ReviewTaskPayload,
    Scorer,
};
use crate::pipeline::traits::DocumentUpdate;
use crate::pipeline::types::{AiDecision, DocumentType};

pub struct ProcessorDeps {
    pub store: Arc<dyn DocumentStore>,
    pub storage: Arc<dyn ObjectStorage>,
    pub ocr: Arc<dyn OcrEngine>,
    pub parser: Arc<dyn FieldParser>,
    pub scorer: Arc<dyn Scorer>,
    pub launcher: Arc<dyn ReviewLauncher>,
}

/// Terminal verdict of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub score: i32,
    pub decision: AiDecision,
    pub reasons: Vec<String>,
    pub gpu_processed: bool,
    pub escalated: bool,
}

/// The per-document processing pipeline:
/// download -> OCR -> parse -> score -> persist -> escalate when low
/// confidence. Owns no queue state; the orchestrator decides what a failure
/// means for the job.
pub struct DocumentProcessor {
    deps: ProcessorDeps,
}

impl DocumentProcessor {
    pub fn new(deps: ProcessorDeps) -> Self {
        Self { deps }
    }

    pub async fn process(
        &self,
        document_id: &str,
        document_type: DocumentType,
        correlation_id: Uuid,
        use_gpu: bool,
    ) -> Result<PipelineOutcome, ProcessError> {
        let doc = self
            .deps
            .store
            .get_document(document_id)
            .await
            .map_err(|e| ProcessError::Persistence(e.to_string()))?
            .ok_or_else(|| ProcessError::DocumentNotFound(document_id.to_string()))?;

        self.deps
            .store
            .update_document(
                document_id,
                DocumentUpdate {
                    status: Some("processing".to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| ProcessError::Persistence(e.to_string()))?;

        let bytes = self
            .deps
            .storage
            .download(&doc.storage_key)
            .await
            .map_err(|e| ProcessError::Download(e.to_string()))?;

        let gpu = use_gpu && self.deps.ocr.gpu_available();
        debug!(
            document_id,
            %correlation_id,
            gpu,
            bytes = bytes.len(),
            "running text extraction"
        );
        let text = self
            .deps
            .ocr
            .extract_text(&bytes, gpu)
            .await
            .map_err(|e| ProcessError::Extraction(e.to_string()))?;

        let fields = self.deps.parser.parse(document_type, &text);
        let outcome = self.deps.scorer.score(document_type, &fields, &text);

        let fields_json = serde_json::Value::Object(fields.clone());
        self.deps
            .store
            .update_document(
                document_id,
                DocumentUpdate {
                    status: Some("completed".to_string()),
                    verification_status: Some(outcome.decision.as_str().to_string()),
                    ai_score: Some(outcome.score),
                    ai_decision: Some(outcome.decision.as_str().to_string()),
                    result_json: Some(fields_json.clone()),
                    ocr_text: Some(text.clone()),
                    processed_at: Some(Utc::now()),
                },
            )
            .await
            .map_err(|e| ProcessError::Persistence(e.to_string()))?;

        let escalated = if outcome.decision.requires_escalation() {
            let payload = ReviewTaskPayload {
                review_id: Uuid::new_v4().to_string(),
                document_id: document_id.to_string(),
                user_id: doc.user_id.clone(),
                document_type,
                parsed_fields: fields_json,
                ocr_text: text,
                ai_score: outcome.score,
                ai_decision: outcome.decision.as_str().to_string(),
                ai_reasons: outcome.reasons.clone(),
            };
            match self.deps.launcher.launch(payload).await {
                Ok(()) => {
                    info!(document_id, %correlation_id, "escalated for human review");
                    true
                }
                Err(e) => {
                    warn!(document_id, %correlation_id, error = %e, "review launch failed");
                    return Err(ProcessError::Escalation(e.to_string()));
                }
            }
        } else {
            false
        };

        Ok(PipelineOutcome {
            score: outcome.score,
            decision: outcome.decision,
            reasons: outcome.reasons,
            gpu_processed: gpu,
            escalated,
        })
    }
}
