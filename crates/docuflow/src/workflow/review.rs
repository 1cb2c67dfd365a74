//! Long-running human-review workflow. One spawned task per escalated
//! document: it creates the review record, opens the external task through
//! the breaker-protected outbox, then waits on decision signals, cancel
//! signals, a poll ticker and the overall deadline. Compensation runs on
//! every non-decision exit before the error is surfaced.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::errors::WorkflowError;
use crate::escalation::{EscalationOutbox, EscalationResult};
use crate::pipeline::traits::{
    DocumentStore, DocumentUpdate, NewReview, NotificationSink, ReviewService, ReviewUpdate,
};
use crate::workflow::model::{
    CancelSignal, DecisionSignal, ReviewDecision, ReviewStatus, ReviewWorkflowConfig,
    ReviewWorkflowInput, ReviewWorkflowOutput, WorkflowFeatures,
};

const SIGNAL_BUFFER: usize = 8;

#[derive(Clone)]
pub struct ReviewWorkflowDeps {
    pub store: Arc<dyn DocumentStore>,
    pub outbox: Arc<dyn EscalationOutbox>,
    pub review: Arc<dyn ReviewService>,
    pub notifier: Arc<dyn NotificationSink>,
}

/// Signal endpoints for a running instance. Held by the registry; dropping
/// the handle closes the channels, which the wait loop tolerates.
#[derive(Clone)]
pub struct ReviewWorkflowHandle {
    pub review_id: String,
    decision_tx: mpsc::Sender<DecisionSignal>,
    cancel_tx: mpsc::Sender<CancelSignal>,
}

impl ReviewWorkflowHandle {
    pub async fn decide(&self, signal: DecisionSignal) -> bool {
        self.decision_tx.send(signal).await.is_ok()
    }

    pub async fn cancel(&self, signal: CancelSignal) -> bool {
        self.cancel_tx.send(signal).await.is_ok()
    }
}

pub struct ReviewWorkflow {
    deps: ReviewWorkflowDeps,
    input: ReviewWorkflowInput,
    cfg: ReviewWorkflowConfig,
    features: WorkflowFeatures,
    status: ReviewStatus,
    external_task_id: Option<String>,
}

impl ReviewWorkflow {
    /// Start an instance. Feature flags are pinned from the input's schema
    /// version for the whole lifetime of the instance.
    pub fn spawn(
        deps: ReviewWorkflowDeps,
        input: ReviewWorkflowInput,
        cfg: ReviewWorkflowConfig,
    ) -> (
        ReviewWorkflowHandle,
        JoinHandle<Result<ReviewWorkflowOutput, WorkflowError>>,
    ) {
        let (decision_tx, decision_rx) = mpsc::channel(SIGNAL_BUFFER);
        let (cancel_tx, cancel_rx) = mpsc::channel(SIGNAL_BUFFER);

        let handle = ReviewWorkflowHandle {
            review_id: input.payload.review_id.clone(),
            decision_tx,
            cancel_tx,
        };

        let workflow = Self {
            features: WorkflowFeatures::for_version(input.schema_version),
            status: ReviewStatus::Pending,
            external_task_id: None,
            deps,
            input,
            cfg,
        };

        let join = tokio::spawn(workflow.run(decision_rx, cancel_rx));
        (handle, join)
    }

    async fn run(
        mut self,
        mut decision_rx: mpsc::Receiver<DecisionSignal>,
        mut cancel_rx: mpsc::Receiver<CancelSignal>,
    ) -> Result<ReviewWorkflowOutput, WorkflowError> {
        let res = self.run_inner(&mut decision_rx, &mut cancel_rx).await;
        if let Err(ref err) = res {
            self.compensate(err).await;
        }
        res
    }

    async fn run_inner(
        &mut self,
        decision_rx: &mut mpsc::Receiver<DecisionSignal>,
        cancel_rx: &mut mpsc::Receiver<CancelSignal>,
    ) -> Result<ReviewWorkflowOutput, WorkflowError> {
        let review_id = self.input.payload.review_id.clone();
        info!(
            review_id,
            document_id = %self.input.payload.document_id,
            schema_version = self.input.schema_version,
            "review workflow started"
        );

        self.deps
            .store
            .insert_review(NewReview {
                review_id: review_id.clone(),
                document_id: self.input.payload.document_id.clone(),
                user_id: self.input.payload.user_id.clone(),
                status: ReviewStatus::Pending.as_str().to_string(),
                schema_version: self.input.schema_version,
            })
            .await
            .map_err(|e| WorkflowError::Internal(format!("review insert failed: {e}")))?;

        match self
            .deps
            .outbox
            .escalate(&self.input.payload)
            .await
            .map_err(|e| WorkflowError::Internal(format!("escalation failed: {e}")))?
        {
            EscalationResult::Sent(created) => {
                self.external_task_id = Some(created.task_id.clone());
                self.deps
                    .store
                    .update_review(
                        &review_id,
                        ReviewUpdate {
                            external_task_id: Some(created.task_id),
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(|e| WorkflowError::Internal(format!("review update failed: {e}")))?;
            }
            EscalationResult::Queued => {
                // Parked for the drain loop; the instance waits on manual
                // signals without an external task to poll.
                info!(review_id, "external task parked, continuing without task id");
            }
        }

        self.transition(ReviewStatus::SentToReviewer).await?;

        if let Err(err) = self
            .deps
            .notifier
            .notify(
                &self.input.payload.user_id,
                "review_started",
                &format!("document {} sent for review", self.input.payload.document_id),
            )
            .await
        {
            warn!(review_id, error = %err, "review-start notification failed");
        }

        self.transition(ReviewStatus::AwaitingDecision).await?;

        let deadline = tokio::time::Instant::now() + self.cfg.max_wait;
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.cfg.poll_interval,
            self.cfg.poll_interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut retry_poll_count: u32 = 0;
        let mut decision_closed = false;
        let mut cancel_closed = false;

        let signal = loop {
            tokio::select! {
                sig = decision_rx.recv(), if !decision_closed => {
                    match sig {
                        Some(signal) => break signal,
                        None => decision_closed = true,
                    }
                }
                sig = cancel_rx.recv(), if !cancel_closed => {
                    match sig {
                        Some(cancel) => {
                            return Err(WorkflowError::Cancelled(cancel.reason));
                        }
                        None => cancel_closed = true,
                    }
                }
                _ = ticker.tick() => {
                    retry_poll_count += 1;
                    if let Some(signal) = self.poll_external(&review_id).await {
                        break signal;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(WorkflowError::Timeout(self.cfg.max_wait));
                }
            }
        };

        self.finalize(&review_id, signal, retry_poll_count).await
    }

    /// Consult the external task, when this instance's feature set includes
    /// polling and a task was actually created. Poll failures only log; the
    /// deadline is the backstop.
    async fn poll_external(&self, review_id: &str) -> Option<DecisionSignal> {
        if !self.features.poll_external {
            return None;
        }
        let task_id = self.external_task_id.as_deref()?;

        match self.deps.review.get_review_task_status(task_id).await {
            Ok(state) if state.status == "completed" => {
                let decision = state.decision.as_deref().and_then(ReviewDecision::parse)?;
                info!(review_id, task_id, decision = decision.as_str(), "decision found by poll");
                Some(DecisionSignal {
                    decision,
                    notes: state.notes,
                    decided_by: "external".to_string(),
                })
            }
            Ok(_) => None,
            Err(err) => {
                warn!(review_id, task_id, error = %err, "external poll failed");
                None
            }
        }
    }

    async fn finalize(
        &mut self,
        review_id: &str,
        signal: DecisionSignal,
        retry_poll_count: u32,
    ) -> Result<ReviewWorkflowOutput, WorkflowError> {
        // Persist the decision while the review is still live; if this fails
        // compensation can still move the status to failed.
        self.deps
            .store
            .update_review(
                review_id,
                ReviewUpdate {
                    decision: Some(signal.decision.as_str().to_string()),
                    notes: signal.notes.clone(),
                    decided_by: Some(signal.decided_by.clone()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| WorkflowError::Internal(format!("decision persist failed: {e}")))?;
        self.transition(ReviewStatus::Completed).await?;

        // The job finished long ago; only the verification verdict changes.
        if let Err(err) = self
            .deps
            .store
            .update_document(
                &self.input.payload.document_id,
                DocumentUpdate {
                    verification_status: Some(signal.decision.as_str().to_string()),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(review_id, error = %err, "document verdict update failed");
        }

        if let Err(err) = self
            .deps
            .notifier
            .notify(
                &self.input.payload.user_id,
                "review_completed",
                &format!(
                    "document {} review: {}",
                    self.input.payload.document_id,
                    signal.decision.as_str()
                ),
            )
            .await
        {
            warn!(review_id, error = %err, "review-completed notification failed");
        }

        if self.features.sync_external {
            if let Some(task_id) = self.external_task_id.as_deref() {
                if let Err(err) = self
                    .deps
                    .review
                    .sync_completion(task_id, signal.decision.as_str())
                    .await
                {
                    warn!(review_id, task_id, error = %err, "external completion sync failed");
                }
            }
        }

        info!(
            review_id,
            decision = signal.decision.as_str(),
            decided_by = %signal.decided_by,
            retry_poll_count,
            "review workflow completed"
        );
        Ok(ReviewWorkflowOutput {
            review_id: review_id.to_string(),
            status: ReviewStatus::Completed,
            decision: Some(signal.decision),
            notes: signal.notes,
            decided_by: Some(signal.decided_by),
            retry_poll_count,
        })
    }

    /// Cleanup on any non-decision exit. Persistence here is best-effort:
    /// the error that triggered compensation is the one reported.
    async fn compensate(&mut self, err: &WorkflowError) {
        let review_id = self.input.payload.review_id.clone();
        match err {
            WorkflowError::Timeout(waited) => {
                warn!(review_id, waited_secs = waited.as_secs(), "review timed out");
                self.force_status(&review_id, ReviewStatus::Failed).await;
                if let Err(e) = self
                    .deps
                    .notifier
                    .notify(
                        "admin",
                        "review_timeout",
                        &format!(
                            "review {review_id} for document {} timed out",
                            self.input.payload.document_id
                        ),
                    )
                    .await
                {
                    warn!(review_id, error = %e, "timeout notification failed");
                }
            }
            WorkflowError::Cancelled(reason) => {
                info!(review_id, reason, "review cancelled");
                self.force_status(&review_id, ReviewStatus::Cancelled).await;
                if let Some(task_id) = self.external_task_id.as_deref() {
                    if let Err(e) = self.deps.review.cancel_review_task(task_id, reason).await {
                        warn!(review_id, task_id, error = %e, "external cancel failed");
                    }
                }
            }
            WorkflowError::Internal(detail) => {
                warn!(review_id, detail, "review workflow failed");
                self.force_status(&review_id, ReviewStatus::Failed).await;
                if let Err(e) = self
                    .deps
                    .notifier
                    .notify("admin", "review_failed", &format!("review {review_id}: {detail}"))
                    .await
                {
                    warn!(review_id, error = %e, "failure notification failed");
                }
            }
        }
    }

    async fn transition(&mut self, next: ReviewStatus) -> Result<(), WorkflowError> {
        if !self.status.can_transition(next) {
            return Err(WorkflowError::Internal(format!(
                "illegal transition {} -> {}",
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.deps
            .store
            .update_review(
                &self.input.payload.review_id,
                ReviewUpdate {
                    status: Some(next.as_str().to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| WorkflowError::Internal(format!("status persist failed: {e}")))?;
        self.status = next;
        Ok(())
    }

    async fn force_status(&mut self, review_id: &str, next: ReviewStatus) {
        if !self.status.can_transition(next) {
            return;
        }
        if let Err(e) = self
            .deps
            .store
            .update_review(
                review_id,
                ReviewUpdate {
                    status: Some(next.as_str().to_string()),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(review_id, error = %e, "terminal status persist failed");
        }
        self.status = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::testutil::{
        sample_payload, DirectOutbox, FailingDecisionStore, MemoryStore, RecordingNotifier,
        RecordingReviewService,
    };

    fn deps(
        store: Arc<MemoryStore>,
        review: Arc<RecordingReviewService>,
        notifier: Arc<RecordingNotifier>,
    ) -> ReviewWorkflowDeps {
        ReviewWorkflowDeps {
            store,
            outbox: Arc::new(DirectOutbox {
                review: review.clone(),
            }),
            review,
            notifier,
        }
    }

    fn cfg(poll_secs: u64, max_wait_secs: u64) -> ReviewWorkflowConfig {
        ReviewWorkflowConfig {
            poll_interval: Duration::from_secs(poll_secs),
            max_wait: Duration::from_secs(max_wait_secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn decision_signal_completes_the_review() {
        let store = Arc::new(MemoryStore::default());
        let review = Arc::new(RecordingReviewService::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let (handle, join) = ReviewWorkflow::spawn(
            deps(store.clone(), review, notifier.clone()),
            ReviewWorkflowInput {
                payload: sample_payload("rev-1", "doc-1"),
                schema_version: 1,
            },
            cfg(3600, 604_800),
        );

        assert!(
            handle
                .decide(DecisionSignal {
                    decision: ReviewDecision::Approved,
                    notes: Some("ok".to_string()),
                    decided_by: "reviewer-7".to_string(),
                })
                .await
        );

        let out = join.await.unwrap().unwrap();
        assert_eq!(out.status, ReviewStatus::Completed);
        assert_eq!(out.decision, Some(ReviewDecision::Approved));
        assert_eq!(out.notes.as_deref(), Some("ok"));

        let record = store.review("rev-1").unwrap();
        assert_eq!(record.status, "completed");
        assert_eq!(record.decision.as_deref(), Some("approved"));
        assert_eq!(record.decided_by.as_deref(), Some("reviewer-7"));
        assert_eq!(notifier.count_kind("review_completed"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_review_and_alerts_admin_once() {
        let store = Arc::new(MemoryStore::default());
        let review = Arc::new(RecordingReviewService::default());
        let notifier = Arc::new(RecordingNotifier::default());

        // max_wait deliberately not a multiple of the poll interval.
        let (_handle, join) = ReviewWorkflow::spawn(
            deps(store.clone(), review, notifier.clone()),
            ReviewWorkflowInput {
                payload: sample_payload("rev-2", "doc-2"),
                schema_version: 1,
            },
            cfg(60, 150),
        );

        let err = join.await.unwrap().unwrap_err();
        assert!(matches!(err, WorkflowError::Timeout(_)));
        assert_eq!(store.review("rev-2").unwrap().status, "failed");
        assert_eq!(notifier.count_kind("review_timeout"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_signal_cancels_review_and_external_task() {
        let store = Arc::new(MemoryStore::default());
        let review = Arc::new(RecordingReviewService::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let (handle, join) = ReviewWorkflow::spawn(
            deps(store.clone(), review.clone(), notifier),
            ReviewWorkflowInput {
                payload: sample_payload("rev-3", "doc-3"),
                schema_version: 3,
            },
            cfg(3600, 604_800),
        );

        assert!(
            handle
                .cancel(CancelSignal {
                    reason: "document withdrawn".to_string(),
                })
                .await
        );

        let err = join.await.unwrap().unwrap_err();
        assert!(matches!(err, WorkflowError::Cancelled(_)));
        assert_eq!(store.review("rev-3").unwrap().status, "cancelled");
        let cancels = review.cancels();
        assert_eq!(cancels.len(), 1);
        assert_eq!(cancels[0].1, "document withdrawn");
    }

    #[tokio::test(start_paused = true)]
    async fn poll_picks_up_external_decision() {
        let store = Arc::new(MemoryStore::default());
        let review = Arc::new(RecordingReviewService::completing_after_polls(3));
        let notifier = Arc::new(RecordingNotifier::default());

        let (_handle, join) = ReviewWorkflow::spawn(
            deps(store.clone(), review.clone(), notifier),
            ReviewWorkflowInput {
                payload: sample_payload("rev-4", "doc-4"),
                schema_version: 3,
            },
            cfg(60, 604_800),
        );

        let out = join.await.unwrap().unwrap();
        assert_eq!(out.decision, Some(ReviewDecision::Approved));
        assert_eq!(out.decided_by.as_deref(), Some("external"));
        assert_eq!(out.retry_poll_count, 3);
        assert_eq!(review.status_calls(), 3);
        // v3 syncs the completion back to the external system.
        assert_eq!(review.syncs().len(), 1);

        let record = store.review("rev-4").unwrap();
        assert_eq!(record.external_task_id.as_deref(), Some("task-rev-4"));
    }

    #[tokio::test(start_paused = true)]
    async fn v1_instances_never_poll_the_external_service() {
        let store = Arc::new(MemoryStore::default());
        let review = Arc::new(RecordingReviewService::completing_after_polls(1));
        let notifier = Arc::new(RecordingNotifier::default());

        let (_handle, join) = ReviewWorkflow::spawn(
            deps(store, review.clone(), notifier),
            ReviewWorkflowInput {
                payload: sample_payload("rev-5", "doc-5"),
                schema_version: 1,
            },
            cfg(60, 150),
        );

        // With polling pinned off the instance can only time out.
        let err = join.await.unwrap().unwrap_err();
        assert!(matches!(err, WorkflowError::Timeout(_)));
        assert_eq!(review.status_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_decision_persist_lands_in_failed_not_completed() {
        let store = Arc::new(FailingDecisionStore::default());
        let review = Arc::new(RecordingReviewService::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let (handle, join) = ReviewWorkflow::spawn(
            ReviewWorkflowDeps {
                store: store.clone(),
                outbox: Arc::new(DirectOutbox {
                    review: review.clone(),
                }),
                review,
                notifier: notifier.clone(),
            },
            ReviewWorkflowInput {
                payload: sample_payload("rev-7", "doc-7"),
                schema_version: 1,
            },
            cfg(3600, 604_800),
        );

        assert!(
            handle
                .decide(DecisionSignal {
                    decision: ReviewDecision::Approved,
                    notes: None,
                    decided_by: "reviewer-1".to_string(),
                })
                .await
        );

        let err = join.await.unwrap().unwrap_err();
        assert!(matches!(err, WorkflowError::Internal(_)));
        // The review must not be left in a terminal completed state with the
        // decision missing.
        let record = store.inner.review("rev-7").unwrap();
        assert_eq!(record.status, "failed");
        assert!(record.decision.is_none());
        assert_eq!(notifier.count_kind("review_failed"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_external_create_still_accepts_manual_decision() {
        let store = Arc::new(MemoryStore::default());
        let review = Arc::new(RecordingReviewService::failing_first(10));
        let notifier = Arc::new(RecordingNotifier::default());

        let (handle, join) = ReviewWorkflow::spawn(
            deps(store.clone(), review.clone(), notifier),
            ReviewWorkflowInput {
                payload: sample_payload("rev-6", "doc-6"),
                schema_version: 3,
            },
            cfg(3600, 604_800),
        );

        assert!(
            handle
                .decide(DecisionSignal {
                    decision: ReviewDecision::Rejected,
                    notes: None,
                    decided_by: "reviewer-2".to_string(),
                })
                .await
        );

        let out = join.await.unwrap().unwrap();
        assert_eq!(out.decision, Some(ReviewDecision::Rejected));
        assert_eq!(review.create_calls(), 1);
        let record = store.review("rev-6").unwrap();
        assert!(record.external_task_id.is_none());
        assert_eq!(record.status, "completed");
    }
}
