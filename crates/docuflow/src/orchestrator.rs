//! Worker loop: polls the queue, runs up to `gpu_concurrency` pipelines
//! concurrently, and owns the retry / CPU-fallback / fail decision for every
//! job it popped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::ProcessError;
use crate::pipeline::traits::{DocumentStore, DocumentUpdate};
use crate::pipeline::types::DocumentType;
use crate::pipeline::DocumentProcessor;
use crate::queue::{JobQueue, ProcessingLock, QueuedJob};
use crate::results::{JobResult, ResultSender};

#[derive(Clone)]
pub struct OrchestratorConfig {
    pub worker_id: String,
    pub gpu_concurrency: usize,
    pub poll_interval: Duration,
    pub max_retries: i32,
    pub lock_ttl: Duration,
    pub auto_fallback_to_cpu: bool,
}

impl OrchestratorConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            worker_id: cfg.worker_id.clone(),
            gpu_concurrency: cfg.gpu_concurrency,
            poll_interval: cfg.poll_interval(),
            max_retries: cfg.max_retries,
            lock_ttl: cfg.lock_ttl(),
            auto_fallback_to_cpu: cfg.auto_fallback_to_cpu,
        }
    }
}

pub struct Orchestrator {
    cfg: OrchestratorConfig,
    queue: JobQueue,
    lock: ProcessingLock,
    processor: Arc<DocumentProcessor>,
    store: Arc<dyn DocumentStore>,
    results: ResultSender,
}

impl Orchestrator {
    pub fn new(
        cfg: OrchestratorConfig,
        queue: JobQueue,
        lock: ProcessingLock,
        processor: Arc<DocumentProcessor>,
        store: Arc<dyn DocumentStore>,
        results: ResultSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            queue,
            lock,
            processor,
            store,
            results,
        })
    }

    /// Poll loop. Runs until the shutdown flag flips, then waits for
    /// in-flight jobs to finish.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            worker_id = %self.cfg.worker_id,
            concurrency = self.cfg.gpu_concurrency,
            "orchestrator started"
        );

        let mut ticker = tokio::time::interval(self.cfg.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.consume_tick(&mut in_flight).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(
            worker_id = %self.cfg.worker_id,
            in_flight = in_flight.len(),
            "orchestrator draining"
        );
        while in_flight.join_next().await.is_some() {}
        info!(worker_id = %self.cfg.worker_id, "orchestrator stopped");
    }

    /// One tick: reap finished tasks, then top the in-flight set back up to
    /// the concurrency bound.
    pub async fn consume_tick(self: &Arc<Self>, in_flight: &mut JoinSet<()>) {
        while let Some(res) = in_flight.try_join_next() {
            if let Err(err) = res {
                error!(error = %err, "job task panicked");
            }
        }

        while in_flight.len() < self.cfg.gpu_concurrency {
            let job = match self.queue.dequeue().await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "dequeue failed, backing off until next tick");
                    break;
                }
            };

            let this = Arc::clone(self);
            in_flight.spawn(async move {
                this.run_one(job).await;
            });
        }
    }

    /// Full lifecycle of one popped job.
    pub async fn run_one(&self, job: QueuedJob) {
        let document_id = job.document_id.clone();
        let owner_token = format!("{}:{}", self.cfg.worker_id, Uuid::new_v4());

        match self
            .lock
            .acquire(&document_id, &owner_token, self.cfg.lock_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // Another worker owns it; put the job back untouched.
                debug!(document_id, "lock held elsewhere, requeueing");
                if let Err(err) = self.queue.requeue(&document_id, Duration::ZERO).await {
                    warn!(document_id, error = %err, "requeue after lock miss failed");
                }
                return;
            }
            Err(err) => {
                warn!(document_id, error = %err, "lock acquire failed, requeueing");
                if let Err(err) = self.queue.requeue(&document_id, Duration::ZERO).await {
                    warn!(document_id, error = %err, "requeue after lock error failed");
                }
                return;
            }
        }

        // Idempotency guard: a document already being processed (or done) by
        // an earlier cycle must not run again off a stale queue entry.
        match self.store.get_document(&document_id).await {
            Ok(Some(doc)) if doc.status == "processing" || doc.status == "completed" => {
                info!(document_id, status = %doc.status, "duplicate job dropped");
                if let Err(err) = self.queue.mark_complete(&document_id).await {
                    warn!(document_id, error = %err, "cleanup of duplicate job failed");
                }
                return;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(document_id, error = %err, "document lookup failed before processing");
            }
        }

        let document_type = match DocumentType::from_str(&job.document_type) {
            Ok(t) => t,
            Err(err) => {
                self.handle_failure(&job, None, err, false).await;
                return;
            }
        };

        match self
            .processor
            .process(&document_id, document_type, job.correlation_id, true)
            .await
        {
            Ok(outcome) => {
                self.finish_completed(&job, outcome.gpu_processed, outcome.score, outcome.decision.as_str())
                    .await;
            }
            Err(err) => {
                self.handle_failure(&job, Some(document_type), err, true).await;
            }
        }
    }

    async fn handle_failure(
        &self,
        job: &QueuedJob,
        document_type: Option<DocumentType>,
        err: ProcessError,
        gpu: bool,
    ) {
        let document_id = &job.document_id;
        warn!(
            document_id,
            correlation_id = %job.correlation_id,
            code = err.code(),
            error = %err,
            "job attempt failed"
        );
        if let Err(e) = self.queue.set_last_error(document_id, &err.to_string()).await {
            warn!(document_id, error = %e, "recording last error failed");
        }

        let attempts = match self.queue.increment_attempts(document_id).await {
            Ok(n) => n,
            Err(e) => {
                warn!(document_id, error = %e, "attempt counter update failed");
                job.attempts + 1
            }
        };

        if attempts < self.cfg.max_retries {
            // Reset the document so the duplicate guard lets the retry run.
            self.reset_document_status(document_id).await;
            if let Err(e) = self.lock.release(document_id).await {
                warn!(document_id, error = %e, "lock release failed");
            }
            if let Err(e) = self.queue.requeue(document_id, Duration::ZERO).await {
                warn!(document_id, error = %e, "requeue failed");
            }
            info!(
                document_id,
                attempts,
                max_retries = self.cfg.max_retries,
                "job requeued for retry"
            );
            self.publish(job, false, gpu, None, None, Some("requeued"), Some(&err));
            return;
        }

        // Retries exhausted. A GPU-path job may get one direct CPU run before
        // being declared failed.
        if self.cfg.auto_fallback_to_cpu {
            if let Some(document_type) = document_type {
                info!(document_id, "retries exhausted, attempting CPU fallback");
                self.reset_document_status(document_id).await;
                match self
                    .processor
                    .process(document_id, document_type, job.correlation_id, false)
                    .await
                {
                    Ok(outcome) => {
                        self.finish_completed(job, false, outcome.score, outcome.decision.as_str())
                            .await;
                        return;
                    }
                    Err(fallback_err) => {
                        warn!(
                            document_id,
                            error = %fallback_err,
                            "CPU fallback failed"
                        );
                        self.finish_failed(job, &fallback_err, false).await;
                        return;
                    }
                }
            }
        }

        self.finish_failed(job, &err, gpu).await;
    }

    async fn finish_completed(&self, job: &QueuedJob, gpu: bool, score: i32, decision: &str) {
        let document_id = &job.document_id;
        if let Err(e) = self.lock.release(document_id).await {
            warn!(document_id, error = %e, "lock release failed");
        }
        if let Err(e) = self.queue.mark_complete(document_id).await {
            warn!(document_id, error = %e, "mark_complete failed");
        }
        info!(
            document_id,
            correlation_id = %job.correlation_id,
            gpu,
            score,
            decision,
            "job completed"
        );
        self.publish(
            job,
            true,
            gpu,
            Some(score),
            Some(decision),
            Some("completed"),
            None,
        );
    }

    async fn finish_failed(&self, job: &QueuedJob, err: &ProcessError, gpu: bool) {
        let document_id = &job.document_id;
        if let Err(e) = self
            .store
            .update_document(
                document_id,
                DocumentUpdate {
                    status: Some("failed".to_string()),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(document_id, error = %e, "marking document failed in store errored");
        }
        if let Err(e) = self.queue.mark_failed(document_id).await {
            warn!(document_id, error = %e, "mark_failed errored");
        }
        error!(
            document_id,
            correlation_id = %job.correlation_id,
            code = err.code(),
            error = %err,
            "job failed permanently"
        );
        self.publish(job, false, gpu, None, None, Some("failed"), Some(err));
    }

    /// Best-effort: put the document back into a state the duplicate guard
    /// will admit on the next cycle.
    async fn reset_document_status(&self, document_id: &str) {
        if let Err(e) = self
            .store
            .update_document(
                document_id,
                DocumentUpdate {
                    status: Some("uploaded".to_string()),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(document_id, error = %e, "document status reset failed");
        }
    }

    fn publish(
        &self,
        job: &QueuedJob,
        success: bool,
        gpu_processed: bool,
        score: Option<i32>,
        decision: Option<&str>,
        outcome: Option<&str>,
        error: Option<&ProcessError>,
    ) {
        // Send only fails when nobody is subscribed, which is fine.
        let _ = self.results.send(JobResult {
            document_id: job.document_id.clone(),
            correlation_id: job.correlation_id,
            success,
            gpu_processed,
            score,
            decision: decision.map(str::to_string),
            outcome: outcome.map(str::to_string),
            error: error.map(|e| e.to_string()),
        });
    }
}
