//! Recovery sweep for jobs stranded in the processing set by a crashed or
//! wedged worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::pipeline::traits::{DocumentStore, DocumentUpdate};
use crate::queue::{JobQueue, ProcessingLock, QueuedJob};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    pub requeued: u64,
    pub failed: u64,
}

#[derive(Clone)]
pub struct ReaperConfig {
    pub stuck_timeout: Duration,
    pub interval: Duration,
    pub max_retries: i32,
}

impl ReaperConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            stuck_timeout: cfg.stuck_timeout(),
            interval: Duration::from_secs(cfg.reaper_interval_secs),
            max_retries: cfg.max_retries,
        }
    }
}

pub struct StuckJobReaper {
    cfg: ReaperConfig,
    queue: JobQueue,
    lock: ProcessingLock,
    store: Arc<dyn DocumentStore>,
}

impl StuckJobReaper {
    pub fn new(
        cfg: ReaperConfig,
        queue: JobQueue,
        lock: ProcessingLock,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            cfg,
            queue,
            lock,
            store,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            stuck_timeout_secs = self.cfg.stuck_timeout.as_secs(),
            interval_secs = self.cfg.interval.as_secs(),
            "stuck-job reaper started"
        );
        let mut ticker = tokio::time::interval(self.cfg.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(report) if report != ReapReport::default() => {
                            info!(requeued = report.requeued, failed = report.failed, "reaper sweep");
                        }
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "reaper sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("stuck-job reaper stopped");
    }

    /// One pass over the stuck horizon. Requeue keeps the attempt counter
    /// untouched: a reaped job was interrupted, not failed.
    pub async fn sweep(&self) -> anyhow::Result<ReapReport> {
        let mut report = ReapReport::default();

        for job in self.queue.list_stuck(self.cfg.stuck_timeout).await? {
            // A processing row without a start timestamp is an anomaly from
            // a partial write; reclaim it regardless of attempts.
            if job.processing_started_at.is_none() {
                warn!(
                    document_id = %job.document_id,
                    "processing row without start timestamp, reclaiming"
                );
                self.requeue_stuck(&job).await?;
                report.requeued += 1;
                continue;
            }

            if job.attempts < self.cfg.max_retries {
                self.requeue_stuck(&job).await?;
                report.requeued += 1;
            } else {
                self.fail_stuck(&job).await?;
                report.failed += 1;
            }
        }

        Ok(report)
    }

    async fn requeue_stuck(&self, job: &QueuedJob) -> anyhow::Result<()> {
        info!(
            document_id = %job.document_id,
            attempts = job.attempts,
            "requeueing stuck job"
        );
        self.lock.release(&job.document_id).await?;
        if let Err(err) = self
            .store
            .update_document(
                &job.document_id,
                DocumentUpdate {
                    status: Some("uploaded".to_string()),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(document_id = %job.document_id, error = %err, "document status reset failed");
        }
        self.queue.requeue(&job.document_id, Duration::ZERO).await?;
        Ok(())
    }

    async fn fail_stuck(&self, job: &QueuedJob) -> anyhow::Result<()> {
        warn!(
            document_id = %job.document_id,
            attempts = job.attempts,
            max_retries = self.cfg.max_retries,
            "stuck job out of retries, failing"
        );
        if let Err(err) = self
            .store
            .update_document(
                &job.document_id,
                DocumentUpdate {
                    status: Some("failed".to_string()),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(document_id = %job.document_id, error = %err, "marking document failed errored");
        }
        self.queue.mark_failed(&job.document_id).await?;
        Ok(())
    }
}
