//! Breaker-protected path to the external review service. When the service
//! is unreachable (circuit open or the call itself fails) the escalation is
//! parked in a durable retry table and drained later, oldest first.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::{info, warn};

use crate::breaker::{BreakerError, CircuitBreaker};
use crate::errors::ProcessError;
use crate::pipeline::traits::{ReviewService, ReviewTaskCreated, ReviewTaskPayload};

#[derive(Debug)]
pub enum EscalationResult {
    /// The review task was created on the external service.
    Sent(ReviewTaskCreated),
    /// The service was unavailable; the payload is parked for later retry.
    Queued,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub sent: u64,
    pub remaining: u64,
}

/// Delivery seam consumed by the review workflow. The production
/// implementation is `EscalationChannel`; tests substitute doubles.
#[async_trait]
pub trait EscalationOutbox: Send + Sync {
    async fn escalate(&self, payload: &ReviewTaskPayload)
        -> Result<EscalationResult, ProcessError>;
}

pub struct EscalationChannel {
    pool: PgPool,
    review: Arc<dyn ReviewService>,
    breaker: Arc<CircuitBreaker>,
}

impl EscalationChannel {
    pub fn new(pool: PgPool, review: Arc<dyn ReviewService>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            pool,
            review,
            breaker,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    async fn park(&self, payload: &ReviewTaskPayload) -> Result<(), ProcessError> {
        let json = serde_json::to_value(payload)
            .map_err(|e| ProcessError::Escalation(format!("payload not serializable: {e}")))?;
        sqlx::query("INSERT INTO escalation_retry (payload_json) VALUES ($1)")
            .bind(json)
            .execute(&self.pool)
            .await
            .map_err(|e| ProcessError::Escalation(format!("retry table insert failed: {e}")))?;
        Ok(())
    }

    /// Drain parked escalations oldest first, stopping at the first failure
    /// so ordering is preserved across drains.
    pub async fn drain_pending(&self) -> anyhow::Result<DrainReport> {
        let mut report = DrainReport::default();

        loop {
            let row = sqlx::query(
                "SELECT id, payload_json FROM escalation_retry ORDER BY id ASC LIMIT 1",
            )
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else {
                break;
            };
            let id: i64 = row.get("id");
            let payload: ReviewTaskPayload = serde_json::from_value(row.get("payload_json"))?;

            let res = self
                .breaker
                .execute(|| async { self.review.create_review_task(&payload).await })
                .await;

            match res {
                Ok(created) => {
                    sqlx::query("DELETE FROM escalation_retry WHERE id = $1")
                        .bind(id)
                        .execute(&self.pool)
                        .await?;
                    info!(
                        review_id = %payload.review_id,
                        task_id = %created.task_id,
                        "parked escalation delivered"
                    );
                    report.sent += 1;
                }
                Err(err) => {
                    warn!(error = %err, "escalation drain stopped");
                    break;
                }
            }
        }

        report.remaining = self.pending_count().await?;
        Ok(report)
    }

    pub async fn pending_count(&self) -> anyhow::Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM escalation_retry")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl EscalationOutbox for EscalationChannel {
    /// Try to open a review task now; park the payload on any delivery
    /// failure. Only a failure to park propagates as an error.
    async fn escalate(
        &self,
        payload: &ReviewTaskPayload,
    ) -> Result<EscalationResult, ProcessError> {
        let res = self
            .breaker
            .execute(|| async { self.review.create_review_task(payload).await })
            .await;

        match res {
            Ok(created) => {
                info!(
                    review_id = %payload.review_id,
                    task_id = %created.task_id,
                    "review task created"
                );
                Ok(EscalationResult::Sent(created))
            }
            Err(BreakerError::Open(open)) => {
                warn!(review_id = %payload.review_id, %open, "review circuit open, parking escalation");
                self.park(payload).await?;
                Ok(EscalationResult::Queued)
            }
            Err(BreakerError::Call(err)) => {
                warn!(review_id = %payload.review_id, error = %err, "review call failed, parking escalation");
                self.park(payload).await?;
                Ok(EscalationResult::Queued)
            }
        }
    }
}
