use std::time::Duration;

use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::QueueError;
use crate::pipeline::types::DocumentType;
use crate::queue::model::{JobState, QueuedJob};

const JOB_COLUMNS: &str = "document_id, document_type, correlation_id, status, attempts, \
     queue_pos, enqueued_at, processing_started_at, due_at, last_error";

#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ----------------------------
    // Admission
    // ----------------------------

    /// Admit a document at the pending tail with a fresh correlation id and
    /// attempts reset to 0. Returns false (no-op) when the document is
    /// already pending, processing or delayed; the membership check and the
    /// insert are a single statement, so no race can admit a duplicate.
    pub async fn enqueue(
        &self,
        document_id: &str,
        document_type: DocumentType,
    ) -> Result<bool, QueueError> {
        let res = sqlx::query(
            r#"
            INSERT INTO document_jobs (document_id, document_type, correlation_id, status, attempts)
            VALUES ($1, $2, $3, 'pending', 0)
            ON CONFLICT (document_id) DO NOTHING
            "#,
        )
        .bind(document_id)
        .bind(document_type.as_str())
        .bind(Uuid::new_v4())
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    // ----------------------------
    // Consumption
    // ----------------------------

    /// Pop the pending head: atomically flips the row to processing and
    /// stamps the processing-start timestamp. Returns None on an empty
    /// queue. FOR UPDATE SKIP LOCKED keeps concurrent consumers off the
    /// same candidate row.
    pub async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError> {
        let job = sqlx::query_as::<_, QueuedJob>(&format!(
            r#"
            UPDATE document_jobs
            SET status = 'processing',
                processing_started_at = now()
            WHERE document_id = (
                SELECT document_id
                FROM document_jobs
                WHERE status = 'pending'
                ORDER BY queue_pos ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// Remove from the processing set and re-admit: at the pending tail when
    /// `delay` is zero, otherwise into the delayed set keyed by due time.
    pub async fn requeue(&self, document_id: &str, delay: Duration) -> Result<(), QueueError> {
        if delay.is_zero() {
            sqlx::query(
                r#"
                UPDATE document_jobs
                SET status = 'pending',
                    processing_started_at = NULL,
                    due_at = NULL,
                    queue_pos = nextval('document_jobs_queue_pos_seq')
                WHERE document_id = $1
                "#,
            )
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE document_jobs
                SET status = 'delayed',
                    processing_started_at = NULL,
                    due_at = now() + ($2::bigint * interval '1 millisecond')
                WHERE document_id = $1
                "#,
            )
            .bind(document_id)
            .bind(delay.as_millis() as i64)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    // ----------------------------
    // Terminal marks (idempotent)
    // ----------------------------

    pub async fn mark_complete(&self, document_id: &str) -> Result<(), QueueError> {
        self.remove_everywhere(document_id).await
    }

    pub async fn mark_failed(&self, document_id: &str) -> Result<(), QueueError> {
        self.remove_everywhere(document_id).await
    }

    /// Drops the document from every queue structure (pending, processing,
    /// delayed, attempts) and clears its lock row.
    async fn remove_everywhere(&self, document_id: &str) -> Result<(), QueueError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM document_jobs WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM processing_locks WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // ----------------------------
    // Attempts
    // ----------------------------

    pub async fn increment_attempts(&self, document_id: &str) -> Result<i32, QueueError> {
        let attempts: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE document_jobs
            SET attempts = attempts + 1
            WHERE document_id = $1
            RETURNING attempts
            "#,
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(attempts.unwrap_or(0))
    }

    pub async fn get_attempts(&self, document_id: &str) -> Result<i32, QueueError> {
        let attempts: Option<i32> =
            sqlx::query_scalar("SELECT attempts FROM document_jobs WHERE document_id = $1")
                .bind(document_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(attempts.unwrap_or(0))
    }

    pub async fn set_last_error(
        &self,
        document_id: &str,
        message: &str,
    ) -> Result<(), QueueError> {
        sqlx::query("UPDATE document_jobs SET last_error = $2 WHERE document_id = $1")
            .bind(document_id)
            .bind(message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ----------------------------
    // Delayed promotion
    // ----------------------------

    /// Move every delayed entry whose due time has elapsed back onto the
    /// pending tail. Returns the count moved.
    pub async fn promote_due_delayed(&self) -> Result<u64, QueueError> {
        let res = sqlx::query(
            r#"
            UPDATE document_jobs
            SET status = 'pending',
                due_at = NULL,
                queue_pos = nextval('document_jobs_queue_pos_seq')
            WHERE status = 'delayed'
              AND due_at <= now()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }

    // ----------------------------
    // Reaper support
    // ----------------------------

    /// Processing-set rows that are past the stuck horizon, plus anomalous
    /// rows with no processing-start timestamp at all.
    pub async fn list_stuck(&self, stuck_timeout: Duration) -> Result<Vec<QueuedJob>, QueueError> {
        let rows = sqlx::query_as::<_, QueuedJob>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM document_jobs
            WHERE status = 'processing'
              AND (
                processing_started_at IS NULL
                OR processing_started_at < now() - ($1::bigint * interval '1 millisecond')
              )
            ORDER BY queue_pos ASC
            "#
        ))
        .bind(stuck_timeout.as_millis() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ----------------------------
    // Introspection
    // ----------------------------

    pub async fn len(&self, state: JobState) -> Result<i64, QueueError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM document_jobs WHERE status = $1")
                .bind(state.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn get_job(&self, document_id: &str) -> Result<Option<QueuedJob>, QueueError> {
        let job = sqlx::query_as::<_, QueuedJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM document_jobs WHERE document_id = $1"
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }
}
