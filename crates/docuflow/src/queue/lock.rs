use std::time::Duration;

use sqlx::PgPool;

use crate::errors::QueueError;

/// Per-document distributed lock. Dequeue alone is not enough across worker
/// processes sharing the store: after a duplicated pop both sides can
/// believe they own the job, and only the lock arbitrates. The TTL bounds
/// the blast radius of a crashed holder; release() is best-effort cleanup.
#[derive(Clone)]
pub struct ProcessingLock {
    pool: PgPool,
}

impl ProcessingLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Atomic set-if-absent-with-expiry. True only when no live owner holds
    /// the lock; an expired row is claimed in the same statement.
    pub async fn acquire(
        &self,
        document_id: &str,
        owner_token: &str,
        ttl: Duration,
    ) -> Result<bool, QueueError> {
        let res = sqlx::query(
            r#"
            INSERT INTO processing_locks (document_id, owner_token, expires_at)
            VALUES ($1, $2, now() + ($3::bigint * interval '1 millisecond'))
            ON CONFLICT (document_id) DO UPDATE
            SET owner_token = EXCLUDED.owner_token,
                expires_at  = EXCLUDED.expires_at
            WHERE processing_locks.expires_at < now()
            "#,
        )
        .bind(document_id)
        .bind(owner_token)
        .bind(ttl.as_millis() as i64)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    /// Unconditional delete. Skipping this after a crash is safe: the TTL
    /// makes the row claimable again.
    pub async fn release(&self, document_id: &str) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM processing_locks WHERE document_id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
