//! # Job Repository
//!
//! The durable ingestion queue, backed by PostgreSQL.
//!
//! ## Delivery Semantics
//!
//! At-least-once: a worker that crashes after claiming leaves the job in
//! `running`; a reaper pass returns stale running jobs to the queue. The
//! processing pipeline is idempotent by key, so redelivery is safe.
//!
//! ## Claiming
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so parallel workers never block
//! each other on the same row:
//!
//! ```text
//! worker A ──claim──► job 41 (locked)      worker B ──claim──► job 42
//! ```

use chrono::{Duration, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::str::FromStr;

use crate::domain::{IngestJob, Job, JobStatus};

use super::{RepositoryError, Result};

/// Repository for queue operations.
#[derive(Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    /// Creates a new repository instance with a PostgreSQL pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueues a validated ingest payload. Returns the job id.
    pub async fn enqueue(&self, job: &IngestJob) -> Result<i64> {
        let payload = serde_json::to_value(job)
            .map_err(|e| RepositoryError::CorruptRow(e.to_string()))?;

        let row = sqlx::query(
            r#"
            INSERT INTO tracking.jobs (website_id, payload)
            VALUES ($1, $2)
            RETURNING job_id
            "#,
        )
        .bind(job.website_id)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("job_id"))
    }

    /// Claims the next due job, marking it running and bumping its
    /// attempt counter. Returns `None` when the queue is drained.
    pub async fn claim_next(&self) -> Result<Option<Job>> {
        let row = sqlx::query(
            r#"
            UPDATE tracking.jobs
            SET status = 'running', started_at = NOW(), attempts = attempts + 1
            WHERE job_id = (
                SELECT job_id
                FROM tracking.jobs
                WHERE status IN ('pending', 'failed') AND run_after <= NOW()
                ORDER BY created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING job_id, website_id, payload, status, attempts, run_after,
                      started_at, finished_at, last_error, created_at
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| map_job_row(&r)).transpose()
    }

    /// Marks a job completed.
    pub async fn complete(&self, job_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tracking.jobs
            SET status = 'completed', finished_at = NOW(), last_error = NULL
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records a failed attempt.
    ///
    /// While attempts remain the job goes back to `failed` with a
    /// `run_after` in the future (the worker computes the backoff);
    /// otherwise it is dead-lettered with the final error attached.
    pub async fn fail(
        &self,
        job_id: i64,
        error: &str,
        retry_backoff: Option<Duration>,
    ) -> Result<()> {
        match retry_backoff {
            Some(backoff) => {
                sqlx::query(
                    r#"
                    UPDATE tracking.jobs
                    SET status = 'failed', last_error = $2, run_after = $3
                    WHERE job_id = $1
                    "#,
                )
                .bind(job_id)
                .bind(error)
                .bind(Utc::now() + backoff)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE tracking.jobs
                    SET status = 'dead', finished_at = NOW(), last_error = $2
                    WHERE job_id = $1
                    "#,
                )
                .bind(job_id)
                .bind(error)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    /// Returns stale `running` jobs (claimed longer ago than `timeout`)
    /// to the queue. Covers workers that died mid-job.
    pub async fn reap_stale(&self, timeout: Duration) -> Result<u64> {
        let cutoff = Utc::now() - timeout;

        let result = sqlx::query(
            r#"
            UPDATE tracking.jobs
            SET status = 'failed', last_error = 'worker timed out or died'
            WHERE status = 'running' AND started_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// ROW MAPPING
// =============================================================================

fn map_job_row(row: &PgRow) -> Result<Job> {
    let status: String = row.get("status");
    Ok(Job {
        job_id: row.get("job_id"),
        website_id: row.get("website_id"),
        payload: row.get("payload"),
        status: JobStatus::from_str(&status).map_err(RepositoryError::CorruptRow)?,
        attempts: row.get("attempts"),
        run_after: row.get("run_after"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
    })
}
