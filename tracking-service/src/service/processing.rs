//! # Processing Pipeline
//!
//! The worker-side transaction that turns one queued [`IngestJob`] into
//! persisted rows:
//!
//! ```text
//! BEGIN
//!   1. idempotency re-check      (duplicate? -> stop, return prior ids)
//!   2. identity resolution       (no customer? -> drop event)
//!   3. dimension normalization   (referrer / landing page / UTMs)
//!   4. sessionization            (locks the session row)
//!   5. event insert              (conflict? -> concurrent duplicate)
//!   6. touch management
//!   7. conversion attribution    (purchase-like events only)
//! COMMIT
//! ```
//!
//! Everything between BEGIN and COMMIT either lands together or not at
//! all; the queue retries transient failures with backoff.

use std::time::Instant;

use sqlx::PgPool;
use tracing::info;

use shared::config::TrackingConfig;

use crate::domain::{IngestJob, NewEvent, ProcessingOutcome, TrackableKind};
use crate::repository::{DimensionRepository, EventRepository, RepositoryError};

use super::{attribution, dimensions, identity, sessions};

// =============================================================================
// ERRORS
// =============================================================================

/// Errors surfaced by the processing pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// The job payload could not be interpreted. Never retried.
    #[error("Invalid job payload: {0}")]
    Payload(String),

    /// An idempotency race resolved against us but the winning row was
    /// not yet visible. Retried; the next attempt reads the winner.
    #[error("Lost idempotency race: {0}")]
    Race(String),
}

impl ProcessingError {
    /// Whether the queue should retry after this error.
    ///
    /// Storage-level failures (deadlocks, timeouts, lost connections)
    /// are worth retrying; payload and logic errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessingError::Repository(RepositoryError::Database(_)) => true,
            ProcessingError::Repository(_) => false,
            ProcessingError::Payload(_) => false,
            ProcessingError::Race(_) => true,
        }
    }
}

// =============================================================================
// PROCESSING SERVICE
// =============================================================================

/// Executes the worker transaction for queued ingest jobs.
#[derive(Clone)]
pub struct ProcessingService {
    pool: PgPool,
    config: TrackingConfig,
}

impl ProcessingService {
    pub fn new(pool: PgPool, config: TrackingConfig) -> Self {
        Self { pool, config }
    }

    /// Processes one job to completion inside a single transaction.
    pub async fn process(&self, job: &IngestJob) -> Result<ProcessingOutcome, ProcessingError> {
        let started = Instant::now();

        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        // 1. TOCTOU guard: the ingress pre-check ran outside this
        //    transaction, so look again before doing any work.
        if let Some(existing) = EventRepository::find_ref_by_key(&mut *tx, &job.idempotency_key).await?
        {
            tx.rollback().await.map_err(RepositoryError::from)?;
            self.log_outcome(job, "duplicate", started);
            return Ok(ProcessingOutcome::Duplicate { event: existing });
        }

        // 2. Identity resolution
        let Some(customer_id) = identity::resolve_customer(&mut *tx, &self.config, job).await?
        else {
            tx.rollback().await.map_err(RepositoryError::from)?;
            self.log_outcome(job, "no_customer", started);
            return Ok(ProcessingOutcome::NoCustomer);
        };

        // 3. Dimension normalization
        let dims = dimensions::normalize(&mut *tx, job).await?;

        // 4. Sessionization (locks the session row for this transaction)
        let session =
            sessions::resolve_session(&mut *tx, &self.config, job, customer_id, &dims).await?;

        // 5. Event insert
        let inserted = EventRepository::insert(
            &mut *tx,
            NewEvent {
                website_id: job.website_id,
                ingestion_token_id: job.ingestion_token_id,
                session_id: session.session_id,
                customer_id: Some(customer_id),
                name: job.name.clone(),
                occurred_at: job.occurred_at,
                properties: job.properties.clone(),
                revenue_minor: job.revenue_minor,
                currency: job.currency.clone(),
                idempotency_key: job.idempotency_key.clone(),
                referrer_domain_id: dims.referrer_domain_id(),
                landing_page_id: dims.landing_page_id(),
            },
        )
        .await?;

        let Some(event) = inserted else {
            // A concurrent transaction inserted the same key while we
            // worked; drop our writes and surface the winner's ids.
            tx.rollback().await.map_err(RepositoryError::from)?;

            let existing = self
                .find_ref_pooled(&job.idempotency_key)
                .await?
                .ok_or_else(|| ProcessingError::Race(job.idempotency_key.clone()))?;

            self.log_outcome(job, "duplicate", started);
            return Ok(ProcessingOutcome::Duplicate { event: existing });
        };

        DimensionRepository::bind_utm_values(
            &mut *tx,
            TrackableKind::Event,
            event.event_id,
            &dims.utm_value_ids,
        )
        .await?;

        // 6. Touch management
        attribution::ensure_landing_touch(&mut *tx, job, &session, &dims).await?;

        // 7. Conversion attribution
        if attribution::is_conversion_event(&event.name) {
            attribution::record_conversion(&mut *tx, job, &event, &session, customer_id).await?;
        }

        tx.commit().await.map_err(RepositoryError::from)?;

        self.log_outcome(job, "processed", started);
        Ok(ProcessingOutcome::Processed {
            event: crate::domain::EventRef {
                event_id: event.event_id,
                customer_id: event.customer_id,
                session_id: Some(event.session_id),
            },
        })
    }

    async fn find_ref_pooled(
        &self,
        key: &str,
    ) -> Result<Option<crate::domain::EventRef>, ProcessingError> {
        let repository = EventRepository::new(self.pool.clone());
        Ok(repository.find_ref_by_key_pooled(key).await?)
    }

    fn log_outcome(&self, job: &IngestJob, outcome: &str, started: Instant) {
        info!(
            website_id = job.website_id,
            idempotency_key = %job.idempotency_key,
            step = "process",
            outcome,
            duration_ms = started.elapsed().as_millis() as u64,
            "Ingest job finished"
        );
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_errors_are_retryable() {
        let error = ProcessingError::Repository(RepositoryError::Database(
            sqlx::Error::PoolTimedOut,
        ));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_payload_errors_are_permanent() {
        assert!(!ProcessingError::Payload("bad json".to_string()).is_retryable());
        assert!(!ProcessingError::Repository(RepositoryError::NotFound("x".to_string()))
            .is_retryable());
    }

    #[test]
    fn test_race_errors_are_retryable() {
        assert!(ProcessingError::Race("k1".to_string()).is_retryable());
    }
}
