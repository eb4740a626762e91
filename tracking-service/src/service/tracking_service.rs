//! # Ingress Service
//!
//! The synchronous half of ingestion: everything that happens between
//! "request authenticated" and "202-style fast return". Heavy work is
//! deferred to the queue; the contract here is to answer quickly and to
//! never lose an accepted event.

use tracing::{debug, info};

use shared::config::TrackingConfig;
use shared::errors::{ApiError, ApiResult};

use crate::domain::{EventRef, IngestJob};
use crate::repository::{EventRepository, JobRepository};

use super::sessions::is_bot_user_agent;

/// Serialized `properties` above this many bytes are rejected outright.
const PROPERTIES_MAX_BYTES: usize = 16 * 1024;

/// What the ingress decided to do with an accepted request.
#[derive(Debug)]
pub enum IngestDisposition {
    /// The idempotency key was already processed; these are the ids.
    Known(EventRef),
    /// Enqueued for asynchronous processing.
    Enqueued { job_id: i64 },
    /// Bot gating is on and the user agent matched; accepted, dropped.
    BotSkipped,
}

/// Synchronous ingest pipeline: validation context, idempotency
/// pre-check and enqueue.
#[derive(Clone)]
pub struct TrackingService {
    events: EventRepository,
    jobs: JobRepository,
    config: TrackingConfig,
}

impl TrackingService {
    pub fn new(events: EventRepository, jobs: JobRepository, config: TrackingConfig) -> Self {
        Self {
            events,
            jobs,
            config,
        }
    }

    /// Accepts one validated job: applies the bot gate, short-circuits
    /// known idempotency keys, and enqueues the rest.
    pub async fn ingest(&self, job: &IngestJob) -> ApiResult<IngestDisposition> {
        if serde_json::to_vec(&job.properties)
            .map(|bytes| bytes.len() > PROPERTIES_MAX_BYTES)
            .unwrap_or(true)
        {
            return Err(ApiError::PayloadTooLarge);
        }

        if self.config.reject_bot_traffic {
            if let Some(ua) = job.user_agent.as_deref() {
                if is_bot_user_agent(ua) {
                    debug!(
                        website_id = job.website_id,
                        idempotency_key = %job.idempotency_key,
                        step = "bot_gate",
                        "Bot traffic gated"
                    );
                    return Ok(IngestDisposition::BotSkipped);
                }
            }
        }

        // Idempotency pre-check: a key we have seen resolves immediately
        // to the original ids and skips the queue entirely.
        if let Some(existing) = self
            .events
            .find_ref_by_key_pooled(&job.idempotency_key)
            .await
            .map_err(internal)?
        {
            debug!(
                website_id = job.website_id,
                idempotency_key = %job.idempotency_key,
                step = "idempotency_precheck",
                event_id = existing.event_id,
                "Duplicate idempotency key"
            );
            return Ok(IngestDisposition::Known(existing));
        }

        let job_id = self.jobs.enqueue(job).await.map_err(internal)?;

        info!(
            website_id = job.website_id,
            idempotency_key = %job.idempotency_key,
            step = "enqueue",
            job_id,
            event = %job.name,
            "Event accepted"
        );

        Ok(IngestDisposition::Enqueued { job_id })
    }
}

fn internal(error: crate::repository::RepositoryError) -> ApiError {
    match error {
        crate::repository::RepositoryError::Database(e) => ApiError::DatabaseError(e),
        other => ApiError::InternalError {
            message: other.to_string(),
        },
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_cap_constant() {
        // The cap is part of the API contract; moving it is a breaking change
        assert_eq!(PROPERTIES_MAX_BYTES, 16 * 1024);
    }
}
