//! # Queue Worker
//!
//! Long-running tasks that drain the ingestion queue:
//!
//! - **Workers** claim due jobs (`FOR UPDATE SKIP LOCKED`), run the
//!   processing pipeline under a per-job timeout, and record the
//!   outcome. Transient failures go back to the queue with quadratic
//!   backoff; after the attempt budget they are dead-lettered.
//! - **The reaper** periodically returns jobs stuck in `running`
//!   (a worker died mid-job) to the queue.
//!
//! Ingress never blocks on any of this.

use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing::{error, info, warn};

use shared::config::TrackingConfig;

use crate::domain::{IngestJob, Job};
use crate::repository::JobRepository;
use crate::service::ProcessingService;

/// Backoff before attempt `n + 1`, quadratic in the attempts made:
/// 30 s after the first failure, 120 s after the second.
fn retry_backoff(attempts: i32) -> Duration {
    Duration::seconds(30 * i64::from(attempts) * i64::from(attempts))
}

/// Runs one worker loop forever. Spawn as many of these as
/// `tracking.worker_count` asks for.
pub async fn run_worker(
    worker_id: usize,
    jobs: JobRepository,
    processing: ProcessingService,
    config: TrackingConfig,
) {
    let poll_interval = StdDuration::from_millis(config.poll_interval_ms);
    let job_timeout = StdDuration::from_secs(config.job_timeout_seconds);

    info!(worker_id, "Queue worker started");

    loop {
        let job = match jobs.claim_next().await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::time::sleep(poll_interval).await;
                continue;
            }
            Err(e) => {
                error!(worker_id, error = %e, "Failed to claim job");
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        handle_job(worker_id, &jobs, &processing, &config, job_timeout, job).await;
    }
}

/// Processes one claimed job and records its outcome.
async fn handle_job(
    worker_id: usize,
    jobs: &JobRepository,
    processing: &ProcessingService,
    config: &TrackingConfig,
    job_timeout: StdDuration,
    job: Job,
) {
    let payload: IngestJob = match serde_json::from_value(job.payload.clone()) {
        Ok(payload) => payload,
        Err(e) => {
            // A payload we wrote but cannot read back is permanent
            error!(worker_id, job_id = job.job_id, error = %e, "Unreadable job payload");
            record_failure(jobs, config, &job, &format!("unreadable payload: {e}"), false).await;
            return;
        }
    };

    let result = tokio::time::timeout(job_timeout, processing.process(&payload)).await;

    match result {
        Ok(Ok(outcome)) => {
            if let Err(e) = jobs.complete(job.job_id).await {
                error!(worker_id, job_id = job.job_id, error = %e, "Failed to complete job");
            }
            info!(
                worker_id,
                job_id = job.job_id,
                website_id = job.website_id,
                outcome = outcome.label(),
                "Job done"
            );
        }
        Ok(Err(e)) => {
            warn!(worker_id, job_id = job.job_id, error = %e, "Job failed");
            record_failure(jobs, config, &job, &e.to_string(), e.is_retryable()).await;
        }
        Err(_) => {
            warn!(
                worker_id,
                job_id = job.job_id,
                timeout_seconds = config.job_timeout_seconds,
                "Job timed out"
            );
            record_failure(jobs, config, &job, "processing timed out", true).await;
        }
    }
}

/// Records a failed attempt: back to the queue while attempts remain
/// (and the error is retryable), dead-letter otherwise.
async fn record_failure(
    jobs: &JobRepository,
    config: &TrackingConfig,
    job: &Job,
    error_text: &str,
    retryable: bool,
) {
    let backoff = (retryable && job.attempts < config.max_job_attempts)
        .then(|| retry_backoff(job.attempts));

    if backoff.is_none() {
        error!(
            job_id = job.job_id,
            website_id = job.website_id,
            attempts = job.attempts,
            error = error_text,
            "Job dead-lettered"
        );
    }

    if let Err(e) = jobs.fail(job.job_id, error_text, backoff).await {
        error!(job_id = job.job_id, error = %e, "Failed to record job failure");
    }
}

/// Runs the stale-job reaper forever.
///
/// Anything `running` for more than twice the job timeout belongs to a
/// dead worker; give it back to the queue.
pub async fn run_reaper(jobs: JobRepository, config: TrackingConfig) {
    let interval = StdDuration::from_secs(60);
    let stale_after = Duration::seconds(2 * config.job_timeout_seconds as i64);

    loop {
        tokio::time::sleep(interval).await;

        match jobs.reap_stale(stale_after).await {
            Ok(0) => {}
            Ok(reaped) => warn!(reaped, "Returned stale running jobs to the queue"),
            Err(e) => error!(error = %e, "Reaper pass failed"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule_is_quadratic() {
        assert_eq!(retry_backoff(1), Duration::seconds(30));
        assert_eq!(retry_backoff(2), Duration::seconds(120));
    }

    #[test]
    fn test_backoff_grows_monotonically() {
        assert!(retry_backoff(2) > retry_backoff(1));
        assert!(retry_backoff(3) > retry_backoff(2));
    }
}
