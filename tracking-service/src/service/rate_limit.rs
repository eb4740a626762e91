//! # Ingest Rate Limiting
//!
//! Fixed-window budget per token prefix, counted in Redis so the limit
//! holds across HTTP workers and replicas.
//!
//! A Redis outage fails open: ingestion availability is worth more than
//! a strictly enforced budget, and the outage itself is logged.

use tracing::warn;

use shared::errors::{ApiError, ApiResult};
use shared::redis_client::RedisClient;

/// Window length for the fixed-window counter.
const WINDOW_SECONDS: u64 = 60;

/// Per-token ingest budget.
#[derive(Clone)]
pub struct RateLimiter {
    redis: RedisClient,
    /// Requests allowed per window; `0` disables the limiter.
    limit_per_minute: i64,
}

impl RateLimiter {
    pub fn new(redis: RedisClient, limit_per_minute: i64) -> Self {
        Self {
            redis,
            limit_per_minute,
        }
    }

    /// Checks (and consumes) one request from the token's budget.
    ///
    /// ## Errors
    ///
    /// Returns `ApiError::TooManyRequests` when the budget is exhausted.
    pub async fn check(&self, token_prefix: &str) -> ApiResult<()> {
        if self.limit_per_minute <= 0 {
            return Ok(());
        }

        let key = format!("ratelimit:{}", token_prefix);
        let count = match self
            .redis
            .increment_window(&key, std::time::Duration::from_secs(WINDOW_SECONDS))
            .await
        {
            Ok(count) => count,
            Err(e) => {
                // Fail open: a counter outage must not stop ingestion
                warn!(error = %e, "Rate limiter unavailable, allowing request");
                return Ok(());
            }
        };

        if count > self.limit_per_minute {
            return Err(ApiError::TooManyRequests {
                retry_after_seconds: WINDOW_SECONDS,
            });
        }

        Ok(())
    }
}
