//! # Redis Client for Rate Limiting
//!
//! High-level Redis client used by the ingest rate limiter.
//!
//! ## Why Redis?
//!
//! The ingest budget is enforced across all HTTP workers of all replicas,
//! so the counter must live outside the process:
//!
//! | Use Case | Description |
//! |----------|-------------|
//! | **Rate Limiting** | Track request counts per token prefix |
//! | **Counters** | Fixed-window counters with automatic expiry |
//!
//! ## Connection Management
//!
//! We use a `ConnectionManager` which automatically reconnects on failure.
//! This is more resilient than a simple connection for long-running services.
//!
//! ## Key Naming Convention
//!
//! | Pattern | Example | Purpose |
//! |---------|---------|---------|
//! | `ratelimit:{scope}:{window}` | `ratelimit:tk_ab12cd34ef56:28943210` | Fixed-window ingest counter |
//!
//! All counter keys carry a TTL so abandoned windows clean themselves up.
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use shared::redis_client::RedisClient;
//! use std::time::Duration;
//!
//! let redis = RedisClient::new(&config.redis).await?;
//!
//! // One fixed 60-second window per token prefix
//! let count = redis
//!     .increment_window("ratelimit:tk_ab12cd34ef56", Duration::from_secs(60))
//!     .await?;
//! if count > budget {
//!     // reject with 429
//! }
//! ```

use crate::config::RedisConfig;
use crate::errors::ApiError;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

// =============================================================================
// Redis Client
// =============================================================================

/// Async Redis client with automatic reconnection.
///
/// This client wraps a `ConnectionManager` which handles connection
/// failures automatically. It's safe to clone and share across tasks.
///
/// ## Thread Safety
///
/// The client is `Clone + Send + Sync`. Cloning is cheap (just an Arc clone).
/// Each operation uses an async connection from the manager.
#[derive(Clone)]
pub struct RedisClient {
    /// Connection manager for automatic reconnection
    conn: ConnectionManager,
}

impl RedisClient {
    /// Creates a new Redis client and establishes connection.
    ///
    /// ## Errors
    ///
    /// Returns `ApiError::RedisError` if:
    /// - URL is invalid
    /// - Redis server is unreachable
    /// - Authentication fails
    pub async fn new(config: &RedisConfig) -> Result<Self, ApiError> {
        info!(url = %config.url, "Connecting to Redis");

        // Parse connection URL and create client
        let client = redis::Client::open(config.url.as_str()).map_err(ApiError::RedisError)?;

        // Create connection manager (handles reconnection automatically)
        let conn = ConnectionManager::new(client)
            .await
            .map_err(ApiError::RedisError)?;

        info!("Redis connection established");

        Ok(Self { conn })
    }

    // =========================================================================
    // Basic Operations
    // =========================================================================

    /// Increments a counter (atomic operation).
    ///
    /// Creates the key with value 1 if it doesn't exist.
    ///
    /// ## Returns
    ///
    /// The new value after incrementing.
    pub async fn incr(&self, key: &str) -> Result<i64, ApiError> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1).await.map_err(ApiError::RedisError)
    }

    /// Sets TTL on an existing key.
    ///
    /// ## Returns
    ///
    /// - `true` - TTL was set
    /// - `false` - Key doesn't exist
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, ApiError> {
        let mut conn = self.conn.clone();
        conn.expire(key, ttl.as_secs() as i64)
            .await
            .map_err(ApiError::RedisError)
    }

    /// Deletes a key.
    ///
    /// ## Returns
    ///
    /// - `true` - Key was deleted
    /// - `false` - Key didn't exist
    pub async fn delete(&self, key: &str) -> Result<bool, ApiError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = conn.del(key).await.map_err(ApiError::RedisError)?;
        Ok(deleted > 0)
    }

    /// Health check - verifies Redis is responding.
    pub async fn ping(&self) -> Result<(), ApiError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(ApiError::RedisError)?;
        Ok(())
    }

    // =========================================================================
    // Fixed-Window Counters (Rate Limiting)
    // =========================================================================

    /// Increments a fixed-window counter, arming its expiry on first use.
    ///
    /// Returns the new count within the window. Use this to implement a
    /// per-token ingest budget:
    ///
    /// ```rust,ignore
    /// let count = redis.increment_window(&key, Duration::from_secs(60)).await?;
    /// if count > limit {
    ///     return Err(ApiError::TooManyRequests { retry_after_seconds: 60 });
    /// }
    /// ```
    ///
    /// The counter automatically expires when the window passes, so a
    /// burst that stops is forgotten without cleanup jobs.
    pub async fn increment_window(&self, key: &str, window: Duration) -> Result<i64, ApiError> {
        let count = self.incr(key).await?;

        // Arm the expiry on the first hit of the window
        if count == 1 {
            self.expire(key, window).await?;
        }

        Ok(count)
    }
}

// Hide internal state in Debug output
impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient").finish_non_exhaustive()
    }
}
