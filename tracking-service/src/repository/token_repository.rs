//! # Token Repository
//!
//! Lookup and bookkeeping for ingestion tokens.

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::domain::{IngestionToken, Website};

use super::Result;

/// Repository for ingestion-token operations.
#[derive(Clone)]
pub struct TokenRepository {
    pool: PgPool,
}

impl TokenRepository {
    /// Creates a new repository instance with a PostgreSQL pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Finds a non-revoked token by its public prefix.
    ///
    /// Revoked tokens are filtered here; expiry and hash verification are
    /// the authenticator's job so that the two failure modes produce
    /// distinguishable log lines (but identical client responses).
    pub async fn find_active_by_prefix(&self, prefix: &str) -> Result<Option<IngestionToken>> {
        let row = sqlx::query(
            r#"
            SELECT token_id, website_id, prefix, token_hash, ip_allowlist,
                   expires_at, revoked_at, last_used_at, created_at
            FROM tracking.ingestion_tokens
            WHERE prefix = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(prefix)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| map_token_row(&r)))
    }

    /// Resolves the website a token belongs to.
    pub async fn find_website(&self, website_id: i64) -> Result<Option<Website>> {
        let row = sqlx::query(
            r#"
            SELECT website_id, status, created_at
            FROM tracking.websites
            WHERE website_id = $1
            "#,
        )
        .bind(website_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Website {
            website_id: r.get("website_id"),
            status: r.get("status"),
            created_at: r.get("created_at"),
        }))
    }

    /// Records token usage, best-effort.
    ///
    /// Called from a spawned task after successful authentication; the
    /// ingest response never waits on this write.
    pub async fn touch_last_used(&self, token_id: i64, used_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tracking.ingestion_tokens
            SET last_used_at = $2
            WHERE token_id = $1
            "#,
        )
        .bind(token_id)
        .bind(used_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Maps a database row to an `IngestionToken`.
fn map_token_row(row: &PgRow) -> IngestionToken {
    IngestionToken {
        token_id: row.get("token_id"),
        website_id: row.get("website_id"),
        // CHAR(12) comes back space-padded when shorter; normalize anyway
        prefix: row.get::<String, _>("prefix").trim_end().to_string(),
        token_hash: row.get("token_hash"),
        ip_allowlist: row.get("ip_allowlist"),
        expires_at: row.get("expires_at"),
        revoked_at: row.get("revoked_at"),
        last_used_at: row.get("last_used_at"),
        created_at: row.get("created_at"),
    }
}
