//! # Session Repository
//!
//! Session lookup, locking and creation. Writes to one session are
//! serialized by acquiring a transactional row lock before the session
//! is touched; sessions of different customers proceed in parallel.

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgConnection, Row};

use crate::domain::{NewSession, Session};

use super::Result;

/// Repository for session operations.
pub struct SessionRepository;

impl SessionRepository {
    /// Locks and returns a session by id, scoped to the website.
    ///
    /// Used for client-supplied session hints; the caller still checks
    /// the activity window before reusing the row.
    pub async fn lock_by_id(
        conn: &mut PgConnection,
        website_id: i64,
        session_id: i64,
    ) -> Result<Option<Session>> {
        let row = sqlx::query(
            r#"
            SELECT session_id, website_id, customer_id, started_at, ended_at,
                   landing_page_id, referrer_domain_id, landing_url, referrer_url,
                   ip, user_agent, is_bot
            FROM tracking.sessions
            WHERE session_id = $1 AND website_id = $2
            FOR UPDATE
            "#,
        )
        .bind(session_id)
        .bind(website_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(|r| map_session_row(&r)))
    }

    /// Locks and returns the customer's most recent open session started
    /// after `window_start`, if one exists.
    pub async fn lock_active_for_customer(
        conn: &mut PgConnection,
        customer_id: i64,
        window_start: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let row = sqlx::query(
            r#"
            SELECT session_id, website_id, customer_id, started_at, ended_at,
                   landing_page_id, referrer_domain_id, landing_url, referrer_url,
                   ip, user_agent, is_bot
            FROM tracking.sessions
            WHERE customer_id = $1
              AND ended_at IS NULL
              AND started_at > $2
            ORDER BY started_at DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(customer_id)
        .bind(window_start)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(|r| map_session_row(&r)))
    }

    /// Finds the most recent session from a client IP on a website,
    /// started after `window_start`. Drives IP-based cookie stitching.
    pub async fn find_recent_by_ip(
        conn: &mut PgConnection,
        website_id: i64,
        ip: &str,
        window_start: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let row = sqlx::query(
            r#"
            SELECT session_id, website_id, customer_id, started_at, ended_at,
                   landing_page_id, referrer_domain_id, landing_url, referrer_url,
                   ip, user_agent, is_bot
            FROM tracking.sessions
            WHERE website_id = $1
              AND ip = $2
              AND started_at > $3
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(website_id)
        .bind(ip)
        .bind(window_start)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(|r| map_session_row(&r)))
    }

    /// Creates a session.
    pub async fn create(conn: &mut PgConnection, session: NewSession) -> Result<Session> {
        let row = sqlx::query(
            r#"
            INSERT INTO tracking.sessions (
                website_id, customer_id, started_at, landing_page_id,
                referrer_domain_id, landing_url, referrer_url, ip, user_agent, is_bot
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING session_id, website_id, customer_id, started_at, ended_at,
                      landing_page_id, referrer_domain_id, landing_url, referrer_url,
                      ip, user_agent, is_bot
            "#,
        )
        .bind(session.website_id)
        .bind(session.customer_id)
        .bind(session.started_at)
        .bind(session.landing_page_id)
        .bind(session.referrer_domain_id)
        .bind(&session.landing_url)
        .bind(&session.referrer_url)
        .bind(&session.ip)
        .bind(&session.user_agent)
        .bind(session.is_bot)
        .fetch_one(&mut *conn)
        .await?;

        Ok(map_session_row(&row))
    }
}

// =============================================================================
// ROW MAPPING
// =============================================================================

fn map_session_row(row: &PgRow) -> Session {
    Session {
        session_id: row.get("session_id"),
        website_id: row.get("website_id"),
        customer_id: row.get("customer_id"),
        started_at: row.get("started_at"),
        ended_at: row.get("ended_at"),
        landing_page_id: row.get("landing_page_id"),
        referrer_domain_id: row.get("referrer_domain_id"),
        landing_url: row.get("landing_url"),
        referrer_url: row.get("referrer_url"),
        ip: row.get("ip"),
        user_agent: row.get("user_agent"),
        is_bot: row.get("is_bot"),
    }
}
