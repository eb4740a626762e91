//! # Event Repository
//!
//! Persistence for events, touches and conversions.
//!
//! ## Idempotency
//!
//! `events.idempotency_key` carries a global unique constraint. The
//! ingress pre-check and the in-transaction re-check both go through
//! [`EventRepository::find_ref_by_key`]; the insert itself uses
//! `ON CONFLICT DO NOTHING`, so a lost race surfaces as "no row returned"
//! and is converted to a read of the winning row, never an error.

use sqlx::{postgres::PgRow, PgConnection, PgPool, Row};
use std::str::FromStr;

use crate::domain::{
    Event, EventRef, NewConversion, NewEvent, NewTouch, Touch, TouchKind,
};

use super::{is_unique_violation, RepositoryError, Result};

/// Repository for event, touch and conversion persistence.
#[derive(Clone)]
pub struct EventRepository {
    pool: PgPool,
}

impl EventRepository {
    /// Creates a new repository instance with a PostgreSQL pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // IDEMPOTENCY LOOKUPS
    // =========================================================================

    /// Ingress pre-check: resolves an idempotency key to the existing
    /// event ids, if the key has already been processed.
    pub async fn find_ref_by_key_pooled(&self, idempotency_key: &str) -> Result<Option<EventRef>> {
        let row = sqlx::query(EVENT_REF_BY_KEY_SQL)
            .bind(idempotency_key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| map_event_ref_row(&r)))
    }

    /// In-transaction re-check (TOCTOU guard) before inserting.
    pub async fn find_ref_by_key(
        conn: &mut PgConnection,
        idempotency_key: &str,
    ) -> Result<Option<EventRef>> {
        let row = sqlx::query(EVENT_REF_BY_KEY_SQL)
            .bind(idempotency_key)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.map(|r| map_event_ref_row(&r)))
    }

    // =========================================================================
    // EVENT INSERTION
    // =========================================================================

    /// Inserts an event; returns `None` when a concurrent transaction
    /// already inserted the same idempotency key (the caller then
    /// re-reads by key).
    pub async fn insert(conn: &mut PgConnection, event: NewEvent) -> Result<Option<Event>> {
        let row = sqlx::query(
            r#"
            INSERT INTO tracking.events (
                website_id, ingestion_token_id, session_id, customer_id,
                name, occurred_at, properties, revenue_minor, currency,
                idempotency_key, referrer_domain_id, landing_page_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING event_id, website_id, ingestion_token_id, session_id,
                      customer_id, name, occurred_at, properties, revenue_minor,
                      currency, idempotency_key, referrer_domain_id,
                      landing_page_id, created_at
            "#,
        )
        .bind(event.website_id)
        .bind(event.ingestion_token_id)
        .bind(event.session_id)
        .bind(event.customer_id)
        .bind(&event.name)
        .bind(event.occurred_at)
        .bind(&event.properties)
        .bind(event.revenue_minor)
        .bind(&event.currency)
        .bind(&event.idempotency_key)
        .bind(event.referrer_domain_id)
        .bind(event.landing_page_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(|r| map_event_row(&r)))
    }

    // =========================================================================
    // TOUCH OPERATIONS
    // =========================================================================

    /// Finds the landing touch of a session, if one was already emitted.
    pub async fn find_landing_touch(
        conn: &mut PgConnection,
        session_id: i64,
    ) -> Result<Option<Touch>> {
        let row = sqlx::query(
            r#"
            SELECT touch_id, website_id, customer_id, session_id, kind,
                   occurred_at, referrer_domain_id, landing_page_id, created_at
            FROM tracking.touches
            WHERE session_id = $1 AND kind = 'landing'
            "#,
        )
        .bind(session_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|r| map_touch_row(&r)).transpose()
    }

    /// Inserts a touch.
    ///
    /// The partial unique index on `(session_id) WHERE kind = 'landing'`
    /// backstops the one-landing-per-session invariant; the conflict
    /// clause turns a lost race into "no row", and the caller re-reads.
    pub async fn insert_touch(conn: &mut PgConnection, touch: NewTouch) -> Result<Option<Touch>> {
        let row = sqlx::query(
            r#"
            INSERT INTO tracking.touches (
                website_id, customer_id, session_id, kind, occurred_at,
                referrer_domain_id, landing_page_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (session_id) WHERE kind = 'landing' DO NOTHING
            RETURNING touch_id, website_id, customer_id, session_id, kind,
                      occurred_at, referrer_domain_id, landing_page_id, created_at
            "#,
        )
        .bind(touch.website_id)
        .bind(touch.customer_id)
        .bind(touch.session_id)
        .bind(touch.kind.to_string())
        .bind(touch.occurred_at)
        .bind(touch.referrer_domain_id)
        .bind(touch.landing_page_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|r| map_touch_row(&r)).transpose()
    }

    /// Fetches a touch by id.
    pub async fn find_touch(conn: &mut PgConnection, touch_id: i64) -> Result<Option<Touch>> {
        let row = sqlx::query(
            r#"
            SELECT touch_id, website_id, customer_id, session_id, kind,
                   occurred_at, referrer_domain_id, landing_page_id, created_at
            FROM tracking.touches
            WHERE touch_id = $1
            "#,
        )
        .bind(touch_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|r| map_touch_row(&r)).transpose()
    }

    /// The customer's most recent touch with a referrer domain, i.e. the
    /// last touch that did not arrive direct.
    pub async fn find_last_non_direct_touch(
        conn: &mut PgConnection,
        customer_id: i64,
    ) -> Result<Option<Touch>> {
        let row = sqlx::query(
            r#"
            SELECT touch_id, website_id, customer_id, session_id, kind,
                   occurred_at, referrer_domain_id, landing_page_id, created_at
            FROM tracking.touches
            WHERE customer_id = $1 AND referrer_domain_id IS NOT NULL
            ORDER BY occurred_at DESC, touch_id DESC
            LIMIT 1
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|r| map_touch_row(&r)).transpose()
    }

    /// The customer's most recent touch inside one session.
    pub async fn find_latest_touch_in_session(
        conn: &mut PgConnection,
        customer_id: i64,
        session_id: i64,
    ) -> Result<Option<Touch>> {
        let row = sqlx::query(
            r#"
            SELECT touch_id, website_id, customer_id, session_id, kind,
                   occurred_at, referrer_domain_id, landing_page_id, created_at
            FROM tracking.touches
            WHERE customer_id = $1 AND session_id = $2
            ORDER BY occurred_at DESC, touch_id DESC
            LIMIT 1
            "#,
        )
        .bind(customer_id)
        .bind(session_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|r| map_touch_row(&r)).transpose()
    }

    // =========================================================================
    // CONVERSIONS
    // =========================================================================

    /// Inserts a conversion. Returns `false` when one already exists for
    /// the event (idempotent worker replay after a crashed commit).
    pub async fn insert_conversion(
        conn: &mut PgConnection,
        conversion: NewConversion,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO tracking.conversions (
                event_id, website_id, customer_id, session_id, occurred_at,
                value_minor, currency, first_touch_id, last_non_direct_touch_id,
                attributed_touch_id, attribution_model, utm_current,
                utm_attribution, order_id, order_number
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(conversion.event_id)
        .bind(conversion.website_id)
        .bind(conversion.customer_id)
        .bind(conversion.session_id)
        .bind(conversion.occurred_at)
        .bind(conversion.value_minor)
        .bind(&conversion.currency)
        .bind(conversion.first_touch_id)
        .bind(conversion.last_non_direct_touch_id)
        .bind(conversion.attributed_touch_id)
        .bind(&conversion.attribution_model)
        .bind(&conversion.utm_current)
        .bind(&conversion.utm_attribution)
        .bind(&conversion.order_id)
        .bind(&conversion.order_number)
        .execute(&mut *conn)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// ROW MAPPING
// =============================================================================

const EVENT_REF_BY_KEY_SQL: &str = r#"
    SELECT event_id, customer_id, session_id
    FROM tracking.events
    WHERE idempotency_key = $1
"#;

fn map_event_ref_row(row: &PgRow) -> EventRef {
    EventRef {
        event_id: row.get("event_id"),
        customer_id: row.get("customer_id"),
        session_id: row.get("session_id"),
    }
}

fn map_event_row(row: &PgRow) -> Event {
    Event {
        event_id: row.get("event_id"),
        website_id: row.get("website_id"),
        ingestion_token_id: row.get("ingestion_token_id"),
        session_id: row.get("session_id"),
        customer_id: row.get("customer_id"),
        name: row.get("name"),
        occurred_at: row.get("occurred_at"),
        properties: row.get("properties"),
        revenue_minor: row.get("revenue_minor"),
        currency: row.get::<Option<String>, _>("currency").map(|c| c.trim_end().to_string()),
        idempotency_key: row.get("idempotency_key"),
        referrer_domain_id: row.get("referrer_domain_id"),
        landing_page_id: row.get("landing_page_id"),
        created_at: row.get("created_at"),
    }
}

fn map_touch_row(row: &PgRow) -> Result<Touch> {
    let kind: String = row.get("kind");
    Ok(Touch {
        touch_id: row.get("touch_id"),
        website_id: row.get("website_id"),
        customer_id: row.get("customer_id"),
        session_id: row.get("session_id"),
        kind: TouchKind::from_str(&kind).map_err(RepositoryError::CorruptRow)?,
        occurred_at: row.get("occurred_at"),
        referrer_domain_id: row.get("referrer_domain_id"),
        landing_page_id: row.get("landing_page_id"),
        created_at: row.get("created_at"),
    })
}
