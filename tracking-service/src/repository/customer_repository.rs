//! # Customer Repository
//!
//! Identity graph data access: identities, customers and the links
//! between them. All operations here run inside the worker transaction,
//! so they take a `PgConnection` rather than the pool.
//!
//! ## Concurrency
//!
//! Two constraints serialize concurrent stitching without advisory locks:
//!
//! - `identities(website_id, kind, value_hash)` is unique, so two workers
//!   seeing the same signal converge on one row;
//! - `customer_identity_links(identity_id)` is unique, so only one of two
//!   racing link inserts wins; the loser re-reads the winner's link.
//!
//! Customer rows are additionally locked (`FOR UPDATE`) before links are
//! attached to them.

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgConnection, Row};
use std::str::FromStr;

use crate::domain::{Customer, CustomerIdentityLink, Identity, IdentityKind, LinkSource};

use super::{RepositoryError, Result};

/// Repository for identity-graph operations.
pub struct CustomerRepository;

impl CustomerRepository {
    // =========================================================================
    // IDENTITY OPERATIONS
    // =========================================================================

    /// Finds or creates an identity, refreshing `updated_at` on every sight.
    ///
    /// The refresh matters: IP-based stitching checks how recently a
    /// customer's cookie identity was seen.
    pub async fn find_or_create_identity(
        conn: &mut PgConnection,
        website_id: i64,
        kind: IdentityKind,
        value_hash: &str,
    ) -> Result<Identity> {
        let row = sqlx::query(
            r#"
            INSERT INTO tracking.identities (website_id, kind, value_hash)
            VALUES ($1, $2, $3)
            ON CONFLICT (website_id, kind, value_hash)
                DO UPDATE SET updated_at = NOW()
            RETURNING identity_id, website_id, kind, value_hash, created_at, updated_at
            "#,
        )
        .bind(website_id)
        .bind(kind.to_string())
        .bind(value_hash)
        .fetch_one(&mut *conn)
        .await?;

        map_identity_row(&row)
    }

    /// Finds the link binding an identity to its customer, if any.
    pub async fn find_link_for_identity(
        conn: &mut PgConnection,
        identity_id: i64,
    ) -> Result<Option<CustomerIdentityLink>> {
        let row = sqlx::query(
            r#"
            SELECT link_id, customer_id, identity_id, confidence, source,
                   created_at, updated_at
            FROM tracking.customer_identity_links
            WHERE identity_id = $1
            "#,
        )
        .bind(identity_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|r| map_link_row(&r)).transpose()
    }

    /// Attaches an identity to a customer.
    ///
    /// Returns `false` when another transaction linked this identity
    /// first; the caller should re-read the link and use its customer.
    pub async fn create_link(
        conn: &mut PgConnection,
        customer_id: i64,
        identity_id: i64,
        confidence: f64,
        source: LinkSource,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO tracking.customer_identity_links
                (customer_id, identity_id, confidence, source)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (identity_id) DO NOTHING
            "#,
        )
        .bind(customer_id)
        .bind(identity_id)
        .bind(confidence)
        .bind(source.to_string())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // CUSTOMER OPERATIONS
    // =========================================================================

    /// Looks up a customer scoped to a website.
    pub async fn find_customer(
        conn: &mut PgConnection,
        website_id: i64,
        customer_id: i64,
    ) -> Result<Option<Customer>> {
        let row = sqlx::query(
            r#"
            SELECT customer_id, website_id, status, email_hash,
                   first_touch_id, last_touch_id, created_at, updated_at
            FROM tracking.customers
            WHERE customer_id = $1 AND website_id = $2
            "#,
        )
        .bind(customer_id)
        .bind(website_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(|r| map_customer_row(&r)))
    }

    /// Locks a customer row for the remainder of the transaction.
    ///
    /// Taken before attaching links or rewriting touch references so that
    /// concurrent stitching against the same customer serializes.
    pub async fn lock_customer(
        conn: &mut PgConnection,
        customer_id: i64,
    ) -> Result<Option<Customer>> {
        let row = sqlx::query(
            r#"
            SELECT customer_id, website_id, status, email_hash,
                   first_touch_id, last_touch_id, created_at, updated_at
            FROM tracking.customers
            WHERE customer_id = $1
            FOR UPDATE
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(|r| map_customer_row(&r)))
    }

    /// Creates a customer, optionally seeding its `email_hash` column.
    pub async fn create_customer(
        conn: &mut PgConnection,
        website_id: i64,
        email_hash: Option<&str>,
    ) -> Result<Customer> {
        let row = sqlx::query(
            r#"
            INSERT INTO tracking.customers (website_id, status, email_hash)
            VALUES ($1, 'active', $2)
            RETURNING customer_id, website_id, status, email_hash,
                      first_touch_id, last_touch_id, created_at, updated_at
            "#,
        )
        .bind(website_id)
        .bind(email_hash)
        .fetch_one(&mut *conn)
        .await?;

        Ok(map_customer_row(&row))
    }

    /// Finds a customer reachable from an email hash: either directly on
    /// the `email_hash` column or through a linked `email_hash` identity
    /// with the same hash.
    pub async fn find_customer_by_email_hash(
        conn: &mut PgConnection,
        website_id: i64,
        email_hash: &str,
    ) -> Result<Option<i64>> {
        let row = sqlx::query(
            r#"
            SELECT c.customer_id
            FROM tracking.customers c
            WHERE c.website_id = $1 AND c.email_hash = $2
            UNION
            SELECT l.customer_id
            FROM tracking.customer_identity_links l
            JOIN tracking.identities i ON i.identity_id = l.identity_id
            WHERE i.website_id = $1 AND i.kind = 'email_hash' AND i.value_hash = $2
            LIMIT 1
            "#,
        )
        .bind(website_id)
        .bind(email_hash)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(|r| r.get("customer_id")))
    }

    /// Returns `true` when the customer has a cookie identity refreshed
    /// after `since`.
    ///
    /// A customer whose cookie was seen recently still has a live browser
    /// identity; attaching a second cookie to them via IP correlation
    /// would conflate two visitors behind one NAT.
    pub async fn has_recent_cookie_identity(
        conn: &mut PgConnection,
        customer_id: i64,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM tracking.customer_identity_links l
                JOIN tracking.identities i ON i.identity_id = l.identity_id
                WHERE l.customer_id = $1
                  AND i.kind = 'cookie'
                  AND i.updated_at > $2
            ) AS present
            "#,
        )
        .bind(customer_id)
        .bind(since)
        .fetch_one(&mut *conn)
        .await?;

        Ok(row.get("present"))
    }

    /// Copies an email hash onto a customer that does not have one yet.
    pub async fn set_email_hash_if_absent(
        conn: &mut PgConnection,
        customer_id: i64,
        email_hash: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tracking.customers
            SET email_hash = $2, updated_at = NOW()
            WHERE customer_id = $1 AND email_hash IS NULL
            "#,
        )
        .bind(customer_id)
        .bind(email_hash)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Points the customer's touch references at a touch: `first_touch_id`
    /// only when unset, `last_touch_id` always.
    pub async fn update_touch_refs(
        conn: &mut PgConnection,
        customer_id: i64,
        touch_id: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tracking.customers
            SET first_touch_id = COALESCE(first_touch_id, $2),
                last_touch_id = $2,
                updated_at = NOW()
            WHERE customer_id = $1
            "#,
        )
        .bind(customer_id)
        .bind(touch_id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

// =============================================================================
// ROW MAPPING
// =============================================================================

fn map_identity_row(row: &PgRow) -> Result<Identity> {
    let kind: String = row.get("kind");
    Ok(Identity {
        identity_id: row.get("identity_id"),
        website_id: row.get("website_id"),
        kind: IdentityKind::from_str(&kind).map_err(RepositoryError::CorruptRow)?,
        value_hash: row.get("value_hash"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn map_link_row(row: &PgRow) -> Result<CustomerIdentityLink> {
    let source: String = row.get("source");
    Ok(CustomerIdentityLink {
        link_id: row.get("link_id"),
        customer_id: row.get("customer_id"),
        identity_id: row.get("identity_id"),
        confidence: row.get("confidence"),
        source: LinkSource::from_str(&source).map_err(RepositoryError::CorruptRow)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn map_customer_row(row: &PgRow) -> Customer {
    Customer {
        customer_id: row.get("customer_id"),
        website_id: row.get("website_id"),
        status: row.get("status"),
        email_hash: row.get("email_hash"),
        first_touch_id: row.get("first_touch_id"),
        last_touch_id: row.get("last_touch_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
