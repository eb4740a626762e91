//! # Dimension Repository
//!
//! Interning of string-valued dimensions (referrer domains, landing
//! pages, UTM parameter/value pairs) and the polymorphic UTM bindings.
//!
//! ## Interning Under Concurrency
//!
//! Every intern follows `INSERT ... ON CONFLICT DO NOTHING` + read. Two
//! transactions interning the same key both end up with the winner's row
//! id; neither observes a unique-constraint error. Reading-then-inserting
//! without the conflict clause would race.

use sqlx::{postgres::PgRow, PgConnection, Row};
use std::str::FromStr;

use crate::domain::{
    LandingPage, ReferrerCategory, ReferrerDomain, TrackableKind, UtmSet,
};

use super::{RepositoryError, Result};

/// Repository for dimension interning.
pub struct DimensionRepository;

impl DimensionRepository {
    // =========================================================================
    // REFERRER DOMAINS
    // =========================================================================

    /// Interns a `(website, domain)` pair.
    ///
    /// The category is computed by the caller from the domain string and
    /// only written on first sight; later requests with a different
    /// classification table revision do not rewrite history.
    pub async fn intern_referrer_domain(
        conn: &mut PgConnection,
        website_id: i64,
        domain: &str,
        category: ReferrerCategory,
    ) -> Result<ReferrerDomain> {
        sqlx::query(
            r#"
            INSERT INTO tracking.referrer_domains (website_id, domain, category)
            VALUES ($1, $2, $3)
            ON CONFLICT (website_id, domain) DO NOTHING
            "#,
        )
        .bind(website_id)
        .bind(domain)
        .bind(category.to_string())
        .execute(&mut *conn)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT referrer_domain_id, website_id, domain, category
            FROM tracking.referrer_domains
            WHERE website_id = $1 AND domain = $2
            "#,
        )
        .bind(website_id)
        .bind(domain)
        .fetch_one(&mut *conn)
        .await?;

        map_referrer_domain_row(&row)
    }

    // =========================================================================
    // LANDING PAGES
    // =========================================================================

    /// Interns a `(website, path)` pair. `url_sample` is stored only when
    /// the row is created.
    pub async fn intern_landing_page(
        conn: &mut PgConnection,
        website_id: i64,
        path: &str,
        url_sample: Option<&str>,
    ) -> Result<LandingPage> {
        sqlx::query(
            r#"
            INSERT INTO tracking.landing_pages (website_id, path, url_sample)
            VALUES ($1, $2, $3)
            ON CONFLICT (website_id, path) DO NOTHING
            "#,
        )
        .bind(website_id)
        .bind(path)
        .bind(url_sample)
        .execute(&mut *conn)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT landing_page_id, website_id, path, url_sample
            FROM tracking.landing_pages
            WHERE website_id = $1 AND path = $2
            "#,
        )
        .bind(website_id)
        .bind(path)
        .fetch_one(&mut *conn)
        .await?;

        Ok(LandingPage {
            landing_page_id: row.get("landing_page_id"),
            website_id: row.get("website_id"),
            path: row.get("path"),
            url_sample: row.get("url_sample"),
        })
    }

    // =========================================================================
    // UTM PARAMETERS AND VALUES
    // =========================================================================

    /// Interns one `(website, name) -> (parameter, value)` pair and
    /// returns the value id.
    pub async fn intern_utm_value(
        conn: &mut PgConnection,
        website_id: i64,
        name: &str,
        value: &str,
    ) -> Result<i64> {
        sqlx::query(
            r#"
            INSERT INTO tracking.custom_utm_parameters (website_id, name)
            VALUES ($1, $2)
            ON CONFLICT (website_id, name) DO NOTHING
            "#,
        )
        .bind(website_id)
        .bind(name)
        .execute(&mut *conn)
        .await?;

        let parameter_id: i64 = sqlx::query(
            r#"
            SELECT parameter_id
            FROM tracking.custom_utm_parameters
            WHERE website_id = $1 AND name = $2
            "#,
        )
        .bind(website_id)
        .bind(name)
        .fetch_one(&mut *conn)
        .await?
        .get("parameter_id");

        sqlx::query(
            r#"
            INSERT INTO tracking.custom_utm_values (parameter_id, value)
            VALUES ($1, $2)
            ON CONFLICT (parameter_id, value) DO NOTHING
            "#,
        )
        .bind(parameter_id)
        .bind(value)
        .execute(&mut *conn)
        .await?;

        let utm_value_id: i64 = sqlx::query(
            r#"
            SELECT utm_value_id
            FROM tracking.custom_utm_values
            WHERE parameter_id = $1 AND value = $2
            "#,
        )
        .bind(parameter_id)
        .bind(value)
        .fetch_one(&mut *conn)
        .await?
        .get("utm_value_id");

        Ok(utm_value_id)
    }

    /// Interns a whole UTM set, returning the value ids in key order.
    pub async fn intern_utm_set(
        conn: &mut PgConnection,
        website_id: i64,
        utms: &UtmSet,
    ) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(utms.len());
        for (name, value) in utms.iter() {
            ids.push(Self::intern_utm_value(conn, website_id, name, value).await?);
        }
        Ok(ids)
    }

    // =========================================================================
    // POLYMORPHIC BINDINGS
    // =========================================================================

    /// Binds UTM values to a trackable, idempotently.
    pub async fn bind_utm_values(
        conn: &mut PgConnection,
        kind: TrackableKind,
        trackable_id: i64,
        utm_value_ids: &[i64],
    ) -> Result<()> {
        for utm_value_id in utm_value_ids {
            sqlx::query(
                r#"
                INSERT INTO tracking.trackable_utm_values
                    (trackable_kind, trackable_id, utm_value_id)
                VALUES ($1, $2, $3)
                ON CONFLICT (trackable_kind, trackable_id, utm_value_id) DO NOTHING
                "#,
            )
            .bind(kind.to_string())
            .bind(trackable_id)
            .bind(utm_value_id)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    /// Reads the UTM set bound to a trackable, reconstructing stripped
    /// parameter names. Used to compute `utm_last` / `utm_first`
    /// snapshots from touches.
    pub async fn utm_set_for(
        conn: &mut PgConnection,
        kind: TrackableKind,
        trackable_id: i64,
    ) -> Result<UtmSet> {
        let rows = sqlx::query(
            r#"
            SELECT p.name, v.value
            FROM tracking.trackable_utm_values t
            JOIN tracking.custom_utm_values v ON v.utm_value_id = t.utm_value_id
            JOIN tracking.custom_utm_parameters p ON p.parameter_id = v.parameter_id
            WHERE t.trackable_kind = $1 AND t.trackable_id = $2
            ORDER BY p.name
            "#,
        )
        .bind(kind.to_string())
        .bind(trackable_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("name"), r.get::<String, _>("value")))
            .collect())
    }
}

// =============================================================================
// ROW MAPPING
// =============================================================================

fn map_referrer_domain_row(row: &PgRow) -> Result<ReferrerDomain> {
    let category: String = row.get("category");
    Ok(ReferrerDomain {
        referrer_domain_id: row.get("referrer_domain_id"),
        website_id: row.get("website_id"),
        domain: row.get("domain"),
        category: ReferrerCategory::from_str(&category).map_err(RepositoryError::CorruptRow)?,
    })
}
