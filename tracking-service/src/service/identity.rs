//! # Identity Resolution
//!
//! Maps the identity signals of one request to exactly one customer,
//! applying the strongest available signal first:
//!
//! ```text
//! 1. explicit customer_id  ─── exists for this website? use it
//! 2. identity match        ─── linked identity? use its customer
//! 3. email cross-match     ─── email_hash reaches a customer? stitch (0.95)
//! 4. IP cookie stitching   ─── recent session from same IP? stitch (0.7)
//! 5. create customer       ─── fresh customer + link by kind confidence
//! ```
//!
//! With no identity and no explicit customer id the resolver returns
//! `None`; fingerprint-based customer creation is deliberately not
//! implemented (the false-positive rate is considered too high).

use chrono::{Duration, Utc};
use sqlx::PgConnection;
use tracing::debug;

use shared::config::TrackingConfig;

use crate::domain::{IdentityKind, IdentitySignal, IngestJob, LinkSource};
use crate::repository::{CustomerRepository, RepositoryError, Result, SessionRepository};

/// Confidence recorded for an email cross-match link.
const EMAIL_STITCH_CONFIDENCE: f64 = 0.95;
/// Confidence recorded for an IP-correlation link.
const IP_STITCH_CONFIDENCE: f64 = 0.7;

/// Resolves the customer for one ingest job.
///
/// Returns the customer id, or `None` when the request carries no usable
/// signal. Runs inside the worker transaction; every stitch locks the
/// target customer row first.
pub async fn resolve_customer(
    conn: &mut PgConnection,
    config: &TrackingConfig,
    job: &IngestJob,
) -> Result<Option<i64>> {
    // 1. Explicit customer reference, scoped to the website
    if let Some(customer_id) = job.customer_id {
        if let Some(customer) =
            CustomerRepository::find_customer(conn, job.website_id, customer_id).await?
        {
            debug!(
                website_id = job.website_id,
                idempotency_key = %job.idempotency_key,
                step = "identity_resolve",
                customer_id = customer.customer_id,
                "Explicit customer reference"
            );
            return Ok(Some(customer.customer_id));
        }
    }

    let Some(signal) = job.identity.as_ref() else {
        return Ok(None);
    };

    // 2. Identity match
    let identity = CustomerRepository::find_or_create_identity(
        conn,
        job.website_id,
        signal.kind,
        &signal.value_hash,
    )
    .await?;

    if let Some(link) = CustomerRepository::find_link_for_identity(conn, identity.identity_id).await? {
        return Ok(Some(link.customer_id));
    }

    // 3. Email cross-match
    if signal.kind == IdentityKind::EmailHash {
        if let Some(customer_id) =
            CustomerRepository::find_customer_by_email_hash(conn, job.website_id, &signal.value_hash)
                .await?
        {
            let linked = stitch(
                conn,
                customer_id,
                identity.identity_id,
                EMAIL_STITCH_CONFIDENCE,
            )
            .await?;
            CustomerRepository::set_email_hash_if_absent(conn, linked, &signal.value_hash).await?;

            debug!(
                website_id = job.website_id,
                idempotency_key = %job.idempotency_key,
                step = "identity_resolve",
                customer_id = linked,
                "Email cross-match stitch"
            );
            return Ok(Some(linked));
        }
    }

    // 4. IP-based cookie stitching
    if signal.kind == IdentityKind::Cookie {
        if let Some(customer_id) = ip_stitch_candidate(conn, config, job).await? {
            let linked = stitch(conn, customer_id, identity.identity_id, IP_STITCH_CONFIDENCE).await?;

            debug!(
                website_id = job.website_id,
                idempotency_key = %job.idempotency_key,
                step = "identity_resolve",
                customer_id = linked,
                "IP correlation stitch"
            );
            return Ok(Some(linked));
        }
    }

    // 5. Fresh customer
    let email_hash = (signal.kind == IdentityKind::EmailHash).then_some(signal.value_hash.as_str());
    let customer = CustomerRepository::create_customer(conn, job.website_id, email_hash).await?;

    let created = CustomerRepository::create_link(
        conn,
        customer.customer_id,
        identity.identity_id,
        signal.kind.default_confidence(),
        signal.kind.default_link_source(),
    )
    .await?;

    if !created {
        // Another transaction linked this identity between our link check
        // and the insert; their customer wins, ours stays empty.
        let link = CustomerRepository::find_link_for_identity(conn, identity.identity_id)
            .await?
            .ok_or_else(|| {
                RepositoryError::NotFound(format!("link for identity {}", identity.identity_id))
            })?;
        return Ok(Some(link.customer_id));
    }

    debug!(
        website_id = job.website_id,
        idempotency_key = %job.idempotency_key,
        step = "identity_resolve",
        customer_id = customer.customer_id,
        kind = %signal.kind,
        "Customer created"
    );
    Ok(Some(customer.customer_id))
}

/// Finds the customer an anonymous cookie may be stitched to via IP
/// correlation.
///
/// The most recent session from the same client IP inside the stitch
/// window nominates its customer; the nomination only stands when that
/// customer has no cookie identity refreshed inside the cookie-presence
/// window (a live cookie means a different browser is already active).
async fn ip_stitch_candidate(
    conn: &mut PgConnection,
    config: &TrackingConfig,
    job: &IngestJob,
) -> Result<Option<i64>> {
    let Some(ip) = job.ip.as_deref() else {
        return Ok(None);
    };

    let window_start = Utc::now() - Duration::hours(config.ip_stitch_window_hours);
    let Some(session) =
        SessionRepository::find_recent_by_ip(conn, job.website_id, ip, window_start).await?
    else {
        return Ok(None);
    };

    let cookie_cutoff = Utc::now() - Duration::minutes(config.cookie_presence_window_minutes);
    let cookie_active =
        CustomerRepository::has_recent_cookie_identity(conn, session.customer_id, cookie_cutoff)
            .await?;

    Ok((!cookie_active).then_some(session.customer_id))
}

/// Locks the customer and attaches a heuristic link to it.
///
/// When the unique constraint on the identity says another transaction
/// linked first, the winner's customer is returned instead.
async fn stitch(
    conn: &mut PgConnection,
    customer_id: i64,
    identity_id: i64,
    confidence: f64,
) -> Result<i64> {
    CustomerRepository::lock_customer(conn, customer_id)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("customer {}", customer_id)))?;

    let created = CustomerRepository::create_link(
        conn,
        customer_id,
        identity_id,
        confidence,
        LinkSource::Heuristic,
    )
    .await?;

    if created {
        return Ok(customer_id);
    }

    let link = CustomerRepository::find_link_for_identity(conn, identity_id)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("link for identity {}", identity_id)))?;
    Ok(link.customer_id)
}

/// Builds the hashed identity signal for a raw identity value.
///
/// Exposed for the API layer so hashing happens before anything is
/// persisted or enqueued.
pub fn hash_identity_value(kind: IdentityKind, value: &str) -> IdentitySignal {
    IdentitySignal {
        kind,
        value_hash: shared::auth::token::hash_token(value),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_identity_value_is_sha256_hex() {
        let signal = hash_identity_value(IdentityKind::Cookie, "c1");
        assert_eq!(signal.kind, IdentityKind::Cookie);
        assert_eq!(signal.value_hash.len(), 64);
        assert!(signal.value_hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_identity_value_is_deterministic() {
        let a = hash_identity_value(IdentityKind::EmailHash, "E");
        let b = hash_identity_value(IdentityKind::EmailHash, "E");
        assert_eq!(a.value_hash, b.value_hash);

        let c = hash_identity_value(IdentityKind::EmailHash, "F");
        assert_ne!(a.value_hash, c.value_hash);
    }

    #[test]
    fn test_stitch_confidences_match_contract() {
        assert_eq!(EMAIL_STITCH_CONFIDENCE, 0.95);
        assert_eq!(IP_STITCH_CONFIDENCE, 0.7);
    }
}
