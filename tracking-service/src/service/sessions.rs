//! # Sessionization
//!
//! Finds or creates the session for an event under the sliding 30-minute
//! window:
//!
//! ```text
//! client session hint? ──► still open and inside window? ──► reuse
//!         │ no                         │ no
//!         ▼                            ▼
//! customer's latest open session inside window ──► reuse
//!         │ none
//!         ▼
//! create session (started_at = request timestamp)
//! ```
//!
//! Campaign-change breaks are reserved but not active in this revision;
//! the only break conditions are the inactivity window (encoded in the
//! lookup queries) and explicit closure (`ended_at` set).

use chrono::{DateTime, Duration, Utc};
use sqlx::PgConnection;
use tracing::debug;

use shared::config::TrackingConfig;

use crate::domain::{IngestJob, NewSession, Session, TrackableKind};
use crate::repository::{DimensionRepository, Result, SessionRepository};

use super::dimensions::NormalizedDimensions;

/// User-agent fragments that mark automated traffic.
const BOT_MARKERS: [&str; 6] = [
    "bot", "crawler", "spider", "scraper", "googlebot", "bingbot",
];

/// Returns `true` when the user agent matches the bot pattern.
///
/// Deterministic for a fixed input string; matching is case-insensitive
/// substring search.
pub fn is_bot_user_agent(user_agent: &str) -> bool {
    let ua = user_agent.to_ascii_lowercase();
    BOT_MARKERS.iter().any(|marker| ua.contains(marker))
}

/// Decides whether an existing session may absorb an event observed at
/// `now` under the configured inactivity window.
pub fn is_session_open(session: &Session, now: DateTime<Utc>, timeout: Duration) -> bool {
    session.ended_at.is_none() && session.started_at > now - timeout
}

/// Finds or creates the session for a job, binding the request's UTM
/// values to it either way.
///
/// The chosen session row is locked for the rest of the transaction, so
/// concurrent events targeting the same session serialize here.
pub async fn resolve_session(
    conn: &mut PgConnection,
    config: &TrackingConfig,
    job: &IngestJob,
    customer_id: i64,
    dims: &NormalizedDimensions,
) -> Result<Session> {
    let now = Utc::now();
    let timeout = Duration::minutes(config.session_timeout_minutes);

    let session = match find_reusable_session(conn, job, customer_id, now, timeout).await? {
        Some(session) => session,
        None => {
            let session = SessionRepository::create(
                conn,
                NewSession {
                    website_id: job.website_id,
                    customer_id,
                    started_at: job.occurred_at,
                    landing_page_id: dims.landing_page_id(),
                    referrer_domain_id: dims.referrer_domain_id(),
                    landing_url: job.url.clone(),
                    referrer_url: job.referrer.clone(),
                    ip: job.ip.clone(),
                    user_agent: job.user_agent.clone(),
                    is_bot: job.user_agent.as_deref().map(is_bot_user_agent).unwrap_or(false),
                },
            )
            .await?;

            debug!(
                website_id = job.website_id,
                idempotency_key = %job.idempotency_key,
                step = "sessionize",
                session_id = session.session_id,
                "Session created"
            );
            session
        }
    };

    DimensionRepository::bind_utm_values(
        conn,
        TrackableKind::Session,
        session.session_id,
        &dims.utm_value_ids,
    )
    .await?;

    Ok(session)
}

/// Tries the client hint first, then the customer's latest open session.
///
/// A hint is honored for any still-active session of the website (not
/// pinned to the resolved customer, matching the source behavior).
async fn find_reusable_session(
    conn: &mut PgConnection,
    job: &IngestJob,
    customer_id: i64,
    now: DateTime<Utc>,
    timeout: Duration,
) -> Result<Option<Session>> {
    if let Some(session_id) = job.session_id {
        if let Some(session) =
            SessionRepository::lock_by_id(conn, job.website_id, session_id).await?
        {
            if is_session_open(&session, now, timeout) {
                return Ok(Some(session));
            }
        }
    }

    SessionRepository::lock_active_for_customer(conn, customer_id, now - timeout).await
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn session(started_mins_ago: i64, ended: bool) -> Session {
        let now = Utc::now();
        Session {
            session_id: 1,
            website_id: 1,
            customer_id: 1,
            started_at: now - Duration::minutes(started_mins_ago),
            ended_at: ended.then_some(now),
            landing_page_id: None,
            referrer_domain_id: None,
            landing_url: None,
            referrer_url: None,
            ip: None,
            user_agent: None,
            is_bot: false,
        }
    }

    #[test]
    fn test_bot_detection_matches_known_crawlers() {
        assert!(is_bot_user_agent("Mozilla/5.0 (compatible; Googlebot/2.1)"));
        assert!(is_bot_user_agent("bingbot/2.0"));
        assert!(is_bot_user_agent("some-crawler/1.0"));
        assert!(is_bot_user_agent("DataScraper 3000"));
        assert!(is_bot_user_agent("web spider"));
    }

    #[test]
    fn test_bot_detection_passes_real_browsers() {
        assert!(!is_bot_user_agent(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36"
        ));
        assert!(!is_bot_user_agent("curl/8.4.0"));
    }

    #[test]
    fn test_bot_detection_is_deterministic() {
        let ua = "Mozilla/5.0 (compatible; Googlebot/2.1)";
        let first = is_bot_user_agent(ua);
        for _ in 0..10 {
            assert_eq!(is_bot_user_agent(ua), first);
        }
    }

    #[test]
    fn test_session_open_inside_window() {
        let s = session(10, false);
        assert!(is_session_open(&s, Utc::now(), Duration::minutes(30)));
    }

    #[test]
    fn test_session_closed_by_inactivity() {
        let s = session(45, false);
        assert!(!is_session_open(&s, Utc::now(), Duration::minutes(30)));
    }

    #[test]
    fn test_session_closed_explicitly() {
        let s = session(5, true);
        assert!(!is_session_open(&s, Utc::now(), Duration::minutes(30)));
    }

    #[test]
    fn test_session_window_boundary() {
        // Exactly at the boundary is closed: the window is strict
        let now = Utc::now();
        let mut s = session(0, false);
        s.started_at = now - Duration::minutes(30);
        assert!(!is_session_open(&s, now, Duration::minutes(30)));
    }
}
