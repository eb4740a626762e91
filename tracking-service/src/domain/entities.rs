//! # Tracking Domain Entities
//!
//! Core entities for the ingestion system. Every entity is scoped to a
//! website (the tenant boundary) and carries opaque `i64` identifiers.
//!
//! ## Entity Hierarchy
//!
//! ```text
//! Website (tenant root, created out-of-band)
//! ├── IngestionToken        (authentication)
//! ├── Customer ── CustomerIdentityLink ── Identity
//! │   └── Session ── Event / Touch / Conversion
//! └── ReferrerDomain / LandingPage / CustomUtmParameter / CustomUtmValue
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value_objects::{
    IdentityKind, JobStatus, LinkSource, ReferrerCategory, TouchKind,
};

// =============================================================================
// TENANCY
// =============================================================================

/// A tracked website. Created by the admin surface; the ingestion core
/// only reads it.
#[derive(Debug, Clone, Serialize)]
pub struct Website {
    pub website_id: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// A per-site ingestion token.
///
/// The plaintext is `prefix.secret`; only the SHA-256 hash of the full
/// plaintext is stored. `ip_allowlist`, when present and non-empty,
/// restricts which client addresses may use the token.
#[derive(Debug, Clone)]
pub struct IngestionToken {
    pub token_id: i64,
    pub website_id: i64,
    pub prefix: String,
    pub token_hash: String,
    pub ip_allowlist: Option<Vec<String>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// IDENTITY GRAPH
// =============================================================================

/// A hashed observable pointing at a user. The raw value never touches
/// the database.
#[derive(Debug, Clone)]
pub struct Identity {
    pub identity_id: i64,
    pub website_id: i64,
    pub kind: IdentityKind,
    pub value_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The logical person behind one or more identities.
#[derive(Debug, Clone)]
pub struct Customer {
    pub customer_id: i64,
    pub website_id: i64,
    pub status: String,
    pub email_hash: Option<String>,
    pub first_touch_id: Option<i64>,
    pub last_touch_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Edge between a customer and an identity with stitch provenance.
#[derive(Debug, Clone)]
pub struct CustomerIdentityLink {
    pub link_id: i64,
    pub customer_id: i64,
    pub identity_id: i64,
    pub confidence: f64,
    pub source: LinkSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// SESSIONS
// =============================================================================

/// A time-bounded sequence of events from one customer.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: i64,
    pub website_id: i64,
    pub customer_id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub landing_page_id: Option<i64>,
    pub referrer_domain_id: Option<i64>,
    pub landing_url: Option<String>,
    pub referrer_url: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub is_bot: bool,
}

/// Input for creating a session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub website_id: i64,
    pub customer_id: i64,
    pub started_at: DateTime<Utc>,
    pub landing_page_id: Option<i64>,
    pub referrer_domain_id: Option<i64>,
    pub landing_url: Option<String>,
    pub referrer_url: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub is_bot: bool,
}

// =============================================================================
// DIMENSIONS
// =============================================================================

/// An interned referrer domain.
#[derive(Debug, Clone)]
pub struct ReferrerDomain {
    pub referrer_domain_id: i64,
    pub website_id: i64,
    pub domain: String,
    pub category: ReferrerCategory,
}

/// An interned landing-page path. `url_sample` records the first full URL
/// seen for the path, truncated to 500 characters.
#[derive(Debug, Clone)]
pub struct LandingPage {
    pub landing_page_id: i64,
    pub website_id: i64,
    pub path: String,
    pub url_sample: Option<String>,
}

// =============================================================================
// EVENTS
// =============================================================================

/// A persisted tracking event.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_id: i64,
    pub website_id: i64,
    pub ingestion_token_id: Option<i64>,
    pub session_id: i64,
    pub customer_id: Option<i64>,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub properties: serde_json::Value,
    pub revenue_minor: Option<i64>,
    pub currency: Option<String>,
    pub idempotency_key: String,
    pub referrer_domain_id: Option<i64>,
    pub landing_page_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// The id triple a completed (or deduplicated) ingest resolves to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EventRef {
    pub event_id: i64,
    pub customer_id: Option<i64>,
    pub session_id: Option<i64>,
}

/// Input for inserting an event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub website_id: i64,
    pub ingestion_token_id: Option<i64>,
    pub session_id: i64,
    pub customer_id: Option<i64>,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub properties: serde_json::Value,
    pub revenue_minor: Option<i64>,
    pub currency: Option<String>,
    pub idempotency_key: String,
    pub referrer_domain_id: Option<i64>,
    pub landing_page_id: Option<i64>,
}

// =============================================================================
// TOUCHES
// =============================================================================

/// An acquisition touch attached to a customer and (usually) a session.
#[derive(Debug, Clone)]
pub struct Touch {
    pub touch_id: i64,
    pub website_id: i64,
    pub customer_id: i64,
    pub session_id: Option<i64>,
    pub kind: TouchKind,
    pub occurred_at: DateTime<Utc>,
    pub referrer_domain_id: Option<i64>,
    pub landing_page_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Input for inserting a touch.
#[derive(Debug, Clone)]
pub struct NewTouch {
    pub website_id: i64,
    pub customer_id: i64,
    pub session_id: Option<i64>,
    pub kind: TouchKind,
    pub occurred_at: DateTime<Utc>,
    pub referrer_domain_id: Option<i64>,
    pub landing_page_id: Option<i64>,
}

// =============================================================================
// CONVERSIONS
// =============================================================================

/// Attribution snapshot persisted for a conversion event.
#[derive(Debug, Clone)]
pub struct NewConversion {
    pub event_id: i64,
    pub website_id: i64,
    pub customer_id: i64,
    pub session_id: Option<i64>,
    pub occurred_at: DateTime<Utc>,
    pub value_minor: Option<i64>,
    pub currency: Option<String>,
    pub first_touch_id: Option<i64>,
    pub last_non_direct_touch_id: Option<i64>,
    pub attributed_touch_id: Option<i64>,
    pub attribution_model: String,
    pub utm_current: Option<serde_json::Value>,
    pub utm_attribution: Option<serde_json::Value>,
    pub order_id: Option<String>,
    pub order_number: Option<String>,
}

// =============================================================================
// JOBS
// =============================================================================

/// A durable queue row carrying one validated ingest payload.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: i64,
    pub website_id: i64,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: i32,
    pub run_after: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}
