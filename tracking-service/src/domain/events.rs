//! # Ingest Job Payload
//!
//! The validated, privacy-safe representation of one tracking request.
//!
//! The HTTP handler turns a raw payload into an [`IngestJob`] (hashing
//! identity values in the process, so no raw signal ever reaches the
//! database) and enqueues it. The queue worker replays the job through
//! the processing pipeline inside a single transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entities::EventRef;
use super::value_objects::{IdentityKind, UtmSet};

// =============================================================================
// INGEST JOB
// =============================================================================

/// A hashed identity signal attached to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySignal {
    pub kind: IdentityKind,
    /// SHA-256 of the raw value; the raw value is discarded at the edge.
    pub value_hash: String,
}

/// One validated tracking request, ready for asynchronous processing.
///
/// Everything here is already normalized: the idempotency key exists
/// (server-generated when absent), revenue is in minor units, currency is
/// uppercased, UTM keys are prefix-stripped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestJob {
    pub website_id: i64,
    pub ingestion_token_id: Option<i64>,
    pub idempotency_key: String,

    /// Event name, e.g. `page_view`, `purchase`.
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub properties: serde_json::Value,
    pub revenue_minor: Option<i64>,
    pub currency: Option<String>,

    /// Explicit customer reference from the SDK, already parsed to an id.
    pub customer_id: Option<i64>,
    /// Hashed identity signal, when the request carried one.
    pub identity: Option<IdentitySignal>,
    /// Client-supplied session hint, already parsed to an id.
    pub session_id: Option<i64>,

    pub url: Option<String>,
    pub referrer: Option<String>,
    pub utms: UtmSet,

    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

// =============================================================================
// PROCESSING OUTCOME
// =============================================================================

/// Terminal result of processing one ingest job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessingOutcome {
    /// Full pipeline ran; an event row exists.
    Processed { event: EventRef },
    /// Another request with the same idempotency key won the race; the
    /// existing event is returned and no side effects were produced.
    Duplicate { event: EventRef },
    /// No identity and no explicit customer id: the event is dropped
    /// (fingerprint-based customer creation is deliberately not done).
    NoCustomer,
}

impl ProcessingOutcome {
    /// Short label for structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            ProcessingOutcome::Processed { .. } => "processed",
            ProcessingOutcome::Duplicate { .. } => "duplicate",
            ProcessingOutcome::NoCustomer => "no_customer",
        }
    }
}
