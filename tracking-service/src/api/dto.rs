//! # Tracking API DTOs
//!
//! Request and response data transfer objects for the ingest endpoint.
//!
//! Validation happens in two passes:
//!
//! 1. the `validator` derive covers declarative length rules;
//! 2. [`validate_track_request`] adds the semantic rules that need
//!    context or dynamic keys (URLs, currency, identity kind, revenue
//!    sign, timestamp slack, custom `utm_*` entries).
//!
//! Both passes merge into one `ValidationErrors`, so a bad request
//! reports every broken field at once and writes no state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use shared::validation::validators;

use crate::domain::{EventRef, IdentityKind, IngestJob, UtmSet};
use crate::service::identity::hash_identity_value;

/// Maximum accepted length for any single UTM value.
const UTM_VALUE_MAX_CHARS: usize = 255;

// =============================================================================
// REQUESTS
// =============================================================================

/// Identity signal attached to a tracking request.
///
/// Checked in the semantic pass so failures land under the `identity`
/// key of the error map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityDto {
    /// One of `cookie`, `user_id`, `email_hash`, `ga_cid`.
    #[serde(rename = "type")]
    pub kind: String,

    pub value: String,
}

/// The ingest payload accepted by `POST /api/tracking/events`.
///
/// Unknown top-level keys land in `extra`; only `utm_*` entries are
/// meaningful there, anything else is ignored.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TrackEventRequest {
    #[validate(length(min = 1, max = 255, message = "Event name must be 1-255 characters"))]
    pub event: String,

    pub properties: Option<serde_json::Value>,

    #[validate(length(max = 255, message = "customer_id too long"))]
    pub customer_id: Option<String>,

    pub identity: Option<IdentityDto>,

    #[validate(length(max = 255, message = "session_id too long"))]
    pub session_id: Option<String>,

    pub url: Option<String>,
    pub referrer: Option<String>,

    #[validate(length(max = 255, message = "utm_source too long"))]
    pub utm_source: Option<String>,
    #[validate(length(max = 255, message = "utm_medium too long"))]
    pub utm_medium: Option<String>,
    #[validate(length(max = 255, message = "utm_campaign too long"))]
    pub utm_campaign: Option<String>,
    #[validate(length(max = 255, message = "utm_term too long"))]
    pub utm_term: Option<String>,
    #[validate(length(max = 255, message = "utm_content too long"))]
    pub utm_content: Option<String>,

    pub revenue: Option<f64>,
    pub currency: Option<String>,

    #[validate(length(max = 255, message = "idempotency_key too long"))]
    pub idempotency_key: Option<String>,

    /// ISO-8601 timestamp; defaults to the ingest time.
    pub timestamp: Option<String>,

    /// Catch-all for custom `utm_*` keys.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Runs both validation passes and merges their findings.
///
/// `timestamp_slack` bounds how far in the future the caller-supplied
/// timestamp may lie.
pub fn validate_track_request(
    request: &TrackEventRequest,
    timestamp_slack: Duration,
) -> Result<(), ValidationErrors> {
    let mut errors = match request.validate() {
        Ok(()) => ValidationErrors::new(),
        Err(errors) => errors,
    };

    if validators::not_blank(&request.event).is_err() {
        errors.add("event", message_error("blank", "Event name must not be blank"));
    }

    if let Some(properties) = &request.properties {
        if !properties.is_object() {
            errors.add(
                "properties",
                message_error("object", "properties must be a JSON object"),
            );
        }
    }

    if let Some(identity) = &request.identity {
        if IdentityKind::from_str(&identity.kind).is_err() {
            errors.add(
                "identity",
                message_error(
                    "identity_kind",
                    "identity.type must be one of cookie, user_id, email_hash, ga_cid",
                ),
            );
        }
        if identity.value.is_empty() || identity.value.chars().count() > 255 {
            errors.add(
                "identity",
                message_error("identity_value", "identity.value must be 1-255 characters"),
            );
        }
    }

    for (field, value) in [("url", &request.url), ("referrer", &request.referrer)] {
        if let Some(value) = value {
            if validators::bounded_url(value).is_err() {
                errors.add(
                    field,
                    message_error("invalid_url", "must be a valid URL of at most 2048 characters"),
                );
            }
        }
    }

    if let Some(revenue) = request.revenue {
        if !revenue.is_finite() || revenue < 0.0 {
            errors.add(
                "revenue",
                message_error("revenue", "revenue must be a non-negative number"),
            );
        }
    }

    if let Some(currency) = &request.currency {
        if validators::valid_currency(currency).is_err() {
            errors.add(
                "currency",
                message_error("currency", "currency must be a 3-letter code"),
            );
        }
    }

    if let Some(timestamp) = &request.timestamp {
        match parse_timestamp(timestamp) {
            Some(parsed) => {
                if parsed > Utc::now() + timestamp_slack {
                    errors.add(
                        "timestamp",
                        message_error("timestamp_future", "timestamp is too far in the future"),
                    );
                }
            }
            None => {
                errors.add(
                    "timestamp",
                    message_error("timestamp", "timestamp must be ISO-8601"),
                );
            }
        }
    }

    // Custom utm_* keys must be short strings; everything else in
    // `extra` is silently ignored.
    for (key, value) in &request.extra {
        if !key.starts_with("utm_") {
            continue;
        }
        match value {
            serde_json::Value::String(s) if s.chars().count() <= UTM_VALUE_MAX_CHARS => {}
            serde_json::Value::String(_) => {
                errors.add(
                    "utm",
                    message_error("utm_too_long", "custom utm_* values must be at most 255 characters"),
                );
            }
            _ => {
                errors.add(
                    "utm",
                    message_error("utm_type", "custom utm_* values must be strings"),
                );
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

impl TrackEventRequest {
    /// Converts a validated request into the internal job representation.
    ///
    /// This is where identity values are hashed, the idempotency key is
    /// minted when absent, revenue moves to minor units and UTM keys are
    /// collected from the typed fields and the `utm_*` extras.
    pub fn into_ingest_job(
        self,
        website_id: i64,
        ingestion_token_id: Option<i64>,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> IngestJob {
        let occurred_at = self
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        let idempotency_key = self
            .idempotency_key
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let identity = self.identity.as_ref().and_then(|i| {
            IdentityKind::from_str(&i.kind)
                .ok()
                .map(|kind| hash_identity_value(kind, &i.value))
        });

        let mut utms = UtmSet::new();
        for (key, value) in [
            ("utm_source", &self.utm_source),
            ("utm_medium", &self.utm_medium),
            ("utm_campaign", &self.utm_campaign),
            ("utm_term", &self.utm_term),
            ("utm_content", &self.utm_content),
        ] {
            if let Some(value) = value {
                utms.insert(key, value);
            }
        }
        for (key, value) in &self.extra {
            if let (true, serde_json::Value::String(s)) = (key.starts_with("utm_"), value) {
                utms.insert(key, s);
            }
        }

        IngestJob {
            website_id,
            ingestion_token_id,
            idempotency_key,
            name: self.event,
            occurred_at,
            properties: self.properties.unwrap_or_else(|| serde_json::json!({})),
            revenue_minor: self.revenue.map(revenue_to_minor),
            currency: self.currency.map(|c| c.to_uppercase()),
            customer_id: self.customer_id.and_then(|c| c.parse().ok()),
            identity,
            session_id: self.session_id.and_then(|s| s.parse().ok()),
            url: self.url,
            referrer: self.referrer,
            utms,
            ip,
            user_agent,
        }
    }
}

/// Converts a revenue amount to integer minor units, rounding half up.
///
/// `f64::round` rounds half away from zero; revenue is validated
/// non-negative, so the two coincide here. `149.99` becomes `14999`.
pub fn revenue_to_minor(revenue: f64) -> i64 {
    (revenue * 100.0).round() as i64
}

/// Parses an ISO-8601 timestamp with offset into UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn message_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    error
}

// =============================================================================
// RESPONSES
// =============================================================================

/// 201 body of `POST /api/tracking/events`.
///
/// All three ids are null while processing is deferred to the queue; a
/// known idempotency key answers with the original ids instead.
#[derive(Debug, Serialize)]
pub struct TrackEventResponse {
    pub success: bool,
    pub event_id: Option<i64>,
    pub customer_id: Option<i64>,
    pub session_id: Option<i64>,
}

impl TrackEventResponse {
    /// The deferred-processing response: accepted, ids not yet known.
    pub fn accepted() -> Self {
        Self {
            success: true,
            event_id: None,
            customer_id: None,
            session_id: None,
        }
    }

    /// The authoritative response for an already-processed key.
    pub fn known(event: EventRef) -> Self {
        Self {
            success: true,
            event_id: Some(event.event_id),
            customer_id: event.customer_id,
            session_id: event.session_id,
        }
    }
}

/// Body of `GET /api/tracking/health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_request(event: &str) -> TrackEventRequest {
        serde_json::from_value(json!({ "event": event })).unwrap()
    }

    fn slack() -> Duration {
        Duration::minutes(5)
    }

    #[test]
    fn test_minimal_request_is_valid() {
        let request = minimal_request("page_view");
        assert!(validate_track_request(&request, slack()).is_ok());
    }

    #[test]
    fn test_event_name_required() {
        let request = minimal_request("");
        let errors = validate_track_request(&request, slack()).unwrap_err();
        assert!(errors.field_errors().contains_key("event"));
    }

    #[test]
    fn test_event_name_length_cap() {
        let request = minimal_request(&"x".repeat(256));
        let errors = validate_track_request(&request, slack()).unwrap_err();
        assert!(errors.field_errors().contains_key("event"));
    }

    #[test]
    fn test_identity_kind_checked() {
        let request: TrackEventRequest = serde_json::from_value(json!({
            "event": "page_view",
            "identity": { "type": "fingerprint", "value": "abc" }
        }))
        .unwrap();

        let errors = validate_track_request(&request, slack()).unwrap_err();
        assert!(errors.field_errors().contains_key("identity"));
    }

    #[test]
    fn test_identity_value_must_not_be_empty() {
        let request: TrackEventRequest = serde_json::from_value(json!({
            "event": "page_view",
            "identity": { "type": "cookie", "value": "" }
        }))
        .unwrap();

        let errors = validate_track_request(&request, slack()).unwrap_err();
        assert!(errors.field_errors().contains_key("identity"));
    }

    #[test]
    fn test_url_and_referrer_must_parse() {
        let request: TrackEventRequest = serde_json::from_value(json!({
            "event": "page_view",
            "url": "not a url",
            "referrer": "also not"
        }))
        .unwrap();

        let errors = validate_track_request(&request, slack()).unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("url"));
        assert!(fields.contains_key("referrer"));
    }

    #[test]
    fn test_revenue_must_be_non_negative() {
        let request: TrackEventRequest = serde_json::from_value(json!({
            "event": "purchase",
            "revenue": -1.0
        }))
        .unwrap();

        let errors = validate_track_request(&request, slack()).unwrap_err();
        assert!(errors.field_errors().contains_key("revenue"));
    }

    #[test]
    fn test_currency_shape() {
        let request: TrackEventRequest = serde_json::from_value(json!({
            "event": "purchase",
            "currency": "USDT"
        }))
        .unwrap();

        let errors = validate_track_request(&request, slack()).unwrap_err();
        assert!(errors.field_errors().contains_key("currency"));
    }

    #[test]
    fn test_properties_must_be_object() {
        let request: TrackEventRequest = serde_json::from_value(json!({
            "event": "page_view",
            "properties": [1, 2, 3]
        }))
        .unwrap();

        let errors = validate_track_request(&request, slack()).unwrap_err();
        assert!(errors.field_errors().contains_key("properties"));
    }

    #[test]
    fn test_timestamp_parse_and_slack() {
        let request: TrackEventRequest = serde_json::from_value(json!({
            "event": "page_view",
            "timestamp": "yesterday"
        }))
        .unwrap();
        let errors = validate_track_request(&request, slack()).unwrap_err();
        assert!(errors.field_errors().contains_key("timestamp"));

        let future = (Utc::now() + Duration::hours(1)).to_rfc3339();
        let request: TrackEventRequest = serde_json::from_value(json!({
            "event": "page_view",
            "timestamp": future
        }))
        .unwrap();
        let errors = validate_track_request(&request, slack()).unwrap_err();
        assert!(errors.field_errors().contains_key("timestamp"));

        let recent = (Utc::now() - Duration::minutes(1)).to_rfc3339();
        let request: TrackEventRequest = serde_json::from_value(json!({
            "event": "page_view",
            "timestamp": recent
        }))
        .unwrap();
        assert!(validate_track_request(&request, slack()).is_ok());
    }

    #[test]
    fn test_custom_utm_values_must_be_short_strings() {
        let request: TrackEventRequest = serde_json::from_value(json!({
            "event": "page_view",
            "utm_partner": 42
        }))
        .unwrap();
        let errors = validate_track_request(&request, slack()).unwrap_err();
        assert!(errors.field_errors().contains_key("utm"));

        let request: TrackEventRequest = serde_json::from_value(json!({
            "event": "page_view",
            "utm_partner": "y".repeat(300)
        }))
        .unwrap();
        let errors = validate_track_request(&request, slack()).unwrap_err();
        assert!(errors.field_errors().contains_key("utm"));
    }

    #[test]
    fn test_non_utm_extras_are_ignored() {
        let request: TrackEventRequest = serde_json::from_value(json!({
            "event": "page_view",
            "sdk_version": "1.2.3",
            "whatever": { "deep": true }
        }))
        .unwrap();
        assert!(validate_track_request(&request, slack()).is_ok());
    }

    #[test]
    fn test_into_job_generates_idempotency_key() {
        let job = minimal_request("page_view").into_ingest_job(1, Some(7), None, None);
        assert!(!job.idempotency_key.is_empty());
        // v4 UUID in canonical form
        assert_eq!(job.idempotency_key.len(), 36);
    }

    #[test]
    fn test_into_job_keeps_caller_key() {
        let request: TrackEventRequest = serde_json::from_value(json!({
            "event": "page_view",
            "idempotency_key": "k1"
        }))
        .unwrap();
        let job = request.into_ingest_job(1, None, None, None);
        assert_eq!(job.idempotency_key, "k1");
    }

    #[test]
    fn test_into_job_hashes_identity_value() {
        let request: TrackEventRequest = serde_json::from_value(json!({
            "event": "page_view",
            "identity": { "type": "cookie", "value": "c1" }
        }))
        .unwrap();
        let job = request.into_ingest_job(1, None, None, None);
        let signal = job.identity.unwrap();
        assert_eq!(signal.kind, IdentityKind::Cookie);
        assert_ne!(signal.value_hash, "c1");
        assert_eq!(signal.value_hash.len(), 64);
    }

    #[test]
    fn test_into_job_collects_standard_and_custom_utms() {
        let request: TrackEventRequest = serde_json::from_value(json!({
            "event": "page_view",
            "utm_source": "google",
            "utm_medium": "cpc",
            "utm_partner": "acme"
        }))
        .unwrap();
        let job = request.into_ingest_job(1, None, None, None);
        assert_eq!(job.utms.len(), 3);
        assert_eq!(job.utms.get("source"), Some("google"));
        assert_eq!(job.utms.get("partner"), Some("acme"));
    }

    #[test]
    fn test_into_job_parses_numeric_references() {
        let request: TrackEventRequest = serde_json::from_value(json!({
            "event": "page_view",
            "customer_id": "42",
            "session_id": "abc"
        }))
        .unwrap();
        let job = request.into_ingest_job(1, None, None, None);
        assert_eq!(job.customer_id, Some(42));
        assert_eq!(job.session_id, None);
    }

    #[test]
    fn test_revenue_half_up_encoding() {
        assert_eq!(revenue_to_minor(149.99), 14999);
        assert_eq!(revenue_to_minor(0.005), 1);
        assert_eq!(revenue_to_minor(50.0), 5000);
        assert_eq!(revenue_to_minor(0.0), 0);
    }

    #[test]
    fn test_currency_is_uppercased() {
        let request: TrackEventRequest = serde_json::from_value(json!({
            "event": "purchase",
            "revenue": 10.0,
            "currency": "usd"
        }))
        .unwrap();
        let job = request.into_ingest_job(1, None, None, None);
        assert_eq!(job.currency.as_deref(), Some("USD"));
        assert_eq!(job.revenue_minor, Some(1000));
    }
}
