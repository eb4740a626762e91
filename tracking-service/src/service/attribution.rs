//! # Touches and Conversion Attribution
//!
//! Two halves of the marketing-attribution story:
//!
//! - **Touch management**: when a session carries marketing context (UTM
//!   values or a referrer domain), emit one `landing` touch for it and
//!   maintain the customer's `first_touch_id` / `last_touch_id`.
//! - **Conversion attribution**: on purchase-like events, snapshot the
//!   UTM context under the `current ?? last ?? first` priority and pick
//!   the attributed touch.
//!
//! `checkout_completed` is not a conversion: it can precede payment
//! confirmation, so revenue would be counted before it exists.

use sqlx::PgConnection;
use tracing::debug;

use crate::domain::{
    Event, IngestJob, NewConversion, NewTouch, Session, Touch, TouchKind, TrackableKind, UtmSet,
};
use crate::repository::{
    CustomerRepository, DimensionRepository, EventRepository, RepositoryError, Result,
};

use super::dimensions::{utms_from_url, NormalizedDimensions};

/// Event names that trigger conversion attribution (lowercase).
const CONVERSION_NAMES: [&str; 3] = ["purchase", "order", "conversion"];

/// The attribution model recorded on every conversion row.
const ATTRIBUTION_MODEL: &str = "last_non_direct";

// =============================================================================
// PURE DECISION LOGIC
// =============================================================================

/// Returns `true` when an event name denotes a realized conversion.
pub fn is_conversion_event(name: &str) -> bool {
    let lowered = name.to_lowercase();
    CONVERSION_NAMES.contains(&lowered.as_str())
}

/// The UTM context of this event: payload parameters merged with
/// parameters parsed from the page URL. Payload entries win.
pub fn current_utms(job: &IngestJob) -> UtmSet {
    let mut set = job.url.as_deref().map(utms_from_url).unwrap_or_default();
    for (name, value) in job.utms.iter() {
        set.insert(name, value);
    }
    set
}

/// Applies the snapshot priority: `current ?? last ?? first`.
pub fn choose_attribution(
    utm_current: Option<serde_json::Value>,
    utm_last: Option<serde_json::Value>,
    utm_first: Option<serde_json::Value>,
) -> Option<serde_json::Value> {
    utm_current.or(utm_last).or(utm_first)
}

/// Pulls `order_id` and `order_number` out of event properties.
///
/// `order_number` falls back to the `order_key` property, which is what
/// some shop platforms call it.
pub fn extract_order_fields(properties: &serde_json::Value) -> (Option<String>, Option<String>) {
    let order_id = property_as_string(properties, "order_id");
    let order_number = property_as_string(properties, "order_number")
        .or_else(|| property_as_string(properties, "order_key"));
    (order_id, order_number)
}

/// Renders a scalar property as a string; numbers are common for ids.
fn property_as_string(properties: &serde_json::Value, key: &str) -> Option<String> {
    match properties.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// =============================================================================
// TOUCH MANAGEMENT
// =============================================================================

/// Ensures the session's landing touch exists when marketing context is
/// present, and keeps binding newly discovered UTM values to it.
///
/// Customer `first_touch_id` / `last_touch_id` are rewritten only when a
/// touch is actually created.
pub async fn ensure_landing_touch(
    conn: &mut PgConnection,
    job: &IngestJob,
    session: &Session,
    dims: &NormalizedDimensions,
) -> Result<Option<Touch>> {
    // A landing touch already recorded for this session is reused; any
    // UTM values first seen on this request still get bound to it.
    if let Some(touch) = EventRepository::find_landing_touch(conn, session.session_id).await? {
        DimensionRepository::bind_utm_values(
            conn,
            TrackableKind::Touch,
            touch.touch_id,
            &dims.utm_value_ids,
        )
        .await?;
        return Ok(Some(touch));
    }

    // No marketing context, no touch
    if dims.utm_value_ids.is_empty() && dims.referrer_domain.is_none() {
        return Ok(None);
    }

    let inserted = EventRepository::insert_touch(
        conn,
        NewTouch {
            website_id: session.website_id,
            customer_id: session.customer_id,
            session_id: Some(session.session_id),
            kind: TouchKind::Landing,
            occurred_at: session.started_at,
            referrer_domain_id: dims.referrer_domain_id().or(session.referrer_domain_id),
            landing_page_id: dims.landing_page_id().or(session.landing_page_id),
        },
    )
    .await?;

    let touch = match inserted {
        Some(touch) => touch,
        // The partial unique index says another transaction emitted the
        // landing touch first; fall back to reuse.
        None => EventRepository::find_landing_touch(conn, session.session_id)
            .await?
            .ok_or_else(|| {
                RepositoryError::NotFound(format!(
                    "landing touch for session {}",
                    session.session_id
                ))
            })?,
    };

    DimensionRepository::bind_utm_values(
        conn,
        TrackableKind::Touch,
        touch.touch_id,
        &dims.utm_value_ids,
    )
    .await?;
    CustomerRepository::update_touch_refs(conn, session.customer_id, touch.touch_id).await?;

    debug!(
        website_id = job.website_id,
        idempotency_key = %job.idempotency_key,
        step = "touch",
        touch_id = touch.touch_id,
        session_id = session.session_id,
        "Landing touch recorded"
    );

    Ok(Some(touch))
}

// =============================================================================
// CONVERSION ATTRIBUTION
// =============================================================================

/// Computes and persists the attribution snapshot for a conversion event.
pub async fn record_conversion(
    conn: &mut PgConnection,
    job: &IngestJob,
    event: &Event,
    session: &Session,
    customer_id: i64,
) -> Result<()> {
    // Re-read the customer: the touch manager may have rewritten the
    // first/last references earlier in this very transaction.
    let customer = CustomerRepository::find_customer(conn, job.website_id, customer_id)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("customer {}", customer_id)))?;

    let current_set = current_utms(job);
    let utm_current = current_set.to_snapshot();

    let utm_last = match customer.last_touch_id {
        Some(touch_id) => {
            DimensionRepository::utm_set_for(conn, TrackableKind::Touch, touch_id)
                .await?
                .to_snapshot()
        }
        None => None,
    };
    let utm_first = match customer.first_touch_id {
        Some(touch_id) => {
            DimensionRepository::utm_set_for(conn, TrackableKind::Touch, touch_id)
                .await?
                .to_snapshot()
        }
        None => None,
    };

    let utm_attribution = choose_attribution(utm_current.clone(), utm_last, utm_first);

    let last_non_direct =
        EventRepository::find_last_non_direct_touch(conn, customer.customer_id).await?;

    // With live campaign context, a touch from the current session is the
    // best witness; otherwise fall back along the customer's touch history.
    let attributed_touch_id = if utm_current.is_some() {
        match EventRepository::find_latest_touch_in_session(
            conn,
            customer.customer_id,
            session.session_id,
        )
        .await?
        {
            Some(touch) => Some(touch.touch_id),
            None => customer.last_touch_id.or(customer.first_touch_id),
        }
    } else {
        customer.last_touch_id.or(customer.first_touch_id)
    };

    let (order_id, order_number) = extract_order_fields(&event.properties);

    let recorded = EventRepository::insert_conversion(
        conn,
        NewConversion {
            event_id: event.event_id,
            website_id: event.website_id,
            customer_id: customer.customer_id,
            session_id: Some(session.session_id),
            occurred_at: event.occurred_at,
            value_minor: event.revenue_minor,
            currency: event.currency.clone(),
            first_touch_id: customer.first_touch_id,
            last_non_direct_touch_id: last_non_direct.map(|t| t.touch_id),
            attributed_touch_id,
            attribution_model: ATTRIBUTION_MODEL.to_string(),
            utm_current,
            utm_attribution,
            order_id,
            order_number,
        },
    )
    .await?;

    debug!(
        website_id = job.website_id,
        idempotency_key = %job.idempotency_key,
        step = "attribution",
        event_id = event.event_id,
        recorded,
        "Conversion attributed"
    );

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conversion_names() {
        assert!(is_conversion_event("purchase"));
        assert!(is_conversion_event("Order"));
        assert!(is_conversion_event("CONVERSION"));
    }

    #[test]
    fn test_checkout_completed_is_not_a_conversion() {
        assert!(!is_conversion_event("checkout_completed"));
        assert!(!is_conversion_event("page_view"));
        assert!(!is_conversion_event("add_to_cart"));
    }

    #[test]
    fn test_attribution_priority_prefers_current() {
        let current = Some(json!({"utm_source": "google"}));
        let last = Some(json!({"utm_source": "facebook"}));
        let first = Some(json!({"utm_source": "newsletter"}));

        assert_eq!(
            choose_attribution(current.clone(), last.clone(), first.clone()),
            current
        );
    }

    #[test]
    fn test_attribution_priority_falls_back_to_last_then_first() {
        let last = Some(json!({"utm_source": "facebook"}));
        let first = Some(json!({"utm_source": "newsletter"}));

        assert_eq!(
            choose_attribution(None, last.clone(), first.clone()),
            last
        );
        assert_eq!(choose_attribution(None, None, first.clone()), first);
        assert_eq!(choose_attribution(None, None, None), None);
    }

    #[test]
    fn test_extract_order_fields_from_strings_and_numbers() {
        let props = json!({"order_id": 789, "order_number": "SO-1001"});
        let (id, number) = extract_order_fields(&props);
        assert_eq!(id, Some("789".to_string()));
        assert_eq!(number, Some("SO-1001".to_string()));
    }

    #[test]
    fn test_extract_order_fields_order_key_fallback() {
        let props = json!({"order_key": "wc_order_abc"});
        let (id, number) = extract_order_fields(&props);
        assert_eq!(id, None);
        assert_eq!(number, Some("wc_order_abc".to_string()));
    }

    #[test]
    fn test_extract_order_fields_ignores_non_scalars() {
        let props = json!({"order_id": {"nested": true}, "order_number": [1, 2]});
        assert_eq!(extract_order_fields(&props), (None, None));
    }

    #[test]
    fn test_current_utms_merges_payload_over_url() {
        let mut utms = UtmSet::new();
        utms.insert("utm_source", "newsletter");

        let job = fixture_job(
            Some("https://s/?utm_source=google&utm_medium=cpc".to_string()),
            utms,
        );

        let current = current_utms(&job);
        // payload wins on conflict, URL fills the gaps
        assert_eq!(current.get("source"), Some("newsletter"));
        assert_eq!(current.get("medium"), Some("cpc"));
    }

    #[test]
    fn test_current_utms_empty_when_no_context() {
        let job = fixture_job(Some("https://s/checkout".to_string()), UtmSet::new());
        assert!(current_utms(&job).is_empty());
    }

    fn fixture_job(url: Option<String>, utms: UtmSet) -> IngestJob {
        IngestJob {
            website_id: 1,
            ingestion_token_id: None,
            idempotency_key: "k".to_string(),
            name: "purchase".to_string(),
            occurred_at: chrono::Utc::now(),
            properties: json!({}),
            revenue_minor: None,
            currency: None,
            customer_id: None,
            identity: None,
            session_id: None,
            url,
            referrer: None,
            utms,
            ip: None,
            user_agent: None,
        }
    }
}
