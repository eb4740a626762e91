//! # Tracking API Handlers
//!
//! HTTP request handlers for the ingest surface.

use actix_web::{http::header, web, HttpRequest, HttpResponse};
use chrono::{Duration, Utc};
use sqlx::PgPool;

use shared::config::TrackingConfig;
use shared::errors::{ApiError, ApiResult};
use shared::redis_client::RedisClient;

use crate::api::dto::{
    validate_track_request, HealthResponse, TrackEventRequest, TrackEventResponse,
};
use crate::service::tracking_service::IngestDisposition;
use crate::service::{RateLimiter, TokenAuthenticator, TrackingService};

/// Application state shared by all handlers.
pub struct AppState {
    pub token_auth: TokenAuthenticator,
    pub tracking_service: TrackingService,
    pub rate_limiter: RateLimiter,
    pub db_pool: PgPool,
    pub redis: RedisClient,
    pub tracking_config: TrackingConfig,
}

// =============================================================================
// INGEST
// =============================================================================

/// POST /api/tracking/events - Ingest a tracking event.
///
/// Authenticates the bearer token, applies the rate limit, validates the
/// payload, then either answers with the ids of an already-processed
/// idempotency key or enqueues the job and answers with null ids.
pub async fn track_event(
    state: web::Data<AppState>,
    request: HttpRequest,
    body: web::Json<TrackEventRequest>,
) -> ApiResult<HttpResponse> {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let client_ip = client_ip(&request);

    let (token, website) = state
        .token_auth
        .authenticate(authorization, client_ip.as_deref())
        .await?;

    state.rate_limiter.check(&token.prefix).await?;

    validate_track_request(
        &body,
        Duration::minutes(state.tracking_config.timestamp_slack_minutes),
    )?;

    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let job = body.into_inner().into_ingest_job(
        website.website_id,
        Some(token.token_id),
        client_ip,
        user_agent,
    );

    let response = match state.tracking_service.ingest(&job).await? {
        IngestDisposition::Known(event) => TrackEventResponse::known(event),
        IngestDisposition::Enqueued { .. } | IngestDisposition::BotSkipped => {
            TrackEventResponse::accepted()
        }
    };

    Ok(HttpResponse::Created().json(response))
}

// =============================================================================
// HEALTH
// =============================================================================

/// GET /api/tracking/health - Liveness check.
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
    })
}

/// GET /api/tracking/ready - Readiness check (database + Redis).
pub async fn readiness_check(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    shared::database::health_check(&state.db_pool)
        .await
        .map_err(|_| ApiError::ServiceUnavailable {
            service: "database".to_string(),
        })?;

    state
        .redis
        .ping()
        .await
        .map_err(|_| ApiError::ServiceUnavailable {
            service: "redis".to_string(),
        })?;

    Ok(HttpResponse::Ok().json(HealthResponse {
        status: "ready",
        timestamp: Utc::now(),
    }))
}

// =============================================================================
// HELPERS
// =============================================================================

/// Extracts the client IP as a bare address string.
///
/// Honors reverse-proxy headers via actix's connection info; strips the
/// port when the peer address carries one.
fn client_ip(request: &HttpRequest) -> Option<String> {
    let info = request.connection_info();
    let raw = info.realip_remote_addr()?;

    if let Ok(socket) = raw.parse::<std::net::SocketAddr>() {
        return Some(socket.ip().to_string());
    }
    if let Ok(ip) = raw.parse::<std::net::IpAddr>() {
        return Some(ip.to_string());
    }
    Some(raw.to_string())
}
