//! # Tracking API Routes
//!
//! Route configuration for the ingestion service.

use actix_web::web;

use crate::api::handlers;

/// Configures all API routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/tracking")
            .route("/events", web::post().to(handlers::track_event))
            .route("/health", web::get().to(handlers::health_check))
            .route("/ready", web::get().to(handlers::readiness_check)),
    );
}
