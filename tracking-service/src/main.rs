//! # Tracklane - Tracking Service
//!
//! Multi-tenant event-ingestion core: accepts tracking events from
//! website SDKs, guarantees exactly-once semantics per idempotency key,
//! stitches customer identities, sessionizes traffic and computes
//! conversion attribution.
//!
//! ## Request Flow
//!
//! ```text
//! POST /api/tracking/events
//!   │ token auth ── rate limit ── validation
//!   │ idempotency pre-check
//!   ▼
//! tracking.jobs ──► queue workers ──► one transaction:
//!                                     identity → dimensions → session
//!                                     → event → touches → conversion
//! ```
//!
//! ## API Endpoints
//!
//! - POST /api/tracking/events  - Ingest a tracking event
//! - GET  /api/tracking/health  - Liveness check
//! - GET  /api/tracking/ready   - Readiness check (DB + Redis)

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use tracing::info;
use tracing_actix_web::TracingLogger;

mod api;
mod domain;
mod repository;
mod service;
mod worker;

use api::handlers::AppState;
use repository::{EventRepository, JobRepository, TokenRepository};
use service::{ProcessingService, RateLimiter, TokenAuthenticator, TrackingService};
use shared::config::AppConfig;
use shared::redis_client::RedisClient;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize tracing
    shared::tracing_config::init_tracing(&config.service_name, config.is_production());

    info!("Starting Tracking Service...");
    info!("Host: {}:{}", config.server.host, config.server.port);

    // Create database pool and apply migrations
    let pool = shared::database::create_pool(&config.database)
        .await
        .expect("Failed to create database pool");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    // Connect to Redis (rate limiting)
    let redis = RedisClient::new(&config.redis)
        .await
        .expect("Failed to connect to Redis");

    // Repositories and services
    let token_repository = TokenRepository::new(pool.clone());
    let event_repository = EventRepository::new(pool.clone());
    let job_repository = JobRepository::new(pool.clone());

    let token_auth = TokenAuthenticator::new(token_repository);
    let tracking_service = TrackingService::new(
        event_repository,
        job_repository.clone(),
        config.tracking.clone(),
    );
    let rate_limiter = RateLimiter::new(redis.clone(), config.tracking.rate_limit_per_minute);
    let processing = ProcessingService::new(pool.clone(), config.tracking.clone());

    // Queue workers and the stale-job reaper
    for worker_id in 0..config.tracking.worker_count {
        tokio::spawn(worker::run_worker(
            worker_id,
            job_repository.clone(),
            processing.clone(),
            config.tracking.clone(),
        ));
    }
    tokio::spawn(worker::run_reaper(
        job_repository.clone(),
        config.tracking.clone(),
    ));

    info!(
        workers = config.tracking.worker_count,
        "Queue workers started"
    );

    // Create app state
    let app_state = web::Data::new(AppState {
        token_auth,
        tracking_service,
        rate_limiter,
        db_pool: pool.clone(),
        redis: redis.clone(),
        tracking_config: config.tracking.clone(),
    });

    info!(
        "Starting HTTP server on {}:{}",
        config.server.host, config.server.port
    );

    let workers = config.server.workers;
    let bind_addr = (config.server.host.clone(), config.server.port);

    // Start HTTP server
    let mut server = HttpServer::new(move || {
        // SDKs post from arbitrary origins
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["POST", "GET"])
            .allow_any_header()
            .max_age(3600);

        App::new()
            // Add middleware
            .wrap(TracingLogger::default())
            .wrap(middleware::Compress::default())
            .wrap(cors)
            // Add app state
            .app_data(app_state.clone())
            // Configure routes
            .configure(api::routes::configure)
    })
    .bind(bind_addr)?;

    if workers > 0 {
        server = server.workers(workers);
    }

    server.run().await
}
