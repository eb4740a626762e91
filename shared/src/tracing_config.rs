//! # Tracing and Structured Logging Configuration
//!
//! Initializes the logging system with environment-appropriate settings.
//!
//! ## Output Formats
//!
//! | Environment | Format | Purpose |
//! |-------------|--------|---------|
//! | Development | Pretty | Human-readable, colored output |
//! | Production | JSON | Machine-parseable for log aggregation |
//!
//! ## Log Levels
//!
//! | Level | When to Use | Default Enabled |
//! |-------|-------------|-----------------|
//! | ERROR | Something failed that shouldn't | Always |
//! | WARN | Recoverable issues, degraded service | Always |
//! | INFO | Significant events (startup, job outcomes) | Always |
//! | DEBUG | Detailed troubleshooting info | Dev only |
//! | TRACE | Very verbose, step-by-step | Never by default |
//!
//! ## Filter Configuration
//!
//! Control verbosity via `RUST_LOG` environment variable:
//!
//! ```bash
//! # All debug
//! RUST_LOG=debug
//!
//! # Info for most, debug for our code
//! RUST_LOG=info,tracking_service=debug
//!
//! # Silence noisy crates
//! RUST_LOG=info,hyper=warn,sqlx=warn
//! ```
//!
//! ## Conventions
//!
//! Pipeline code attaches `website_id`, `idempotency_key` and the step name
//! to every structured event so a single ingest request can be followed
//! across the HTTP handler and the queue worker:
//!
//! ```rust,ignore
//! tracing::info!(
//!     website_id = website_id,
//!     idempotency_key = %key,
//!     step = "sessionize",
//!     duration_ms = elapsed.as_millis() as u64,
//!     "Session resolved"
//! );
//! ```
//!
//! Never log token material, identity values, or raw IP allowlists.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

// =============================================================================
// Initialization
// =============================================================================

/// Initializes the tracing/logging system.
///
/// This should be called **once** at the very start of your application,
/// before any other code that might emit logs.
///
/// ## Parameters
///
/// - `service_name`: Name of the service (for identification in logs)
/// - `is_production`: If true, outputs JSON; if false, outputs pretty format
///
/// ## Defaults
///
/// If `RUST_LOG` is not set:
/// - Production: `info`
/// - Development: `debug,hyper=info,sqlx=warn`
pub fn init_tracing(service_name: &str, is_production: bool) {
    // Build filter from RUST_LOG env var, or use defaults
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if is_production {
            // Production: info level, minimal noise
            EnvFilter::new("info")
        } else {
            // Development: debug level, but silence noisy crates
            EnvFilter::new("debug,hyper=info,sqlx=warn")
        }
    });

    if is_production {
        // Production: JSON structured output for log aggregation tools
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_file(true)
                    .with_line_number(true)
                    .with_thread_ids(true)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true)
                    .with_current_span(true),
            )
            .init();
    } else {
        // Development: pretty, human-readable output
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init();
    }

    // Log that tracing is initialized (useful for verifying setup)
    tracing::info!(
        service = service_name,
        production = is_production,
        "Tracing initialized"
    );
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Logs an error with context.
///
/// Use this for consistent error logging format across the application.
///
/// ## Example
///
/// ```rust,ignore
/// if let Err(e) = repository.touch_last_used(token_id).await {
///     log_error(&e, "Failed to record token usage");
/// }
/// ```
pub fn log_error<E: std::fmt::Display>(error: &E, context: &str) {
    tracing::error!(
        error = %error,
        context = context,
        "Error occurred"
    );
}
