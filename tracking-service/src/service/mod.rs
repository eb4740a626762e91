//! # Service Layer
//!
//! Business logic for the ingestion pipeline, one module per concern:
//!
//! | Module | Concern |
//! |--------|---------|
//! | [`token_auth`] | Bearer-token authentication and IP allowlisting |
//! | [`tracking_service`] | Synchronous ingress: semantic checks, idempotency pre-check, enqueue |
//! | [`dimensions`] | Referrer/landing/UTM normalization and interning |
//! | [`identity`] | Identity resolution and stitching |
//! | [`sessions`] | Sessionization and bot detection |
//! | [`attribution`] | Touch management and conversion attribution |
//! | [`processing`] | The worker transaction orchestrating the above |
//! | [`rate_limit`] | Per-token ingest budget |

pub mod attribution;
pub mod dimensions;
pub mod identity;
pub mod processing;
pub mod rate_limit;
pub mod sessions;
pub mod token_auth;
pub mod tracking_service;

pub use processing::{ProcessingError, ProcessingService};
pub use rate_limit::RateLimiter;
pub use token_auth::TokenAuthenticator;
pub use tracking_service::TrackingService;
