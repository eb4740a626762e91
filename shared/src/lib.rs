//! # Tracklane - Shared Library
//!
//! Core shared functionality for the Tracklane ingestion backend.
//!
//! This crate provides common utilities, types, and services used by the
//! tracking service. It follows the DRY principle to avoid code duplication
//! and ensure consistency.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Services                              │
//! │  ┌───────────────────┐                                      │
//! │  │ tracking-service  │   (ingestion, identity, attribution) │
//! │  └─────────┬─────────┘                                      │
//! │            │                                                │
//! │   ┌────────▼────────┐                                       │
//! │   │  shared crate   │ ◄── You are here                      │
//! │   └─────────────────┘                                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose | Key Types |
//! |--------|---------|-----------|
//! | [`config`] | Environment-based configuration | [`AppConfig`] |
//! | [`errors`] | Standardized error handling | [`ApiError`], [`ApiResult`] |
//! | [`auth`] | Ingestion-token parsing and hashing | [`auth::token::TokenPlaintext`] |
//! | [`database`] | PostgreSQL connection pool | [`create_pool`](database::create_pool) |
//! | [`redis_client`] | Redis for rate limiting | [`RedisClient`](redis_client::RedisClient) |
//! | [`tracing_config`] | Structured logging setup | [`init_tracing`](tracing_config::init_tracing) |
//! | [`validation`] | Request validation helpers | Custom validators |
//!
//! ## Design Decisions
//!
//! 1. **Single source of truth**: shared types live here to prevent drift
//! 2. **Security first**: token material is hashed before storage, compared
//!    in constant time, never logged
//! 3. **Observable by default**: structured logging and tracing built-in
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use shared::{AppConfig, ApiError, ApiResult};
//! use shared::database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::from_env()?;
//!     let db_pool = database::create_pool(&config.database).await?;
//!
//!     // Ready to build your service!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod database;
pub mod errors;
pub mod redis_client;
pub mod tracing_config;
pub mod validation;

// Re-exports for convenience - import commonly used types directly from `shared`
pub use config::AppConfig;
pub use errors::{ApiError, ApiResult};
