//! # Application Error Types
//!
//! Unified error handling for the ingestion surface with automatic HTTP
//! conversion.
//!
//! ## Design Philosophy
//!
//! This module follows the "make illegal states unrepresentable" principle.
//! Each error variant maps to a specific HTTP status code and a wire body
//! that matches the tracking API contract exactly.
//!
//! ## Error Categories
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          ApiError Categories                            │
//! ├─────────────────────────┬───────────────────┬───────────────────────────┤
//! │ Authentication (401)    │ Authorization(403)│ Validation (400)          │
//! ├─────────────────────────┼───────────────────┼───────────────────────────┤
//! │ MissingAuth             │ IpNotAllowed      │ ValidationError           │
//! │ InvalidToken            │                   │ BadRequest                │
//! │ TokenExpired            │                   │ PayloadTooLarge           │
//! │ TokenRevoked            │                   │                           │
//! ├─────────────────────────┴───────────────────┴───────────────────────────┤
//! │ Resources (404, 409)    │ Rate Limit (429)  │ Server (500, 503)         │
//! ├─────────────────────────┼───────────────────┼───────────────────────────┤
//! │ NotFound                │ TooManyRequests   │ DatabaseError             │
//! │ Conflict                │                   │ RedisError                │
//! │                         │                   │ InternalError             │
//! │                         │                   │ ServiceUnavailable        │
//! └─────────────────────────┴───────────────────┴───────────────────────────┘
//! ```
//!
//! ## HTTP Response Formats
//!
//! The wire bodies follow the ingestion API contract:
//!
//! ```json
//! // 401 / 403 / 429 / 503
//! { "error": "Unauthorized", "message": "..." }
//!
//! // 400 (validation)
//! { "success": false, "errors": { "field": ["msg", "..."] } }
//!
//! // 500
//! { "success": false, "error": "Failed to process event" }
//! ```
//!
//! Internal exception detail is never exposed to clients; server-side
//! errors are logged with full context and answered with a generic body.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;
use validator::ValidationErrors;

// =============================================================================
// Type Aliases
// =============================================================================

/// Result type alias for handlers and services.
///
/// Use this instead of `Result<T, ApiError>` for cleaner signatures.
pub type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Main Error Enum
// =============================================================================

/// Application error type with automatic HTTP status mapping.
///
/// Each variant represents a specific error condition and maps to an
/// appropriate HTTP status code. The `#[error]` attribute defines the
/// error message format.
#[derive(Debug, Error)]
pub enum ApiError {
    // =========================================================================
    // Authentication Errors (401 Unauthorized)
    // =========================================================================
    // The ingestion token is missing or could not be verified. The client
    // must obtain a fresh token; retrying the same request will not help.

    /// Request doesn't include a usable `Authorization: Bearer` header.
    /// Returns 401 Unauthorized.
    #[error("Missing or malformed authorization header")]
    MissingAuth,

    /// Token prefix unknown or hash mismatch. The same message is used for
    /// both so callers cannot probe which prefixes exist.
    /// Returns 401 Unauthorized.
    #[error("Invalid ingestion token")]
    InvalidToken,

    /// Token `expires_at` is in the past. Revoked tokens surface as
    /// [`ApiError::InvalidToken`] because the lookup already filters them.
    /// Returns 401 Unauthorized.
    #[error("Ingestion token expired")]
    TokenExpired,

    // =========================================================================
    // Authorization Errors (403 Forbidden)
    // =========================================================================

    /// The token is valid but carries an IP allowlist that does not include
    /// the client address.
    /// Returns 403 Forbidden.
    #[error("IP address not allowed")]
    IpNotAllowed,

    // =========================================================================
    // Validation Errors (400 Bad Request)
    // =========================================================================
    // Request is syntactically correct but semantically invalid. Nothing
    // has been written when these are returned.

    /// Request body failed validation rules.
    /// Contains field-level errors from the `validator` crate.
    /// Returns 400 Bad Request with per-field messages.
    #[error("Validation error")]
    ValidationError(#[from] ValidationErrors),

    /// Generic bad request with custom message.
    /// Use for validation that doesn't fit the validator pattern.
    /// Returns 400 Bad Request.
    #[error("Invalid input: {message}")]
    BadRequest {
        /// Human-readable description of what's wrong
        message: String,
    },

    /// Serialized `properties` exceeds the configured size cap.
    /// Returns 400 Bad Request.
    #[error("Event properties too large")]
    PayloadTooLarge,

    // =========================================================================
    // Resource Errors (404 Not Found, 409 Conflict)
    // =========================================================================

    /// Requested resource doesn't exist.
    /// Returns 404 Not Found.
    #[error("Resource not found: {resource}")]
    NotFound {
        /// Resource identifier (e.g., "website:123")
        resource: String,
    },

    /// Action would violate a uniqueness constraint that is not part of
    /// normal idempotent processing.
    /// Returns 409 Conflict.
    #[error("Resource already exists: {resource}")]
    Conflict {
        /// Description of the conflict
        resource: String,
    },

    // =========================================================================
    // Rate Limiting (429 Too Many Requests)
    // =========================================================================

    /// The token exceeded its per-minute ingest budget.
    /// Returns 429 Too Many Requests with `retry_after_seconds`.
    #[error("Too many requests")]
    TooManyRequests {
        /// Seconds until the client can retry
        retry_after_seconds: u64,
    },

    // =========================================================================
    // Server Errors (500 Internal Server Error, 503 Service Unavailable)
    // =========================================================================
    // These are logged as errors and monitored.
    // Details are NOT exposed to clients for security.

    /// PostgreSQL query failed.
    /// Wraps `sqlx::Error`. Details logged, generic message returned.
    /// Returns 500 Internal Server Error.
    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    /// Redis operation failed.
    /// Wraps `redis::RedisError`. Details logged, generic message returned.
    /// Returns 500 Internal Server Error.
    #[error("Redis error")]
    RedisError(#[from] redis::RedisError),

    /// Unspecified internal error.
    /// Use as last resort when no specific variant applies.
    /// Returns 500 Internal Server Error.
    #[error("Internal server error")]
    InternalError {
        /// Internal message for logging (not exposed to client)
        message: String,
    },

    /// A dependency (database, Redis) failed a readiness check.
    /// Returns 503 Service Unavailable.
    #[error("Service unavailable")]
    ServiceUnavailable {
        /// Name of the unavailable dependency
        service: String,
    },
}

// =============================================================================
// Error Methods
// =============================================================================

impl ApiError {
    /// Returns the HTTP status code for this error.
    ///
    /// This is the source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 401 Unauthorized - token missing or unverifiable
            Self::MissingAuth | Self::InvalidToken | Self::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }

            // 403 Forbidden - authenticated but not allowed from this address
            Self::IpNotAllowed => StatusCode::FORBIDDEN,

            // 400 Bad Request - client sent invalid data
            Self::ValidationError(_) | Self::BadRequest { .. } | Self::PayloadTooLarge => {
                StatusCode::BAD_REQUEST
            }

            // 404 Not Found
            Self::NotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            Self::Conflict { .. } => StatusCode::CONFLICT,

            // 429 Too Many Requests
            Self::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            Self::DatabaseError(_) | Self::RedisError(_) | Self::InternalError { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }

            // 503 Service Unavailable
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Returns `true` if this is a server-side error (5xx).
    ///
    /// Server errors are logged at ERROR level and never expose internal
    /// detail to clients. Client errors (4xx) are logged at WARN level.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_)
                | Self::RedisError(_)
                | Self::InternalError { .. }
                | Self::ServiceUnavailable { .. }
        )
    }

    /// Flattens `validator` errors into the `{ field: [msg, ...] }` wire shape.
    ///
    /// Falls back to the validation code when no explicit message was
    /// attached to the rule.
    pub fn field_errors(errors: &ValidationErrors) -> HashMap<String, Vec<String>> {
        errors
            .field_errors()
            .iter()
            .map(|(field, errs)| {
                let messages = errs
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                (field.to_string(), messages)
            })
            .collect()
    }
}

// =============================================================================
// Actix-web Integration
// =============================================================================

/// Implements Actix-web's `ResponseError` trait.
///
/// This allows returning `ApiError` directly from handlers:
///
/// ```rust,ignore
/// async fn handler() -> Result<impl Responder, ApiError> {
///     Err(ApiError::InvalidToken)
/// }
/// ```
///
/// The error is automatically converted to an HTTP response with the
/// status code and the contract wire body for its category.
impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        // Delegate to our implementation
        self.status_code()
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = match self {
            // 401: { "error": "Unauthorized", "message": "..." }
            Self::MissingAuth | Self::InvalidToken | Self::TokenExpired => {
                json!({ "error": "Unauthorized", "message": self.to_string() })
            }

            // 403: { "error": "Forbidden", "message": "IP address not allowed" }
            Self::IpNotAllowed => {
                json!({ "error": "Forbidden", "message": self.to_string() })
            }

            // 400 validation: { "success": false, "errors": { field: [msg] } }
            Self::ValidationError(errors) => {
                json!({ "success": false, "errors": Self::field_errors(errors) })
            }
            Self::BadRequest { message } => {
                json!({ "success": false, "errors": { "request": [message] } })
            }
            Self::PayloadTooLarge => {
                json!({ "success": false, "errors": { "properties": [self.to_string()] } })
            }

            Self::NotFound { resource } => {
                json!({ "error": "Not Found", "message": resource })
            }
            Self::Conflict { resource } => {
                json!({ "error": "Conflict", "message": resource })
            }

            // 429 carries the retry budget so SDKs can back off correctly
            Self::TooManyRequests {
                retry_after_seconds,
            } => {
                json!({
                    "error": "Too Many Requests",
                    "retry_after_seconds": retry_after_seconds,
                })
            }

            // 5xx: generic body, detail stays in the logs
            Self::DatabaseError(_) | Self::RedisError(_) | Self::InternalError { .. } => {
                json!({ "success": false, "error": "Failed to process event" })
            }
            Self::ServiceUnavailable { service } => {
                json!({ "error": "Service Unavailable", "message": service })
            }
        };

        HttpResponse::build(status).json(body)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_errors_return_401() {
        assert_eq!(ApiError::MissingAuth.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::InvalidToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::TokenExpired.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_ip_allowlist_returns_403() {
        assert_eq!(ApiError::IpNotAllowed.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::IpNotAllowed.to_string(), "IP address not allowed");
    }

    #[test]
    fn test_validation_errors_return_400() {
        assert_eq!(
            ApiError::BadRequest { message: "bad".to_string() }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::PayloadTooLarge.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_rate_limit_returns_429() {
        assert_eq!(
            ApiError::TooManyRequests { retry_after_seconds: 30 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_server_errors_are_flagged() {
        assert!(ApiError::InternalError { message: "test".to_string() }.is_server_error());
        assert!(ApiError::ServiceUnavailable { service: "redis".to_string() }.is_server_error());
        assert!(!ApiError::InvalidToken.is_server_error());
        assert!(!ApiError::NotFound { resource: "test".to_string() }.is_server_error());
    }

    #[test]
    fn test_field_errors_flatten_messages() {
        use validator::ValidationError;

        let mut errors = ValidationErrors::new();
        let mut err = ValidationError::new("length");
        err.message = Some("Must be at most 255 characters".into());
        errors.add("event", err);

        let flat = ApiError::field_errors(&errors);
        assert_eq!(
            flat.get("event"),
            Some(&vec!["Must be at most 255 characters".to_string()])
        );
    }

    #[test]
    fn test_field_errors_fall_back_to_code() {
        use validator::ValidationError;

        let mut errors = ValidationErrors::new();
        errors.add("currency", ValidationError::new("length"));

        let flat = ApiError::field_errors(&errors);
        assert_eq!(flat.get("currency"), Some(&vec!["length".to_string()]));
    }
}
