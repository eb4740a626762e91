//! # Request Validation Helpers
//!
//! Utilities for validating incoming request data using the `validator` crate.
//!
//! ## Overview
//!
//! This module provides:
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`validate_request`] | Validate a struct implementing `Validate` |
//! | [`validators`] | Custom validation functions |
//!
//! ## How Validation Works
//!
//! We use the [`validator`](https://docs.rs/validator/) crate which provides
//! derive macros for declarative validation:
//!
//! ```rust,ignore
//! use validator::Validate;
//!
//! #[derive(Validate)]
//! struct TrackEvent {
//!     #[validate(length(min = 1, max = 255))]
//!     event: String,
//!
//!     #[validate(custom(function = "validators::valid_currency"))]
//!     currency: String,
//! }
//! ```
//!
//! ## Error Response Format
//!
//! When validation fails, the API returns a 400 Bad Request with per-field
//! messages and writes no state:
//!
//! ```json
//! {
//!   "success": false,
//!   "errors": {
//!     "event": ["Must be between 1 and 255 characters"],
//!     "currency": ["Must be a 3-letter currency code"]
//!   }
//! }
//! ```
//!
//! ## Custom Validators
//!
//! The [`validators`] module provides validation functions for the
//! ingestion payload:
//!
//! | Validator | Purpose |
//! |-----------|---------|
//! | `not_blank` | String is not empty after trimming |
//! | `valid_currency` | Exactly three ASCII letters |
//! | `bounded_url` | Parseable URL no longer than 2048 chars |

use crate::errors::ApiError;
use validator::Validate;

// =============================================================================
// Core Validation Functions
// =============================================================================

/// Validates a request DTO that implements `Validate`.
///
/// This is the primary validation function. Use it in handlers to
/// validate incoming data.
///
/// ## Example
///
/// ```rust,ignore
/// async fn track_event(body: Json<TrackEventRequest>) -> Result<impl Responder, ApiError> {
///     validate_request(&body)?;  // Returns early if invalid
///
///     // Continue with validated data
/// }
/// ```
///
/// ## Errors
///
/// Returns `ApiError::ValidationError` with field-level details if validation fails.
pub fn validate_request<T: Validate>(data: &T) -> Result<(), ApiError> {
    data.validate().map_err(ApiError::ValidationError)
}

// =============================================================================
// Custom Validators
// =============================================================================

/// Custom validation functions for use with `#[validate(custom)]`.
///
/// These functions follow the validator crate's signature:
/// `fn(&T) -> Result<(), ValidationError>`
pub mod validators {
    use validator::ValidationError;

    /// Validates that a string is not blank (empty or whitespace-only).
    ///
    /// ## Valid Values
    ///
    /// - `"page_view"` ✓
    /// - `"  purchase  "` ✓ (has content)
    ///
    /// ## Invalid Values
    ///
    /// - `""` ✗
    /// - `"   "` ✗ (whitespace only)
    pub fn not_blank(value: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::new("blank"));
        }
        Ok(())
    }

    /// Validates an ISO-4217 style currency code: exactly three ASCII letters.
    ///
    /// ## Valid Values
    ///
    /// - `"USD"` ✓
    /// - `"eur"` ✓ (case is normalized downstream)
    ///
    /// ## Invalid Values
    ///
    /// - `"US"` ✗ (too short)
    /// - `"USDT"` ✗ (too long)
    /// - `"U1D"` ✗ (digit)
    pub fn valid_currency(value: &str) -> Result<(), ValidationError> {
        if value.len() != 3 || !value.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::new("currency"));
        }
        Ok(())
    }

    /// Validates a URL field: parseable and at most 2048 characters.
    ///
    /// Relative URLs are rejected; tracking SDKs always submit absolute
    /// page and referrer URLs.
    pub fn bounded_url(value: &str) -> Result<(), ValidationError> {
        if value.len() > 2048 {
            return Err(ValidationError::new("url_too_long"));
        }
        if url::Url::parse(value).is_err() {
            return Err(ValidationError::new("invalid_url"));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::validators::*;

    #[test]
    fn test_not_blank_valid() {
        assert!(not_blank("page_view").is_ok());
        assert!(not_blank("  purchase  ").is_ok());
        assert!(not_blank("a").is_ok());
    }

    #[test]
    fn test_not_blank_invalid() {
        assert!(not_blank("").is_err());
        assert!(not_blank("   ").is_err());
        assert!(not_blank("\t\n").is_err());
    }

    #[test]
    fn test_valid_currency_accepts_three_letters() {
        assert!(valid_currency("USD").is_ok());
        assert!(valid_currency("eur").is_ok());
        assert!(valid_currency("Gbp").is_ok());
    }

    #[test]
    fn test_valid_currency_rejects_wrong_length() {
        assert!(valid_currency("US").is_err());
        assert!(valid_currency("USDT").is_err());
        assert!(valid_currency("").is_err());
    }

    #[test]
    fn test_valid_currency_rejects_non_letters() {
        assert!(valid_currency("U1D").is_err());
        assert!(valid_currency("U$D").is_err());
    }

    #[test]
    fn test_bounded_url_valid() {
        assert!(bounded_url("https://shop.example.com/products?id=1").is_ok());
        assert!(bounded_url("https://google.com/").is_ok());
    }

    #[test]
    fn test_bounded_url_rejects_garbage() {
        assert!(bounded_url("not a url").is_err());
        assert!(bounded_url("/relative/path").is_err());
    }

    #[test]
    fn test_bounded_url_rejects_oversized() {
        let long = format!("https://example.com/{}", "a".repeat(2048));
        assert!(bounded_url(&long).is_err());
    }
}
