//! # Token Authentication
//!
//! Resolves an `Authorization: Bearer <prefix>.<secret>` header to an
//! ingestion token:
//!
//! 1. Parse the header (shape only, no I/O).
//! 2. Look up the token by prefix, filtering revoked rows in SQL.
//! 3. Reject expired tokens.
//! 4. Recompute the SHA-256 over the full plaintext and compare in
//!    constant time against the stored hash.
//! 5. Enforce the IP allowlist when one is configured.
//! 6. Touch `last_used_at` on a spawned task (best-effort).
//!
//! Unknown prefix, revoked token and hash mismatch all answer with the
//! same 401 body so callers cannot probe which prefixes exist; the log
//! lines differ.

use chrono::Utc;
use tracing::{debug, warn};

use shared::auth::token::{parse_bearer_header, TokenError};
use shared::errors::{ApiError, ApiResult};
use shared::tracing_config::log_error;

use crate::domain::{IngestionToken, Website};
use crate::repository::TokenRepository;

/// Authenticates ingestion requests.
#[derive(Clone)]
pub struct TokenAuthenticator {
    repository: TokenRepository,
}

impl TokenAuthenticator {
    pub fn new(repository: TokenRepository) -> Self {
        Self { repository }
    }

    /// Authenticates a request, returning the token and the website it
    /// resolves to.
    ///
    /// ## Errors
    ///
    /// - `MissingAuth` (401): header absent or not Bearer-shaped
    /// - `InvalidToken` (401): malformed body, unknown/revoked prefix, hash mismatch
    /// - `TokenExpired` (401): `expires_at` in the past
    /// - `IpNotAllowed` (403): allowlist configured and client IP not on it
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        client_ip: Option<&str>,
    ) -> ApiResult<(IngestionToken, Website)> {
        let header = authorization.ok_or(ApiError::MissingAuth)?;

        let plaintext = parse_bearer_header(header).map_err(|e| match e {
            TokenError::MalformedHeader => ApiError::MissingAuth,
            TokenError::MalformedToken => ApiError::InvalidToken,
        })?;

        let token = self
            .repository
            .find_active_by_prefix(&plaintext.prefix)
            .await
            .map_err(|e| ApiError::InternalError {
                message: e.to_string(),
            })?
            .ok_or_else(|| {
                debug!(prefix = %plaintext.prefix, "Unknown or revoked token prefix");
                ApiError::InvalidToken
            })?;

        if let Some(expires_at) = token.expires_at {
            if expires_at < Utc::now() {
                debug!(prefix = %token.prefix, "Expired token");
                return Err(ApiError::TokenExpired);
            }
        }

        if !plaintext.matches_hash(&token.token_hash) {
            warn!(prefix = %token.prefix, "Token hash mismatch");
            return Err(ApiError::InvalidToken);
        }

        if let Some(allowlist) = token.ip_allowlist.as_ref().filter(|l| !l.is_empty()) {
            let allowed = client_ip
                .map(|ip| allowlist.iter().any(|entry| entry == ip))
                .unwrap_or(false);
            if !allowed {
                warn!(
                    website_id = token.website_id,
                    prefix = %token.prefix,
                    "Client IP not on token allowlist"
                );
                return Err(ApiError::IpNotAllowed);
            }
        }

        let website = self
            .repository
            .find_website(token.website_id)
            .await
            .map_err(|e| ApiError::InternalError {
                message: e.to_string(),
            })?
            .ok_or_else(|| {
                warn!(website_id = token.website_id, "Token points at a missing website");
                ApiError::InvalidToken
            })?;

        // Best-effort usage bookkeeping; the response never waits on it.
        let repository = self.repository.clone();
        let token_id = token.token_id;
        tokio::spawn(async move {
            if let Err(e) = repository.touch_last_used(token_id, Utc::now()).await {
                log_error(&e, "Failed to record token usage");
            }
        });

        Ok((token, website))
    }
}
