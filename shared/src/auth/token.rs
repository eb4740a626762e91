//! # Ingestion Token Format
//!
//! A token plaintext has the form `<prefix>.<secret>`:
//!
//! ```text
//! tk_4f9a2b1c.9e107d9d372bb6826bd81d3542a419d6...
//! └────┬─────┘ └──────────────┬────────────────┘
//!   prefix            secret (random)
//!  (12 chars,       (never stored; only the
//!   stored in        SHA-256 of the full
//!   plaintext)       plaintext is stored)
//! ```
//!
//! The prefix is the database lookup key and is safe to log. The secret is
//! compared by recomputing the hash over the full plaintext and checking it
//! against the stored hash **in constant time**, so a timing oracle cannot
//! distinguish "wrong secret" from "almost right secret".
//!
//! ## Verification Flow
//!
//! ```text
//! Authorization: Bearer tk_4f9a2b1c.9e107d…
//!        │
//!        ▼
//! parse_bearer_header ──► TokenPlaintext { prefix, plaintext }
//!        │
//!        ▼
//! SELECT ... WHERE prefix = $1 AND revoked_at IS NULL
//!        │
//!        ▼
//! TokenPlaintext::matches_hash(stored_hash)   (constant time)
//! ```

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of the public token prefix, in characters.
pub const TOKEN_PREFIX_LEN: usize = 12;

/// Errors produced while parsing token material from a request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// The `Authorization` header is absent or does not use the Bearer scheme.
    #[error("missing or malformed authorization header")]
    MalformedHeader,

    /// The token body is not `<12 chars>.<secret>`.
    #[error("malformed token")]
    MalformedToken,
}

/// A parsed-but-unverified token plaintext.
///
/// Holding this type means the *shape* is valid; nothing has been checked
/// against the database yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPlaintext {
    /// Public 12-character lookup prefix.
    pub prefix: String,
    /// The full `<prefix>.<secret>` plaintext, kept for hash recomputation.
    plaintext: String,
}

impl TokenPlaintext {
    /// Parses a raw token body of the form `<prefix>.<secret>`.
    ///
    /// ## Errors
    ///
    /// Returns [`TokenError::MalformedToken`] when the prefix is not exactly
    /// [`TOKEN_PREFIX_LEN`] characters or the secret part is empty.
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let (prefix, secret) = raw.split_once('.').ok_or(TokenError::MalformedToken)?;

        if prefix.len() != TOKEN_PREFIX_LEN || secret.is_empty() {
            return Err(TokenError::MalformedToken);
        }

        Ok(Self {
            prefix: prefix.to_string(),
            plaintext: raw.to_string(),
        })
    }

    /// Computes the hex-encoded SHA-256 hash of the full plaintext.
    ///
    /// This is the value stored in `ingestion_tokens.token_hash` at token
    /// creation time.
    pub fn hash(&self) -> String {
        hash_token(&self.plaintext)
    }

    /// Compares this token against a stored hash in constant time.
    ///
    /// Both sides are hex strings of fixed length, so the comparison cost
    /// depends only on the hash length, never on where the first mismatch
    /// occurs.
    pub fn matches_hash(&self, stored_hash: &str) -> bool {
        constant_time_eq(self.hash().as_bytes(), stored_hash.as_bytes())
    }
}

/// Extracts and parses the token from an `Authorization` header value.
///
/// ## Errors
///
/// - [`TokenError::MalformedHeader`] when the header does not start with
///   `Bearer `.
/// - [`TokenError::MalformedToken`] when the body fails [`TokenPlaintext::parse`].
pub fn parse_bearer_header(header: &str) -> Result<TokenPlaintext, TokenError> {
    let body = header
        .strip_prefix("Bearer ")
        .ok_or(TokenError::MalformedHeader)?;

    TokenPlaintext::parse(body.trim())
}

/// Hashes a token plaintext using SHA-256.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generates a new token plaintext with the given prefix.
///
/// Used by fixtures and provisioning scripts; the ingestion path itself
/// never mints tokens.
pub fn generate_token(prefix: &str) -> String {
    use rand::Rng;
    let bytes: [u8; 32] = rand::thread_rng().gen();
    format!("{}.{}", prefix, hex::encode(bytes))
}

/// Constant-time byte-slice equality.
///
/// Length mismatch returns false immediately; lengths here are public
/// (both sides are 64-char hex digests), so only the content comparison
/// needs to be branch-free.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "tk_4f9a2b1c0"; // 12 chars with the tk_ namespace

    #[test]
    fn test_parse_valid_token() {
        let parsed = TokenPlaintext::parse(&format!("{PREFIX}.supersecret")).unwrap();
        assert_eq!(parsed.prefix, PREFIX);
    }

    #[test]
    fn test_parse_rejects_wrong_prefix_length() {
        assert_eq!(
            TokenPlaintext::parse("short.secret"),
            Err(TokenError::MalformedToken)
        );
        assert_eq!(
            TokenPlaintext::parse("waytoolongprefix0.secret"),
            Err(TokenError::MalformedToken)
        );
    }

    #[test]
    fn test_parse_rejects_missing_separator_or_secret() {
        assert_eq!(
            TokenPlaintext::parse("nodotseparator"),
            Err(TokenError::MalformedToken)
        );
        assert_eq!(
            TokenPlaintext::parse(&format!("{PREFIX}.")),
            Err(TokenError::MalformedToken)
        );
    }

    #[test]
    fn test_bearer_header_parsing() {
        let token = parse_bearer_header(&format!("Bearer {PREFIX}.secret")).unwrap();
        assert_eq!(token.prefix, PREFIX);

        assert_eq!(
            parse_bearer_header(&format!("Basic {PREFIX}.secret")),
            Err(TokenError::MalformedHeader)
        );
        assert_eq!(parse_bearer_header(""), Err(TokenError::MalformedHeader));
    }

    #[test]
    fn test_hash_roundtrip_verification() {
        let plaintext = generate_token(PREFIX);
        let token = TokenPlaintext::parse(&plaintext).unwrap();
        let stored = token.hash();

        assert!(token.matches_hash(&stored));
        assert!(!token.matches_hash(&hash_token("different.token")));
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
        assert_eq!(hash_token("abc").len(), 64); // hex-encoded SHA-256
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        assert_ne!(generate_token(PREFIX), generate_token(PREFIX));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"same", b"same"));
        assert!(!constant_time_eq(b"same", b"sama"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }
}
