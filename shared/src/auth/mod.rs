//! # Ingestion Token Primitives
//!
//! Parsing, hashing and verification for per-site ingestion tokens.
//!
//! Tokens are created by the admin surface (out of scope here) and consumed
//! by the tracking service. Only the SHA-256 hash of the plaintext is ever
//! stored; the database row is located by the public prefix.

pub mod token;

pub use token::{parse_bearer_header, TokenError, TokenPlaintext, TOKEN_PREFIX_LEN};
