//! # Repository Layer
//!
//! PostgreSQL data access for the ingestion pipeline.
//!
//! Two calling conventions coexist here:
//!
//! - **Pool methods** (`&self`, backed by `PgPool`) for the synchronous
//!   ingress path: token lookup, idempotency pre-check, job enqueue/claim.
//! - **Transaction functions** (associated functions taking
//!   `&mut PgConnection`) for everything the worker does, so the whole
//!   pipeline for one job commits or rolls back atomically.

pub mod customer_repository;
pub mod dimension_repository;
pub mod event_repository;
pub mod job_repository;
pub mod session_repository;
pub mod token_repository;

pub use customer_repository::CustomerRepository;
pub use dimension_repository::DimensionRepository;
pub use event_repository::EventRepository;
pub use job_repository::JobRepository;
pub use session_repository::SessionRepository;
pub use token_repository::TokenRepository;

// =============================================================================
// REPOSITORY ERRORS
// =============================================================================

/// Repository-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Returns `true` when the error is a PostgreSQL unique-constraint
/// violation (SQLSTATE 23505).
///
/// The idempotency gate and the dimension interning upserts rely on this
/// to convert a lost insert race into a read of the winning row.
pub fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
        assert!(!is_unique_violation(&sqlx::Error::PoolClosed));
    }
}
