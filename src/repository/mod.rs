//! Persistence for the storage configuration and object metadata.
//!
//! Both repositories share one SQLite pool. Every write is its own
//! statement; nothing here holds a transaction across provider calls.

pub mod config_repo;
pub mod record_repo;

pub use config_repo::ConfigRepository;
pub use record_repo::RecordRepository;

/// Return true if SQLx error indicates a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
