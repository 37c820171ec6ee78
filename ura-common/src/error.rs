//! Common error types for URA

use thiserror::Error;

/// Common result type for URA operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across URA services
///
/// The first four variants are the record- and method-level taxonomy the
/// reconciliation core reports through batch reports; the rest are ambient
/// infrastructure errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Name or address unusable after normalization; the record is dropped
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// Out-of-range field; stored with the field nulled, reported, not fatal
    #[error("Validation error: {0}")]
    Validation(String),

    /// A sentiment method errored or timed out; isolated to one (review, method) pair
    #[error("Method failure: {0}")]
    MethodFailure(String),

    /// Uniqueness or foreign-key clash; resolved by retrying as an update
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the underlying sqlx error is a UNIQUE constraint clash,
    /// which callers resolve by retrying the write as an update.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}
