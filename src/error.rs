//! Error types for device-tokens
//!
//! This module defines the error kinds surfaced by the token issuer, the
//! authentication strategy and the storage backends.
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

use crate::config::ConfigError;

/// Generic message shown to a client for every authentication failure
pub const PUBLIC_AUTH_FAILURE: &str = "Invalid credentials";

/// Authentication-related errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Credentials are absent from the request; the strategy declines
    #[error("Credentials not present")]
    NotApplicable,

    /// Unknown principal, unknown token or expired token
    #[error("Invalid token")]
    InvalidToken,

    /// Persistence failure while resolving the principal or token
    #[error("Token store unavailable: {0}")]
    StoreUnavailable(#[from] DbError),
}

impl AuthError {
    /// Message safe to return to the requester
    ///
    /// Every failure collapses into the same generic text so that callers
    /// cannot tell an unknown principal from a bad token or a storage fault.
    pub fn public_message(&self) -> &'static str {
        PUBLIC_AUTH_FAILURE
    }

    /// Whether the strategy declined rather than failed
    pub fn is_not_applicable(&self) -> bool {
        matches!(self, AuthError::NotApplicable)
    }
}

/// Token issuer setup errors
#[derive(Debug, Error)]
pub enum IssuerError {
    /// The backend exposes no recognizable token association for principals
    #[error("Cannot determine authentication token owner: {0}")]
    AmbiguousTokenOwner(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection-level failure (closed connection, worker thread gone)
    #[error("Database connection error: {0}")]
    Connection(String),

    /// Document store failure (snapshot IO, serialization, poisoned lock)
    #[error("Document store error: {0}")]
    Document(String),

    /// Record not found
    #[error("Record not found")]
    NotFound,

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

impl From<tokio_rusqlite::Error> for DbError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(e) => DbError::Sqlite(e),
            other => DbError::Connection(other.to_string()),
        }
    }
}

/// Application-level error type
///
/// Aggregates the domain-specific error types for the admin binary.
#[derive(Debug, Error)]
pub enum AppError {
    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Issuer setup error
    #[error("Issuer error: {0}")]
    Issuer(#[from] IssuerError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Unknown principal named on the command line
    #[error("Principal not found: {0}")]
    PrincipalNotFound(String),
}
