//! Common error types for SonoScore

use thiserror::Error;

/// Common result type for SonoScore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across SonoScore services
#[derive(Error, Debug)]
pub enum Error {
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

    /// Malformed taxonomy or template authoring input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unique key already taken
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Selection path rejected by the taxonomy's foreign keys
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the underlying store rejected a write on a UNIQUE constraint
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
            _ => false,
        }
    }

    /// True when the underlying store rejected a write on a FOREIGN KEY constraint
    pub fn is_foreign_key_violation(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => db_err.is_foreign_key_violation(),
            _ => false,
        }
    }

    /// Re-map a unique violation to [`Error::Conflict`], passing anything else through
    pub fn on_unique_violation(self, message: impl FnOnce() -> String) -> Self {
        if self.is_unique_violation() {
            Error::Conflict(message())
        } else {
            self
        }
    }

    /// Re-map a foreign key violation with `map`, passing anything else through
    pub fn on_foreign_key_violation(self, map: impl FnOnce() -> Error) -> Self {
        if self.is_foreign_key_violation() {
            map()
        } else {
            self
        }
    }
}
