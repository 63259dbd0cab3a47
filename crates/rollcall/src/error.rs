//! Error types for rollcall.
//!
//! Infrastructure failures (database, configuration, collaborator plumbing)
//! live here. Expected user-facing outcomes such as a duplicate check-in are
//! modelled separately as [`crate::recorder::Rejection`] and
//! [`crate::service::RegistrationError`].

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for rollcall operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Collaborator Errors ===
    /// The persistence collaborator rejected or failed an operation.
    #[error("persistence collaborator failed: {0}")]
    Persistence(String),

    /// The collaborator already holds an item with the same key.
    #[error("{kind} already stored")]
    AlreadyStored {
        /// Kind of the refused item.
        kind: &'static str,
    },

    /// The change subscriber went away.
    #[error("change channel closed")]
    ChannelClosed,

    // === I/O Errors ===
    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for rollcall operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new persistence error.
    #[must_use]
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error means the item's key is already stored.
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Self::DatabaseQuery(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::ConstraintViolation
            }
            Self::AlreadyStored { .. } => true,
            _ => false,
        }
    }
}
