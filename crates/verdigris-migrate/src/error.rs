//! Error types for the migration runner.

use std::path::PathBuf;

/// Errors that can occur while migrating a database.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// The spec could not be parsed or modelled.
    #[error(transparent)]
    Schema(#[from] verdigris_schema::SchemaError),

    /// Database error during introspection or migration.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error touching the database file or a backup.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Asked to report on a database that does not exist.
    #[error("Database not found: {0} (pass --upgrade to create it)")]
    MissingDatabase(PathBuf),

    /// The backup prefix is not a valid strftime pattern.
    #[error("Invalid backup prefix {0:?}: not a valid strftime pattern")]
    BadBackupPrefix(String),

    /// The forced confirmation answer was not recognizable.
    #[error("Invalid forced response {0:?}: expected y or n")]
    BadForcedResponse(String),
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
