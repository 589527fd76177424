//! Database and store error types.

use thiserror::Error;

/// Error type for the movement store and its queries.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Malformed movement rejected at creation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation attempted against a movement in an incompatible state.
    /// No state change occurs.
    #[error("Invalid transition for movement {id}: cannot {operation} while {found}")]
    InvalidTransition {
        id: String,
        operation: &'static str,
        found: &'static str,
    },

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using DatabaseError.
pub type DatabaseResult<T> = Result<T, DatabaseError>;
