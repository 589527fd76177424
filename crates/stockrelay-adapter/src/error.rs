//! Error types for the adapter crate.

use thiserror::Error;

/// Errors constructing or configuring an adapter.
///
/// Push results are never errors: every outcome of a push attempt is
/// classified into a [`crate::PushOutcome`] variant instead.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid platform URL: {0}")]
    InvalidUrl(String),
}

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;
