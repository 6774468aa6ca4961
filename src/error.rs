//! Error types for Hearth

use thiserror::Error;

/// Result type alias for Hearth operations
pub type Result<T> = std::result::Result<T, HearthError>;

/// Main error type for Hearth
#[derive(Error, Debug)]
pub enum HearthError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(feature = "openai")]
    Http(#[from] reqwest::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(not(feature = "openai"))]
    Http(String),

    #[error("Completion service error: {0}")]
    Completion(String),

    #[error("No credits remaining for user {0}")]
    OutOfCredits(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HearthError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, HearthError::Http(_) | HearthError::Completion(_))
    }

    /// Stable error code for the HTTP surface
    pub fn code(&self) -> &'static str {
        match self {
            HearthError::NotFound(_) => "not_found",
            HearthError::InvalidInput(_) | HearthError::Serialization(_) => "invalid_input",
            HearthError::OutOfCredits(_) => "out_of_credits",
            HearthError::Http(_) | HearthError::Completion(_) => "upstream_unavailable",
            HearthError::Config(_) => "config",
            _ => "internal",
        }
    }
}
