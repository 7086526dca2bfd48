// src/error.rs

//! Unified error handling for the ingestion pipeline.

use std::fmt;

use thiserror::Error;

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Cron expression parsing failed
    #[error("Cron error: {0}")]
    Cron(#[from] cron::error::Error),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Browser launch or session failure
    #[error("Browser error: {0}")]
    Browser(String),

    /// An extraction attempt exceeded its time budget
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// Extraction failed on a page (navigation, locator miss)
    #[error("Extraction error for {context}: {message}")]
    Extraction { context: String, message: String },

    /// Lookup by id failed
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Operation not permitted in the current state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Persistence layer failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a browser error.
    pub fn browser(message: impl fmt::Display) -> Self {
        Self::Browser(message.to_string())
    }

    /// Create an extraction error with context.
    pub fn extraction(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Extraction {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(kind: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Create a state conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl fmt::Display) -> Self {
        Self::Storage(message.to_string())
    }

    /// Whether a job that hit this error may be attempted again.
    ///
    /// Configuration, validation and state errors are terminal; network,
    /// browser and persistence failures are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Config(_)
            | Self::Validation(_)
            | Self::Selector { .. }
            | Self::Toml(_)
            | Self::TomlSerialize(_)
            | Self::Url(_)
            | Self::Cron(_)
            | Self::NotFound { .. }
            | Self::Conflict(_) => false,
            Self::Io(_)
            | Self::Http(_)
            | Self::Json(_)
            | Self::Browser(_)
            | Self::Timeout(_)
            | Self::Extraction { .. }
            | Self::Storage(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::Timeout(30).is_retryable());
        assert!(AppError::browser("launch failed").is_retryable());
        assert!(AppError::extraction("la-county", "locator missing").is_retryable());
        assert!(!AppError::config("no source for 00000").is_retryable());
        assert!(!AppError::conflict("job is running").is_retryable());
    }

    #[test]
    fn test_not_found_message() {
        let err = AppError::not_found("job", "abc");
        assert_eq!(err.to_string(), "job not found: abc");
    }
}
