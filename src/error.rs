//! Error types and handling for Helion
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for Helion operations
pub type Result<T> = std::result::Result<T, HelionError>;

/// Main error type for Helion
#[derive(Debug, Error)]
pub enum HelionError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Telemetry store errors
    #[error("Database error: {message}")]
    Database { message: String },

    /// HTTP/Web server errors
    #[error("Web server error: {message}")]
    Web { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Network-related errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// Vendor API errors (Enphase, Select.Live)
    #[error("API error: {message}")]
    Api { message: String },

    /// Authentication/authorization errors
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Vendor asked us to slow down
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// Unknown system, point or record
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl HelionError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        HelionError::Config {
            message: message.into(),
        }
    }

    /// Create a new database error
    pub fn database<S: Into<String>>(message: S) -> Self {
        HelionError::Database {
            message: message.into(),
        }
    }

    /// Create a new web error
    pub fn web<S: Into<String>>(message: S) -> Self {
        HelionError::Web {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        HelionError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        HelionError::Io {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        HelionError::Network {
            message: message.into(),
        }
    }

    /// Create a new API error
    pub fn api<S: Into<String>>(message: S) -> Self {
        HelionError::Api {
            message: message.into(),
        }
    }

    /// Create a new auth error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        HelionError::Auth {
            message: message.into(),
        }
    }

    /// Create a new rate-limit error
    pub fn rate_limited<S: Into<String>>(message: S, retry_after_secs: Option<u64>) -> Self {
        HelionError::RateLimited {
            message: message.into(),
            retry_after_secs,
        }
    }

    /// Create a new not-found error
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        HelionError::NotFound {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        HelionError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        HelionError::Generic {
            message: message.into(),
        }
    }

    /// Whether the vendor rejected our credentials
    pub fn is_auth(&self) -> bool {
        matches!(self, HelionError::Auth { .. })
    }
}

impl From<std::io::Error> for HelionError {
    fn from(err: std::io::Error) -> Self {
        HelionError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for HelionError {
    fn from(err: serde_yaml::Error) -> Self {
        HelionError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for HelionError {
    fn from(err: serde_json::Error) -> Self {
        HelionError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for HelionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HelionError::timeout(err.to_string())
        } else if err.is_decode() {
            HelionError::Serialization {
                message: err.to_string(),
            }
        } else {
            HelionError::network(err.to_string())
        }
    }
}

impl From<rusqlite::Error> for HelionError {
    fn from(err: rusqlite::Error) -> Self {
        HelionError::database(err.to_string())
    }
}

impl From<chrono::ParseError> for HelionError {
    fn from(err: chrono::ParseError) -> Self {
        HelionError::validation("datetime", err.to_string())
    }
}
