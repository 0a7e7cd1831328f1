//! Error types for fedisim
//!
//! Protocol and grammar failures carry their own typed errors
//! (`SignatureError`, `MediaTypeError`) and are folded into `HarnessError`
//! at the public API boundary.

use std::time::Duration;

use thiserror::Error;

use crate::federation::SignatureError;
use crate::media::MediaTypeError;

/// Harness-wide error type
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Signature verification or parsing failed
    #[error("Invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    /// Malformed Accept or Content-Type header
    #[error("Invalid media type: {0}")]
    MediaType(#[from] MediaTypeError),

    /// Input rejected before any I/O happened
    #[error("Validation error: {0}")]
    Validation(String),

    /// The mock server was used before `start()` or after `stop()`
    #[error("Mock federation server is not running")]
    ServerNotRunning,

    /// No POST reached the mock server within the wait window
    #[error("No POST received within {0:?}")]
    NoPostReceived(Duration),

    /// A polled condition was never satisfied
    #[error("Not observed after {attempts} attempts: {what}")]
    NotObserved { what: String, attempts: u32 },

    /// Remote side answered with a non-success status
    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Socket or thread error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key generation or encoding error
    #[error("Key error: {0}")]
    Key(String),
}

impl From<config::ConfigError> for HarnessError {
    fn from(err: config::ConfigError) -> Self {
        HarnessError::Config(err.to_string())
    }
}

/// Result type alias using HarnessError
pub type Result<T> = std::result::Result<T, HarnessError>;
