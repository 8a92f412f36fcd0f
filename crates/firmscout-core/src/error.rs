use std::time::Duration;

use thiserror::Error;

/// Application-wide error types for firmscout.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (fetching a page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Static fetch produced less text than the minimum for this URL class.
    /// A strategy-level failure: the cascade escalates, the job does not fail.
    #[error("Insufficient content from {url}: got {got} chars, need {min}")]
    ContentInsufficient { url: String, got: usize, min: usize },

    /// The circuit breaker for this URL is open; no network attempt was made.
    #[error("Circuit open for '{key}', retry after {} seconds", retry_after.as_secs())]
    CircuitOpen { key: String, retry_after: Duration },

    /// Rate limit exceeded (HTTP 429 from a target or the analyzer API).
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Analyzer API call failed or returned an unusable payload.
    #[error("Analyzer error (HTTP {status_code}): {message}")]
    AnalyzerError {
        message: String,
        status_code: u16,
        retryable: bool,
    },

    /// Headless browser launch, navigation, or interaction failed.
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::AnalyzerError { retryable, .. } => *retryable,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if this error should count against the per-URL circuit
    /// breaker. Strategy-level signals like [`AppError::ContentInsufficient`]
    /// deliberately do not.
    pub fn should_trip_circuit(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::BrowserError(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("connection")
            }
            _ => false,
        }
    }
}
