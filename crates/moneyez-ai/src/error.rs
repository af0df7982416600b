//! Error types for moneyez-ai

use thiserror::Error;

/// Result type alias using moneyez-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the model or embedding provider
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned an error response
    #[error("API error: {message} (type: {error_type})")]
    Api { error_type: String, message: String },

    /// Rate limit exceeded
    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Stream was aborted
    #[error("Request aborted")]
    Aborted,

    /// Request did not finish in time
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl Error {
    /// Create an API error from type and message
    pub fn api(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::RateLimited { .. } | Error::Sse(_) | Error::Timeout(_) => true,
            Error::Api {
                error_type,
                message,
            } => {
                let et = error_type.to_lowercase();
                let msg = message.to_lowercase();
                et.contains("resource_exhausted")
                    || et.contains("unavailable")
                    || msg.contains("rate limit")
                    || msg.contains("quota")
                    || msg.contains("overloaded")
                    || msg.contains("too many requests")
                    || msg.contains("503")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_typed_variants() {
        assert!(Error::RateLimited { retry_after: Some(5) }.is_retryable());
        assert!(Error::Sse("connection reset".into()).is_retryable());
        assert!(Error::Timeout(60).is_retryable());
    }

    #[test]
    fn test_retryable_api_resource_exhausted() {
        let e = Error::api("RESOURCE_EXHAUSTED", "Quota exceeded for requests per minute");
        assert!(e.is_retryable());
    }

    #[test]
    fn test_retryable_api_unavailable() {
        let e = Error::api("UNAVAILABLE", "The model is overloaded. Please try again later.");
        assert!(e.is_retryable());
    }

    #[test]
    fn test_not_retryable_api_invalid_argument() {
        let e = Error::api("INVALID_ARGUMENT", "API key not valid");
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_not_retryable_non_api() {
        assert!(!Error::InvalidApiKey.is_retryable());
        assert!(!Error::Aborted.is_retryable());
        assert!(!Error::UnexpectedResponse("garbage".into()).is_retryable());
    }
}
