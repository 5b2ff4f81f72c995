//! Error types for the Anthropic Messages client.

use thiserror::Error;

/// Errors that can occur when talking to the Messages API.
#[derive(Debug, Error)]
pub enum AnthropicError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// API returned an error response
    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Streaming error
    #[error("Streaming error: {0}")]
    StreamError(String),
}

impl From<serde_json::Error> for AnthropicError {
    fn from(err: serde_json::Error) -> Self {
        AnthropicError::ParseError(err.to_string())
    }
}
