//! HTTP client for the Anthropic Messages API.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use crate::completion::CompletionModel;
use crate::error::AnthropicError;
use crate::types::ANTHROPIC_VERSION;

/// Public API endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Client for Anthropic models.
///
/// Holds the API key and a pooled HTTP client; cheap to clone.
#[derive(Clone)]
pub struct Client {
    /// HTTP client for making requests
    http_client: reqwest::Client,
    /// API key sent as `x-api-key`
    api_key: String,
    /// Base URL without trailing slash
    base_url: String,
}

impl Client {
    /// Create a client against the public endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self, AnthropicError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a client against a custom endpoint (proxies, tests).
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, AnthropicError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AnthropicError::ConfigError("API key is empty".to_string()));
        }

        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(AnthropicError::HttpError)?;

        Ok(Self {
            http_client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Get a completion model for the specified model ID.
    pub fn completion_model(&self, model: &str) -> CompletionModel {
        CompletionModel::new(self.clone(), model.to_string())
    }

    /// URL of the messages endpoint.
    pub(crate) fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    /// Build headers with authentication.
    pub(crate) fn build_headers(&self) -> Result<HeaderMap, AnthropicError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| AnthropicError::ConfigError(e.to_string()))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(headers)
    }

    /// Get the HTTP client.
    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
