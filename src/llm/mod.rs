//! Text completion capability.
//!
//! The core needs two call shapes from a language model: a streamed chat turn
//! (system prompt plus the full ordered history, every turn) and a single
//! prompt-in/text-out completion used for completion-message synthesis. The
//! model is treated as stateless.

pub mod anthropic;
#[cfg(test)]
pub(crate) mod scripted;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::content::{ConversationMessage, MessageRole};
use crate::error::{NobleError, Result};
use crate::settings::{AiProvider, AiSettings};

pub use anthropic::AnthropicLlm;

/// Stream of text deltas. An `Err` item ends the turn abnormally.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One turn of history as sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            text: text.into(),
        }
    }
}

impl From<&ConversationMessage> for ChatMessage {
    fn from(message: &ConversationMessage) -> Self {
        Self {
            role: message.role,
            text: message.text(),
        }
    }
}

/// Trait for language model backends.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    /// Start a streamed chat turn.
    async fn stream_chat(&self, system: &str, messages: &[ChatMessage]) -> Result<TextStream>;

    /// Single request/response completion.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Get a description of this backend for logging
    fn description(&self) -> String;
}

/// Backend used when no model is configured. Every call fails, which makes
/// chat turns report an error and completion synthesis use its fallback.
pub struct UnconfiguredLlm;

#[async_trait]
impl TextCompletion for UnconfiguredLlm {
    async fn stream_chat(&self, _system: &str, _messages: &[ChatMessage]) -> Result<TextStream> {
        Err(NobleError::UpstreamModel(
            "no language model is configured".to_string(),
        ))
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(NobleError::UpstreamModel(
            "no language model is configured".to_string(),
        ))
    }

    fn description(&self) -> String {
        "Unconfigured (no language model)".to_string()
    }
}

/// Create the configured backend.
pub fn create_llm(settings: &AiSettings) -> anyhow::Result<Arc<dyn TextCompletion>> {
    match settings.provider {
        AiProvider::Anthropic => {
            let llm = AnthropicLlm::from_settings(settings)?;
            tracing::info!("Using language model: {}", llm.description());
            Ok(Arc::new(llm))
        }
        AiProvider::None => {
            tracing::warn!("No language model configured; chat is disabled");
            Ok(Arc::new(UnconfiguredLlm))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_llm_errors() {
        let llm = UnconfiguredLlm;
        assert!(matches!(
            llm.complete("hi").await,
            Err(NobleError::UpstreamModel(_))
        ));
        assert!(llm.stream_chat("system", &[ChatMessage::user("hi")]).await.is_err());
    }

    #[test]
    fn create_llm_honours_provider() {
        let settings = AiSettings {
            provider: AiProvider::None,
            ..AiSettings::default()
        };
        let llm = create_llm(&settings).unwrap();
        assert!(llm.description().contains("Unconfigured"));

        let settings = AiSettings {
            api_key: Some("sk-test".into()),
            ..AiSettings::default()
        };
        let llm = create_llm(&settings).unwrap();
        assert!(llm.description().contains("claude"));
    }

    #[test]
    fn anthropic_without_key_is_a_config_error() {
        let settings = AiSettings {
            api_key: None,
            ..AiSettings::default()
        };
        assert!(create_llm(&settings).is_err());
    }
}
