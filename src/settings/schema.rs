//! Settings schema definitions for Noble Human.
//!
//! All settings structs use `#[serde(default)]` to allow partial configuration files.
//! Missing fields are filled with sensible defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root settings structure.
///
/// Loaded from `~/.noble-human/settings.toml` with environment variable
/// interpolation support. The admin-editable prompt templates are not part of
/// this file; they live in the database so edits apply without a restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NobleSettings {
    /// Schema version for migrations
    pub version: u32,

    pub server: ServerSettings,

    pub database: DatabaseSettings,

    /// Language model configuration
    pub ai: AiSettings,

    /// Fixed prompt text
    pub prompts: PromptSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Name of the cookie carrying the session's user id
    pub session_cookie: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite file, or `:memory:`. Defaults to `~/.noble-human/noble-human.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl DatabaseSettings {
    pub fn resolved_path(&self) -> PathBuf {
        match self.path.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            Some(":memory:") => PathBuf::from(":memory:"),
            Some(path) => expand_home(path),
            None => data_dir().join("noble-human.db"),
        }
    }
}

/// Which backend answers chat turns and synthesises completion messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AiProvider {
    Anthropic,
    /// No model: chat turns fail with an upstream error and completion
    /// messages use the fallback text.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AiSettings {
    pub provider: AiProvider,

    pub model: String,

    /// API key (supports $ENV_VAR syntax, falls back to ANTHROPIC_API_KEY)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Custom endpoint for proxies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    pub max_tokens: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Longest silence tolerated from the model before a call is abandoned
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PromptSettings {
    /// Base persona placed first in every chat system prompt
    pub persona: String,

    /// Completion message used when no synthesis template is configured
    pub completion_fallback: String,
}

pub const DEFAULT_COMPLETION_MESSAGE: &str =
    "Congratulations! You have completed all the steps of this exercise.";

impl Default for NobleSettings {
    fn default() -> Self {
        Self {
            version: 1,
            server: ServerSettings::default(),
            database: DatabaseSettings::default(),
            ai: AiSettings::default(),
            prompts: PromptSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            session_cookie: "nh_session".to_string(),
        }
    }
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            provider: AiProvider::Anthropic,
            model: anthropic_messages::models::CLAUDE_SONNET_4_5.to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 2048,
            temperature: None,
            request_timeout_secs: 120,
        }
    }
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            persona: "You are a compassionate guide helping someone reflect on their life with wisdom and care. Ask one question at a time and keep answers short.".to_string(),
            completion_fallback: DEFAULT_COMPLETION_MESSAGE.to_string(),
        }
    }
}

/// `~/.noble-human`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".noble-human")
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(path),
    }
}
