//! Minimal client for the Anthropic Messages API.
//!
//! Supports the two call shapes the application needs: a single
//! request/response completion and an SSE stream of text deltas.
//!
//! # Example
//!
//! ```rust,no_run
//! use anthropic_messages::{Client, Message};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new("sk-ant-...")?;
//!     let model = client.completion_model(anthropic_messages::models::CLAUDE_SONNET_4_5);
//!
//!     let request = model.build_request(Some("Be brief.".into()), vec![Message::user("Hi")], false);
//!     let response = model.completion(request).await?;
//!     println!("{}", response.text());
//!     Ok(())
//! }
//! ```

mod client;
mod completion;
mod error;
mod streaming;
mod types;

pub use client::Client;
pub use completion::CompletionModel;
pub use error::AnthropicError;
pub use streaming::{StreamChunk, StreamingResponse};
pub use types::*;

/// Commonly used Claude model identifiers
pub mod models {
    /// Claude Opus 4.5 - Most powerful model
    pub const CLAUDE_OPUS_4_5: &str = "claude-opus-4-5";
    /// Claude Sonnet 4.5 - Balanced performance
    pub const CLAUDE_SONNET_4_5: &str = "claude-sonnet-4-5";
    /// Claude Haiku 4.5 - Fast and efficient
    pub const CLAUDE_HAIKU_4_5: &str = "claude-haiku-4-5";
}
