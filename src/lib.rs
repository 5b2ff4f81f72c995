//! Guided self-reflection exercises with AI-assisted conversations.
//!
//! Users work through exercises step by step. A step may carry an AI
//! conversation and may ask for a written result; once every step of an
//! exercise is completed a completion message is synthesised once.
//!
//! - [`content`]: exercises, steps, blocks, answers and users
//! - [`store`]: the repository over SQLite
//! - [`template`]: prompt templates and the HTML-to-text pipeline
//! - [`completion`]: progress tracking and step evaluation
//! - [`conversation`]: chat turns and result saving
//! - [`llm`]: the language model seam
//! - [`server`]: the HTTP surface
//! - [`settings`] and [`cli`]: configuration and operator commands

pub mod cli;
pub mod completion;
pub mod content;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod server;
pub mod settings;
pub mod store;
pub mod template;

#[cfg(test)]
mod test_fixtures;

pub use error::{NobleError, Result};
