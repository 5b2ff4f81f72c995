//! Chat turns on completion steps.
//!
//! Each completion step has its own transcript. A step has no messages until
//! the first user turn is stored; it becomes completed only through the
//! step evaluator, never through a chat turn directly.

pub mod engine;
pub mod prompt;

pub use engine::{ConversationEngine, SavedResult, TurnEvent, TurnOutcome, TurnStream};
pub use prompt::compose_system_prompt;
