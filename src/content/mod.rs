//! Content model: exercises, steps, blocks, answers, users and messages.
//!
//! Pure data shapes. Loosely-typed stored documents (step content, step
//! responses, user data) are upgraded to their canonical form while
//! deserializing, so nothing outside this module sees historical layouts.

pub mod exercise;
pub mod message;
pub mod responses;
pub mod user;

pub use exercise::{AiBlock, Block, BlockKind, Exercise, ExerciseMetadata, ExerciseStep, StepContent};
pub use message::{parts_text, text_parts, ConversationMessage, MessagePart, MessageRole};
pub use responses::StepResponses;
pub use user::{UrlEntry, User, UserData};
