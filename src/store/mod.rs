//! Persistence repository.
//!
//! The core talks to storage only through [`Repository`]. [`SqliteStore`] is
//! the production implementation; it keeps every piece of state (there is no
//! in-process cache) so concurrent requests always see committed data.
//!
//! ## Tables
//!
//! - `users` - accounts and their personalisation document
//! - `exercises`, `exercise_steps` - authored content
//! - `completions`, `completion_steps` - per-user progress
//! - `conversation_messages` - append-only chat transcript per step
//! - `system_settings` - admin-editable key/value templates

pub mod schema;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::{ConversationMessage, Exercise, ExerciseStep, MessagePart, MessageRole, StepResponses, User, UserData};
use crate::error::Result;

pub use sqlite::SqliteStore;

/// SystemSettings key of the chat persona template.
pub const SYSTEM_PROMPT_TEMPLATE: &str = "systemPromptTemplate";
/// SystemSettings key of the completion-message synthesis template.
pub const EXERCISE_COMPLETED_PROMPT_TEMPLATE: &str = "exerciseCompletedPromptTemplate";

/// One user's attempt at one exercise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub id: String,
    pub user_id: String,
    pub exercise_id: String,
    pub completion_message: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Ordered by the exercise step order
    pub steps: Vec<CompletionStep>,
}

impl Completion {
    /// True when there is at least one step and every step is completed.
    pub fn all_steps_completed(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|s| s.completed)
    }

    pub fn progress(&self) -> Progress {
        Progress {
            completed: self.steps.iter().filter(|s| s.completed).count(),
            total: self.steps.len(),
        }
    }

    pub fn step(&self, exercise_step_id: &str) -> Option<&CompletionStep> {
        self.steps
            .iter()
            .find(|s| s.exercise_step_id == exercise_step_id)
    }
}

/// Per-step progress record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionStep {
    pub id: String,
    pub completion_id: String,
    pub exercise_step_id: String,
    pub completed: bool,
    pub result: Option<String>,
    pub responses: Option<StepResponses>,
    /// Ordered by `createdAt`, then insertion order
    pub messages: Vec<ConversationMessage>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.completed * 100) / self.total) as u8
    }
}

/// Storage operations the core depends on.
#[async_trait]
pub trait Repository: Send + Sync {
    // Users
    async fn create_user(&self, email: &str, is_admin: bool, data: &UserData) -> Result<User>;
    async fn get_user(&self, id: &str) -> Result<Option<User>>;
    async fn list_users(&self) -> Result<Vec<User>>;

    // Exercises
    /// Insert or replace an exercise and its steps. Steps missing from
    /// `exercise.steps` are deleted (cascading to their progress rows).
    async fn save_exercise(&self, exercise: &Exercise) -> Result<()>;
    async fn get_exercise(&self, id: &str) -> Result<Option<Exercise>>;
    async fn list_exercises(&self) -> Result<Vec<Exercise>>;
    async fn get_exercise_step(&self, id: &str) -> Result<Option<ExerciseStep>>;
    async fn delete_exercise(&self, id: &str) -> Result<bool>;

    // Completions
    async fn find_completion(&self, user_id: &str, exercise_id: &str) -> Result<Option<Completion>>;
    async fn get_completion(&self, id: &str) -> Result<Option<Completion>>;
    async fn list_completions(&self, user_id: &str) -> Result<Vec<Completion>>;
    /// Fails with `Conflict` when the (user, exercise) pair already exists.
    async fn create_completion(&self, user_id: &str, exercise_id: &str) -> Result<Completion>;
    /// Fails with `Conflict` when the step row already exists.
    async fn create_completion_step(&self, completion_id: &str, exercise_step_id: &str) -> Result<CompletionStep>;
    async fn get_completion_step(&self, id: &str) -> Result<Option<CompletionStep>>;
    async fn save_step_result(&self, id: &str, result: &str, responses: Option<&StepResponses>) -> Result<()>;
    /// Sets `completed`; there is no way to clear it.
    async fn mark_step_completed(&self, id: &str) -> Result<()>;
    /// Conditional write: only succeeds while `completion_message IS NULL`.
    /// Returns whether this call stored the message.
    async fn set_completion_message_if_unset(&self, completion_id: &str, message: &str) -> Result<bool>;

    // Conversation transcript
    async fn append_message(&self, completion_step_id: &str, role: MessageRole, parts: &[MessagePart]) -> Result<ConversationMessage>;
    async fn list_messages(&self, completion_step_id: &str) -> Result<Vec<ConversationMessage>>;

    // SystemSettings
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;
    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}
