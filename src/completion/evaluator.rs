//! Step completion decisions and completion-message synthesis.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::content::{Exercise, ExerciseStep};
use crate::error::{NobleError, Result};
use crate::llm::TextCompletion;
use crate::store::{Completion, Repository, EXERCISE_COMPLETED_PROMPT_TEMPLATE};
use crate::template;

/// What a step needs before it counts as completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirement {
    pub needs_result: bool,
}

impl Requirement {
    pub fn for_step(step: &ExerciseStep) -> Self {
        Self {
            needs_result: step.result_prompt().is_some(),
        }
    }
}

/// What the user has produced for a step so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObservedResult<'a> {
    pub result: Option<&'a str>,
    pub has_conversation: bool,
}

/// A step is satisfied only by a non-blank result for a step that asks for
/// one. Conversation alone never completes a step.
pub fn is_satisfied(requirement: Requirement, observed: ObservedResult<'_>) -> bool {
    requirement.needs_result && observed.result.is_some_and(|r| !r.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// Requirement not met; nothing was written
    Unchanged,
    /// The step is completed; the exercise is not (or was already announced)
    StepCompleted,
    /// This evaluation completed the exercise and stored its message
    ExerciseCompleted { message: String },
}

pub struct StepEvaluator {
    repo: Arc<dyn Repository>,
    llm: Arc<dyn TextCompletion>,
    fallback_message: String,
}

impl StepEvaluator {
    pub fn new(
        repo: Arc<dyn Repository>,
        llm: Arc<dyn TextCompletion>,
        fallback_message: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            llm,
            fallback_message: fallback_message.into(),
        }
    }

    /// Mark the step completed when its requirement is met, then check
    /// whether that completed the whole exercise.
    pub async fn evaluate(
        &self,
        completion_step_id: &str,
        requirement: Requirement,
        observed: ObservedResult<'_>,
    ) -> Result<Evaluation> {
        if !is_satisfied(requirement, observed) {
            return Ok(Evaluation::Unchanged);
        }
        self.complete_step(completion_step_id).await
    }

    /// Explicit completion for steps that do not ask for a result.
    pub async fn mark_complete(
        &self,
        completion_step_id: &str,
        requirement: Requirement,
    ) -> Result<Evaluation> {
        if requirement.needs_result {
            return Err(NobleError::InvalidContent(
                "this step is completed by saving a result".to_string(),
            ));
        }
        self.complete_step(completion_step_id).await
    }

    async fn complete_step(&self, completion_step_id: &str) -> Result<Evaluation> {
        self.repo.mark_step_completed(completion_step_id).await?;
        let step = self
            .repo
            .get_completion_step(completion_step_id)
            .await?
            .ok_or_else(|| NobleError::not_found("Completion step", completion_step_id))?;
        self.check_exercise_completion(&step.completion_id).await
    }

    /// Synthesise and store the completion message once every step of the
    /// exercise is completed. Exercise steps without a completion row count
    /// as incomplete. The store's conditional write decides the single
    /// winner between concurrent evaluations.
    pub async fn check_exercise_completion(&self, completion_id: &str) -> Result<Evaluation> {
        let completion = self
            .repo
            .get_completion(completion_id)
            .await?
            .ok_or_else(|| NobleError::not_found("Completion", completion_id))?;
        if completion.completion_message.is_some() {
            return Ok(Evaluation::StepCompleted);
        }
        let exercise = self
            .repo
            .get_exercise(&completion.exercise_id)
            .await?
            .ok_or_else(|| NobleError::not_found("Exercise", &completion.exercise_id))?;
        if !exercise_completed(&exercise, &completion) {
            return Ok(Evaluation::StepCompleted);
        }

        let message = self.synthesize(&exercise, &completion).await?;
        if self
            .repo
            .set_completion_message_if_unset(completion_id, &message)
            .await?
        {
            info!(completion_id, "Exercise completed, completion message stored");
            Ok(Evaluation::ExerciseCompleted { message })
        } else {
            warn!(completion_id, "Completion message already set by a concurrent evaluation");
            Ok(Evaluation::StepCompleted)
        }
    }

    async fn synthesize(&self, exercise: &Exercise, completion: &Completion) -> Result<String> {
        let template = self
            .repo
            .get_setting(EXERCISE_COMPLETED_PROMPT_TEMPLATE)
            .await?
            .filter(|t| !t.trim().is_empty());
        let Some(template) = template else {
            return Ok(self.fallback_message.clone());
        };

        let context = synthesis_context(exercise, completion);

        let prompt = match template::render_prompt(&template, &context) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(completion_id = %completion.id, error = %e, "Completion template failed to render, using fallback");
                return Ok(self.fallback_message.clone());
            }
        };

        match self.llm.complete(&prompt).await {
            Ok(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            Ok(_) => {
                warn!(completion_id = %completion.id, "Model returned an empty completion message, using fallback");
                Ok(self.fallback_message.clone())
            }
            Err(e) => {
                error!(completion_id = %completion.id, error = %e, "Completion message synthesis failed, using fallback");
                Ok(self.fallback_message.clone())
            }
        }
    }
}

/// True when the exercise has steps and each one has a completed row.
pub fn exercise_completed(exercise: &Exercise, completion: &Completion) -> bool {
    !exercise.steps.is_empty()
        && exercise
            .steps
            .iter()
            .all(|es| completion.step(&es.id).is_some_and(|s| s.completed))
}

/// `{exerciseName, exerciseSteps: [{content?, result?}]}` over the completed
/// steps in step order. Entries with neither content nor result are dropped.
pub fn synthesis_context(exercise: &Exercise, completion: &Completion) -> Value {
    let steps: Vec<Value> = exercise
        .steps
        .iter()
        .filter_map(|exercise_step| {
            let progress = completion
                .step(&exercise_step.id)
                .filter(|s| s.completed)?;
            let content = step_text(exercise_step);
            let result = progress
                .result
                .as_deref()
                .map(str::trim)
                .unwrap_or_default();

            let mut entry = serde_json::Map::new();
            if !content.is_empty() {
                entry.insert("content".into(), json!(content));
            }
            if !result.is_empty() {
                entry.insert("result".into(), json!(result));
            }
            (!entry.is_empty()).then_some(Value::Object(entry))
        })
        .collect();

    json!({
        "exerciseName": exercise.name,
        "exerciseSteps": steps,
    })
}

/// Plain text of a step's static blocks.
pub fn step_text(step: &ExerciseStep) -> String {
    step.content
        .blocks
        .iter()
        .filter_map(|b| b.content.as_deref())
        .map(template::html::to_text)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
