//! Chat turns and result saving for completion steps.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::prompt::compose_system_prompt;
use crate::completion::{CompletionTracker, Evaluation, ObservedResult, Requirement, StepEvaluator};
use crate::content::{parts_text, text_parts, ConversationMessage, MessagePart, MessageRole, StepResponses, User};
use crate::error::{NobleError, Result};
use crate::llm::{ChatMessage, TextCompletion};
use crate::store::{Completion, Repository, SYSTEM_PROMPT_TEMPLATE};

/// Buffered deltas between the model task and the HTTP stream.
const EVENT_BUFFER: usize = 64;

/// Incremental output of a chat turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    Delta(String),
    /// The turn ended cleanly and the assistant message, if any, is stored
    Finished,
    /// The model failed; the detail is logged, not sent
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Finished {
        assistant: Option<ConversationMessage>,
        evaluation: Option<Evaluation>,
    },
    Failed,
    /// The receiver went away before the model finished
    Aborted,
}

/// A running chat turn. Dropping `events` aborts the turn.
pub struct TurnStream {
    pub events: mpsc::Receiver<TurnEvent>,
    pub task: JoinHandle<TurnOutcome>,
}

/// State after a result was saved.
#[derive(Debug, Clone)]
pub struct SavedResult {
    pub completion: Completion,
    /// `None` when the evaluation failed; the failure is logged
    pub evaluation: Option<Evaluation>,
}

enum Pumped {
    Text(String),
    Failed,
    Aborted,
}

pub struct ConversationEngine {
    repo: Arc<dyn Repository>,
    llm: Arc<dyn TextCompletion>,
    tracker: CompletionTracker,
    evaluator: Arc<StepEvaluator>,
    persona: String,
}

impl ConversationEngine {
    pub fn new(
        repo: Arc<dyn Repository>,
        llm: Arc<dyn TextCompletion>,
        persona: impl Into<String>,
        completion_fallback: impl Into<String>,
    ) -> Self {
        let evaluator = StepEvaluator::new(repo.clone(), llm.clone(), completion_fallback);
        Self {
            tracker: CompletionTracker::new(repo.clone()),
            evaluator: Arc::new(evaluator),
            repo,
            llm,
            persona: persona.into(),
        }
    }

    pub fn tracker(&self) -> &CompletionTracker {
        &self.tracker
    }

    /// Run one chat turn on a completion step owned by `user`.
    ///
    /// The user message is stored before the model is called. The assistant
    /// reply is stored only when the model finishes cleanly with non-empty
    /// text, after which the step is evaluated in the same task. The event
    /// channel is closed before evaluation starts.
    pub async fn send_turn(
        &self,
        user: &User,
        completion_step_id: &str,
        parts: &[MessagePart],
        supplemental: Option<&str>,
    ) -> Result<TurnStream> {
        let owned = self.tracker.owned_step(&user.id, completion_step_id).await?;
        let parts = text_parts(parts);
        if parts_text(&parts).trim().is_empty() {
            return Err(NobleError::InvalidContent("message has no text".to_string()));
        }

        let history = self.repo.list_messages(completion_step_id).await?;
        let user_message = self
            .repo
            .append_message(completion_step_id, MessageRole::User, &parts)
            .await?;
        debug!(completion_step_id, history = history.len(), "Stored user message");

        let template = self.repo.get_setting(SYSTEM_PROMPT_TEMPLATE).await?;
        let system = compose_system_prompt(&self.persona, template.as_deref(), &user.data, supplemental);
        let messages: Vec<ChatMessage> = history
            .iter()
            .chain(std::iter::once(&user_message))
            .map(ChatMessage::from)
            .collect();

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let repo = self.repo.clone();
        let llm = self.llm.clone();
        let evaluator = self.evaluator.clone();
        let requirement = Requirement::for_step(&owned.exercise_step);
        let step_id = completion_step_id.to_string();

        let task = tokio::spawn(async move {
            let text = match pump(llm.as_ref(), &system, &messages, &tx).await {
                Pumped::Text(text) => text,
                Pumped::Failed => return TurnOutcome::Failed,
                Pumped::Aborted => {
                    info!(completion_step_id = %step_id, "Chat turn aborted by client");
                    return TurnOutcome::Aborted;
                }
            };

            let assistant = if text.trim().is_empty() {
                debug!(completion_step_id = %step_id, "Model finished with empty text, nothing stored");
                None
            } else {
                match repo
                    .append_message(&step_id, MessageRole::Assistant, &[MessagePart::text(text)])
                    .await
                {
                    Ok(message) => Some(message),
                    Err(e) => {
                        error!(completion_step_id = %step_id, error = %e, "Failed to store assistant message");
                        let _ = tx.send(TurnEvent::Failed).await;
                        return TurnOutcome::Failed;
                    }
                }
            };
            let _ = tx.send(TurnEvent::Finished).await;
            drop(tx);

            let evaluation = evaluate_after_turn(&repo, &evaluator, &step_id, requirement).await;
            TurnOutcome::Finished {
                assistant,
                evaluation,
            }
        });

        Ok(TurnStream { events: rx, task })
    }

    /// Chat without a completion step: nothing is stored or evaluated.
    pub fn stateless_turn(&self, supplemental: Option<&str>, messages: Vec<ChatMessage>) -> TurnStream {
        let system = compose_system_prompt(&self.persona, None, &Default::default(), supplemental);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let llm = self.llm.clone();

        let task = tokio::spawn(async move {
            match pump(llm.as_ref(), &system, &messages, &tx).await {
                Pumped::Text(_) => {
                    let _ = tx.send(TurnEvent::Finished).await;
                    TurnOutcome::Finished {
                        assistant: None,
                        evaluation: None,
                    }
                }
                Pumped::Failed => TurnOutcome::Failed,
                Pumped::Aborted => TurnOutcome::Aborted,
            }
        });

        TurnStream { events: rx, task }
    }

    /// Store a free-text result and evaluate the step.
    pub async fn save_result(&self, user_id: &str, completion_step_id: &str, result: &str) -> Result<SavedResult> {
        self.save(user_id, completion_step_id, result, None).await
    }

    /// Store structured answers, with their flattened text as the result.
    pub async fn save_responses(
        &self,
        user_id: &str,
        completion_step_id: &str,
        responses: &StepResponses,
    ) -> Result<SavedResult> {
        let result = responses.to_result_text();
        self.save(user_id, completion_step_id, &result, Some(responses)).await
    }

    /// Explicitly complete a step that has no result requirement.
    pub async fn complete_step(&self, user_id: &str, completion_step_id: &str) -> Result<SavedResult> {
        let owned = self.tracker.owned_step(user_id, completion_step_id).await?;
        let evaluation = self
            .evaluator
            .mark_complete(completion_step_id, Requirement::for_step(&owned.exercise_step))
            .await?;
        let completion = self.reload(&owned.completion.id).await?;
        Ok(SavedResult {
            completion,
            evaluation: Some(evaluation),
        })
    }

    async fn save(
        &self,
        user_id: &str,
        completion_step_id: &str,
        result: &str,
        responses: Option<&StepResponses>,
    ) -> Result<SavedResult> {
        let owned = self.tracker.owned_step(user_id, completion_step_id).await?;
        self.repo
            .save_step_result(completion_step_id, result, responses)
            .await?;
        debug!(completion_step_id, "Saved step result");

        let observed = ObservedResult {
            result: Some(result),
            has_conversation: !owned.step.messages.is_empty(),
        };
        let evaluation = match self
            .evaluator
            .evaluate(completion_step_id, Requirement::for_step(&owned.exercise_step), observed)
            .await
        {
            Ok(evaluation) => Some(evaluation),
            Err(e) => {
                error!(completion_step_id, error = %e, "Step evaluation failed after saving result");
                None
            }
        };

        let completion = self.reload(&owned.completion.id).await?;
        Ok(SavedResult {
            completion,
            evaluation,
        })
    }

    async fn reload(&self, completion_id: &str) -> Result<Completion> {
        self.repo
            .get_completion(completion_id)
            .await?
            .ok_or_else(|| NobleError::not_found("Completion", completion_id))
    }
}

/// Forward model deltas to `tx` until the stream ends, fails, or the
/// receiver is dropped.
async fn pump(
    llm: &dyn TextCompletion,
    system: &str,
    messages: &[ChatMessage],
    tx: &mpsc::Sender<TurnEvent>,
) -> Pumped {
    let mut stream = tokio::select! {
        started = llm.stream_chat(system, messages) => match started {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "Failed to start model stream");
                let _ = tx.send(TurnEvent::Failed).await;
                return Pumped::Failed;
            }
        },
        _ = tx.closed() => return Pumped::Aborted,
    };

    let mut text = String::new();
    loop {
        let item = tokio::select! {
            item = stream.next() => item,
            _ = tx.closed() => return Pumped::Aborted,
        };
        match item {
            Some(Ok(delta)) => {
                if delta.is_empty() {
                    continue;
                }
                text.push_str(&delta);
                if tx.send(TurnEvent::Delta(delta)).await.is_err() {
                    return Pumped::Aborted;
                }
            }
            Some(Err(e)) => {
                error!(error = %e, "Model stream failed");
                let _ = tx.send(TurnEvent::Failed).await;
                return Pumped::Failed;
            }
            None => return Pumped::Text(text),
        }
    }
}

async fn evaluate_after_turn(
    repo: &Arc<dyn Repository>,
    evaluator: &StepEvaluator,
    completion_step_id: &str,
    requirement: Requirement,
) -> Option<Evaluation> {
    let step = match repo.get_completion_step(completion_step_id).await {
        Ok(Some(step)) => step,
        Ok(None) => {
            error!(completion_step_id, "Completion step disappeared before evaluation");
            return None;
        }
        Err(e) => {
            error!(completion_step_id, error = %e, "Failed to load step for evaluation");
            return None;
        }
    };
    let observed = ObservedResult {
        result: step.result.as_deref(),
        has_conversation: true,
    };
    match evaluator.evaluate(completion_step_id, requirement, observed).await {
        Ok(evaluation) => Some(evaluation),
        Err(e) => {
            error!(completion_step_id, error = %e, "Step evaluation failed after chat turn");
            None
        }
    }
}
