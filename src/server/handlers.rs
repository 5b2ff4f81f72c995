//! HTTP request handlers.
//!
//! Every `/api` handler resolves the caller from the session cookie first.
//! Admin handlers additionally require an admin user and never mutate
//! completions.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::stream::ui_message_response;
use super::types::*;
use crate::content::{parts_text, MessageRole, User};
use crate::conversation::ConversationEngine;
use crate::error::NobleError;
use crate::llm::{ChatMessage, TextCompletion};
use crate::settings::NobleSettings;
use crate::store::{Repository, EXERCISE_COMPLETED_PROMPT_TEMPLATE, SYSTEM_PROMPT_TEMPLATE};
use crate::template::{self, Template};

const SAVE_RESULT_FAILED: &str = "Failed to save result";

/// Application state shared across all handlers
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub engine: ConversationEngine,
    /// Name of the cookie holding the session's user id
    pub session_cookie: String,
    /// Shutdown token for graceful server shutdown
    pub shutdown_token: CancellationToken,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn Repository>,
        llm: Arc<dyn TextCompletion>,
        settings: &NobleSettings,
    ) -> (Arc<Self>, CancellationToken) {
        let shutdown_token = CancellationToken::new();
        let engine = ConversationEngine::new(
            repo.clone(),
            llm,
            settings.prompts.persona.clone(),
            settings.prompts.completion_fallback.clone(),
        );
        let state = Arc::new(Self {
            repo,
            engine,
            session_cookie: settings.server.session_cookie.clone(),
            shutdown_token: shutdown_token.clone(),
        });
        (state, shutdown_token)
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check endpoint.
///
/// ```json
/// { "status": "ok", "version": "0.1.0" }
/// ```
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

// =============================================================================
// Exercises
// =============================================================================

/// List exercises with the caller's progress.
pub async fn list_exercises(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Json<Vec<ExerciseSummary>>, ApiError> {
    let user = state.current_user(&jar).await?;
    let exercises = state.repo.list_exercises().await?;
    let completions: HashMap<String, _> = state
        .repo
        .list_completions(&user.id)
        .await?
        .into_iter()
        .map(|c| (c.exercise_id.clone(), c))
        .collect();

    Ok(Json(
        exercises
            .iter()
            .map(|e| ExerciseSummary::new(e, completions.get(&e.id)))
            .collect(),
    ))
}

/// Visit an exercise. The first visit creates the caller's completion; later
/// visits backfill steps added since.
///
/// # Response
///
/// - `200 OK`: `{ exercise, completion }`
/// - `404 Not Found`: Exercise does not exist
pub async fn get_exercise(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(exercise_id): Path<String>,
) -> Result<Json<ExerciseDetail>, ApiError> {
    let user = state.current_user(&jar).await?;
    let exercise = state
        .repo
        .get_exercise(&exercise_id)
        .await?
        .ok_or_else(|| NobleError::not_found("Exercise", &exercise_id))?;
    let completion = state
        .engine
        .tracker()
        .ensure_completion(&user.id, &exercise.id, &exercise.steps)
        .await?;

    Ok(Json(ExerciseDetail {
        exercise,
        completion,
    }))
}

// =============================================================================
// Chat (SSE Streaming)
// =============================================================================

/// Run a chat turn and stream it as a UI message stream.
///
/// With `completionStepId` the turn is stored on that step and the step is
/// evaluated after the reply. Without it the chat is stateless.
///
/// # Response
///
/// - `200 OK`: SSE stream
/// - `400 Bad Request`: No user message
/// - `401 Unauthorized`: No session, or the step belongs to another user
/// - `404 Not Found`: Completion step does not exist
pub async fn chat(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let user = state.current_user(&jar).await?;
    let supplemental = req.system_prompt.as_deref();

    let turn = match req.completion_step_id.as_deref() {
        Some(step_id) => {
            let message = req
                .user_turn()
                .ok_or_else(|| bad_request("A user message is required"))?;
            tracing::debug!(user_id = %user.id, completion_step_id = step_id, "Chat turn");
            state
                .engine
                .send_turn(&user, step_id, &message.parts, supplemental)
                .await?
        }
        None => {
            let history = stateless_history(&req);
            if history.is_empty() {
                return Err(bad_request("A user message is required"));
            }
            state.engine.stateless_turn(supplemental, history)
        }
    };

    Ok(ui_message_response(turn))
}

fn stateless_history(req: &ChatRequest) -> Vec<ChatMessage> {
    let messages = if req.messages.is_empty() {
        req.message.iter().cloned().collect()
    } else {
        req.messages.clone()
    };
    messages
        .into_iter()
        .filter(|m| m.role != MessageRole::System)
        .map(|m| ChatMessage {
            role: m.role,
            text: parts_text(&m.parts),
        })
        .filter(|m| !m.text.trim().is_empty())
        .collect()
}

// =============================================================================
// Results
// =============================================================================

/// Save a step's free-text result, then evaluate the step.
///
/// # Response
///
/// - `200 OK`: `{ success, completion }`
/// - `401`/`404`: Ownership or lookup failures
/// - `500`: `{ error: "Failed to save result" }`
pub async fn save_result(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<SaveResultRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let user = save_user(&state, &jar).await?;
    let saved = state
        .engine
        .save_result(&user.id, &req.completion_step_id, &req.result)
        .await
        .map_err(|e| error_response(e, SAVE_RESULT_FAILED))?;
    Ok(Json(SuccessResponse::with_completion(
        "Result saved successfully!",
        saved.completion,
    )))
}

/// Save structured answers for a step; their text form becomes the result.
pub async fn save_responses(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<SaveResponsesRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let user = save_user(&state, &jar).await?;
    let saved = state
        .engine
        .save_responses(&user.id, &req.completion_step_id, &req.responses)
        .await
        .map_err(|e| error_response(e, SAVE_RESULT_FAILED))?;
    Ok(Json(SuccessResponse::with_completion(
        "Responses saved successfully!",
        saved.completion,
    )))
}

/// Mark a step without a result requirement as completed.
///
/// # Response
///
/// - `200 OK`: `{ success, completion }`
/// - `400 Bad Request`: The step is completed by saving a result
pub async fn complete_step(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<CompleteStepRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let user = state.current_user(&jar).await?;
    let saved = state
        .engine
        .complete_step(&user.id, &req.completion_step_id)
        .await?;
    Ok(Json(SuccessResponse::with_completion(
        "Step completed!",
        saved.completion,
    )))
}

async fn save_user(state: &AppState, jar: &CookieJar) -> Result<User, ApiError> {
    state
        .current_user(jar)
        .await
        .map_err(|e| error_response(e, SAVE_RESULT_FAILED))
}

// =============================================================================
// Admin: Settings
// =============================================================================

/// Both admin-editable templates, verbatim.
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Json<AdminSettings>, ApiError> {
    state.current_admin(&jar).await?;
    let system_prompt_template = state.repo.get_setting(SYSTEM_PROMPT_TEMPLATE).await?;
    let exercise_completed_prompt_template = state
        .repo
        .get_setting(EXERCISE_COMPLETED_PROMPT_TEMPLATE)
        .await?;

    Ok(Json(AdminSettings {
        system_prompt_template: system_prompt_template.unwrap_or_default(),
        exercise_completed_prompt_template: exercise_completed_prompt_template.unwrap_or_default(),
    }))
}

/// Update one template. Templates must be non-empty and compile; they are
/// stored verbatim.
///
/// # Request Body
///
/// ```json
/// { "action": "updateSystemPrompt", "systemPromptTemplate": "..." }
/// { "action": "updateExerciseCompletedPrompt", "exerciseCompletedPromptTemplate": "..." }
/// ```
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<Value>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let admin = state.current_admin(&jar).await?;
    let action: SettingsAction =
        serde_json::from_value(body).map_err(|_| bad_request("Invalid action"))?;

    let (key, template, label) = match &action {
        SettingsAction::UpdateSystemPrompt { template } => {
            (SYSTEM_PROMPT_TEMPLATE, template, "System prompt")
        }
        SettingsAction::UpdateExerciseCompletedPrompt { template } => (
            EXERCISE_COMPLETED_PROMPT_TEMPLATE,
            template,
            "Exercise completed prompt",
        ),
    };

    if template.trim().is_empty() {
        return Err(bad_request(format!("{} template cannot be empty", label)));
    }
    if let Err(e) = Template::parse(template) {
        return Err(bad_request(format!("Invalid template: {}", e.message())));
    }

    state.repo.set_setting(key, template).await?;
    tracing::info!(key, admin_id = %admin.id, "Updated prompt template");
    Ok(Json(SuccessResponse::new(format!(
        "{} updated successfully!",
        label
    ))))
}

/// Render a template against sample data. Template errors are returned as
/// the output so the editor can show them inline.
pub async fn preview_settings(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<PreviewRequest>,
) -> Result<Json<PreviewResponse>, ApiError> {
    state.current_admin(&jar).await?;
    let output = match template::render_prompt(&req.template, &sample_context(req.kind)) {
        Ok(output) => output,
        Err(e) => format!("Error: {}", e.message()),
    };
    Ok(Json(PreviewResponse { output }))
}

pub fn sample_context(kind: PreviewKind) -> Value {
    match kind {
        PreviewKind::SystemPrompt => json!({
            "bio": "I am a software developer passionate about AI and machine learning.",
            "urls": "https://github.com/johndoe, https://linkedin.com/in/johndoe",
        }),
        PreviewKind::ExerciseCompleted => json!({
            "exerciseName": "Discovering your core values",
            "exerciseSteps": [
                {
                    "content": "Think of a moment when you felt most alive.",
                    "result": "Hiking with my brother and talking about our childhood.",
                },
                {
                    "content": "Which values did that moment express?",
                    "result": "Connection, adventure and honesty.",
                },
            ],
        }),
    }
}

// =============================================================================
// Admin: Users
// =============================================================================

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Json<Vec<User>>, ApiError> {
    state.current_admin(&jar).await?;
    Ok(Json(state.repo.list_users().await?))
}

/// A user's completions with steps and messages, labelled by exercise.
pub async fn user_completions(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<UserCompletion>>, ApiError> {
    state.current_admin(&jar).await?;
    if state.repo.get_user(&user_id).await?.is_none() {
        return Err(NobleError::not_found("User", &user_id).into());
    }

    let names: HashMap<String, String> = state
        .repo
        .list_exercises()
        .await?
        .into_iter()
        .map(|e| (e.id, e.name))
        .collect();
    let completions = state
        .repo
        .list_completions(&user_id)
        .await?
        .into_iter()
        .map(|completion| UserCompletion {
            exercise_name: names.get(&completion.exercise_id).cloned(),
            completion,
        })
        .collect();

    Ok(Json(completions))
}

/// Fallback for unknown routes.
pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::with_code("Not found", "NOT_FOUND")),
    )
}
