//! Request/Response types for the HTTP server.
//!
//! Field names are camelCase on the wire.

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::content::{ExerciseMetadata, Exercise, MessagePart, MessageRole, StepResponses};
use crate::error::NobleError;
use crate::store::{Completion, Progress};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    /// Server status (always "ok" when healthy)
    pub status: String,
    /// Server version from Cargo.toml
    pub version: String,
}

impl HealthResponse {
    /// Create a healthy response with the current package version
    pub fn healthy() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code for programmatic handling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    /// Create an error response with just a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: None,
        }
    }

    /// Create an error response with a message and code
    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: Some(code.into()),
        }
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Message shown for server-side failures.
pub const GENERIC_ERROR: &str = "Something went wrong";

pub fn status_for(err: &NobleError) -> StatusCode {
    match err {
        NobleError::NotFound(_) => StatusCode::NOT_FOUND,
        NobleError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        NobleError::Template(_) | NobleError::InvalidContent(_) => StatusCode::BAD_REQUEST,
        NobleError::Conflict(_) => StatusCode::CONFLICT,
        NobleError::UpstreamModel(_) | NobleError::Storage(_) | NobleError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Map an error to its response, replacing server-side detail with
/// `fallback`. Server-side errors are logged here.
pub fn error_response(err: NobleError, fallback: &str) -> ApiError {
    let status = status_for(&err);
    let message = if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
        fallback.to_string()
    } else {
        err.to_string()
    };
    (status, Json(ErrorResponse::with_code(message, err.code())))
}

impl From<NobleError> for (StatusCode, Json<ErrorResponse>) {
    fn from(err: NobleError) -> Self {
        error_response(err, GENERIC_ERROR)
    }
}

pub fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::with_code(message, "BAD_REQUEST")),
    )
}

/// A message as sent by the chat UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UiMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: MessageRole,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

/// `POST /api/chat`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// The new user turn
    #[serde(default)]
    pub message: Option<UiMessage>,
    /// Full history, used by stateless chat
    #[serde(default)]
    pub messages: Vec<UiMessage>,
    /// Supplemental prompt of the step being chatted on
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub completion_step_id: Option<String>,
}

impl ChatRequest {
    /// The turn to store: `message`, or the last user entry of `messages`.
    pub fn user_turn(&self) -> Option<&UiMessage> {
        self.message
            .as_ref()
            .or_else(|| self.messages.iter().rev().find(|m| m.role == MessageRole::User))
    }
}

/// `POST /api/save-result`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResultRequest {
    pub completion_step_id: String,
    pub result: String,
}

/// `POST /api/save-responses`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResponsesRequest {
    pub completion_step_id: String,
    pub responses: StepResponses,
}

/// `POST /api/complete-step`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteStepRequest {
    pub completion_step_id: String,
}

/// Successful mutation with the refreshed completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<Completion>,
}

impl SuccessResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: message.into(),
            completion: None,
        }
    }

    pub fn with_completion(message: impl Into<String>, completion: Completion) -> Self {
        Self {
            success: message.into(),
            completion: Some(completion),
        }
    }
}

/// An exercise in the listing, with the caller's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseSummary {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buddhism_concept: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ExerciseMetadata>,
    pub step_count: usize,
    /// `None` until the exercise is first visited
    pub progress: Option<Progress>,
    pub completed: bool,
}

impl ExerciseSummary {
    pub fn new(exercise: &Exercise, completion: Option<&Completion>) -> Self {
        Self {
            id: exercise.id.clone(),
            name: exercise.name.clone(),
            week_number: exercise.week_number,
            buddhism_concept: exercise.buddhism_concept.clone(),
            metadata: exercise.metadata.clone(),
            step_count: exercise.steps.len(),
            progress: completion.map(Completion::progress),
            completed: completion.is_some_and(Completion::all_steps_completed),
        }
    }
}

/// `GET /api/exercises/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExerciseDetail {
    pub exercise: Exercise,
    pub completion: Completion,
}

/// Both admin-editable templates; unset ones are empty strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AdminSettings {
    pub system_prompt_template: String,
    pub exercise_completed_prompt_template: String,
}

/// `POST /api/admin/settings`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action")]
pub enum SettingsAction {
    #[serde(rename = "updateSystemPrompt")]
    UpdateSystemPrompt {
        #[serde(rename = "systemPromptTemplate")]
        template: String,
    },
    #[serde(rename = "updateExerciseCompletedPrompt")]
    UpdateExerciseCompletedPrompt {
        #[serde(rename = "exerciseCompletedPromptTemplate")]
        template: String,
    },
}

/// Which sample context a preview renders against.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PreviewKind {
    #[default]
    SystemPrompt,
    ExerciseCompleted,
}

/// `POST /api/admin/settings/preview`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewRequest {
    pub template: String,
    #[serde(default)]
    pub kind: PreviewKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreviewResponse {
    pub output: String,
}

/// A completion in the admin view, labelled with its exercise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCompletion {
    #[serde(flatten)]
    pub completion: Completion,
    pub exercise_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod health_response_tests {
        use super::*;

        #[test]
        fn healthy_includes_version() {
            let resp = HealthResponse::healthy();
            assert_eq!(resp.status, "ok");
            assert_eq!(resp.version, env!("CARGO_PKG_VERSION"));
        }

        #[test]
        fn serializes_to_json() {
            let json = serde_json::to_string(&HealthResponse::healthy()).unwrap();
            assert!(json.contains("\"status\":\"ok\""));
            assert!(json.contains("\"version\""));
        }
    }

    mod error_response_tests {
        use super::*;

        #[test]
        fn client_errors_keep_their_message() {
            let (status, Json(body)) = error_response(NobleError::not_found("Exercise", "x"), GENERIC_ERROR);
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body.error, "Exercise 'x' not found");
            assert_eq!(body.code.as_deref(), Some("NOT_FOUND"));
        }

        #[test]
        fn server_errors_use_the_fallback() {
            let (status, Json(body)) =
                error_response(NobleError::Storage("disk I/O error".into()), "Failed to save result");
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(body.error, "Failed to save result");
        }

        #[test]
        fn code_is_omitted_when_none() {
            let json = serde_json::to_string(&ErrorResponse::new("boom")).unwrap();
            assert_eq!(json, r#"{"error":"boom"}"#);
        }

        #[test]
        fn statuses_follow_the_taxonomy() {
            assert_eq!(status_for(&NobleError::Unauthorized("x".into())), StatusCode::UNAUTHORIZED);
            assert_eq!(status_for(&NobleError::InvalidContent("x".into())), StatusCode::BAD_REQUEST);
            assert_eq!(status_for(&NobleError::Conflict("x".into())), StatusCode::CONFLICT);
            assert_eq!(
                status_for(&NobleError::UpstreamModel("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR
            );
        }
    }

    mod request_tests {
        use super::*;

        #[test]
        fn chat_request_prefers_message() {
            let req: ChatRequest = serde_json::from_value(json!({
                "message": {"id": "m1", "role": "user", "parts": [{"type": "text", "text": "Hi"}]},
                "systemPrompt": "Be brief",
                "completionStepId": "cs-1"
            }))
            .unwrap();
            assert_eq!(req.user_turn().unwrap().id.as_deref(), Some("m1"));
            assert_eq!(req.system_prompt.as_deref(), Some("Be brief"));
            assert_eq!(req.completion_step_id.as_deref(), Some("cs-1"));
        }

        #[test]
        fn chat_request_falls_back_to_last_user_message() {
            let req: ChatRequest = serde_json::from_value(json!({
                "messages": [
                    {"role": "user", "parts": [{"type": "text", "text": "one"}]},
                    {"role": "assistant", "parts": [{"type": "text", "text": "two"}]},
                    {"role": "user", "parts": [{"type": "text", "text": "three"}]}
                ]
            }))
            .unwrap();
            assert_eq!(req.user_turn().unwrap().parts, vec![MessagePart::text("three")]);
        }

        #[test]
        fn settings_actions_deserialize() {
            let action: SettingsAction = serde_json::from_value(json!({
                "action": "updateSystemPrompt",
                "systemPromptTemplate": "Hi {{bio}}"
            }))
            .unwrap();
            assert_eq!(
                action,
                SettingsAction::UpdateSystemPrompt {
                    template: "Hi {{bio}}".into()
                }
            );

            let action: SettingsAction = serde_json::from_value(json!({
                "action": "updateExerciseCompletedPrompt",
                "exerciseCompletedPromptTemplate": "Done"
            }))
            .unwrap();
            assert!(matches!(action, SettingsAction::UpdateExerciseCompletedPrompt { .. }));

            assert!(serde_json::from_value::<SettingsAction>(json!({"action": "dropTables"})).is_err());
        }

        #[test]
        fn preview_kind_defaults_to_system_prompt() {
            let req: PreviewRequest = serde_json::from_value(json!({"template": "x"})).unwrap();
            assert_eq!(req.kind, PreviewKind::SystemPrompt);
        }
    }
}
