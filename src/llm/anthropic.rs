//! Anthropic Messages API backend.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use anthropic_messages::{Client, CompletionModel, Message, StreamChunk};

use super::{ChatMessage, TextCompletion, TextStream};
use crate::content::MessageRole;
use crate::error::{NobleError, Result};
use crate::settings::AiSettings;

pub struct AnthropicLlm {
    model: CompletionModel,
    timeout: Duration,
}

impl AnthropicLlm {
    pub fn new(model: CompletionModel, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    pub fn from_settings(settings: &AiSettings) -> anyhow::Result<Self> {
        let api_key = settings.api_key.clone().unwrap_or_default();
        let client = match settings.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(base_url) => Client::with_base_url(api_key, base_url)?,
            None => Client::new(api_key)?,
        };
        let model = client
            .completion_model(&settings.model)
            .with_max_tokens(settings.max_tokens)
            .with_temperature(settings.temperature);
        Ok(Self::new(
            model,
            Duration::from_secs(settings.request_timeout_secs.max(1)),
        ))
    }

    fn timed_out(&self) -> NobleError {
        NobleError::UpstreamModel(format!(
            "no response from the model within {}s",
            self.timeout.as_secs()
        ))
    }
}

/// History in Messages API form. System turns are folded into the system
/// prompt by the caller; empty turns are rejected by the API.
fn to_messages(messages: &[ChatMessage]) -> Vec<Message> {
    messages
        .iter()
        .filter(|m| !m.text.trim().is_empty())
        .filter_map(|m| match m.role {
            MessageRole::User => Some(Message::user(m.text.clone())),
            MessageRole::Assistant => Some(Message::assistant(m.text.clone())),
            MessageRole::System => None,
        })
        .collect()
}

#[async_trait]
impl TextCompletion for AnthropicLlm {
    async fn stream_chat(&self, system: &str, messages: &[ChatMessage]) -> Result<TextStream> {
        let request = self
            .model
            .build_request(Some(system.to_string()), to_messages(messages), true);

        let response = tokio::time::timeout(self.timeout, self.model.stream(request))
            .await
            .map_err(|_| self.timed_out())??;

        let timeout = self.timeout;
        let deltas = futures::stream::unfold(Some(response), move |state| async move {
            let mut response = state?;
            loop {
                match tokio::time::timeout(timeout, response.next()).await {
                    Err(_) => {
                        let err = NobleError::UpstreamModel(format!(
                            "stream stalled for {}s",
                            timeout.as_secs()
                        ));
                        return Some((Err(err), None));
                    }
                    Ok(None) => return None,
                    Ok(Some(Err(e))) => return Some((Err(NobleError::from(e)), None)),
                    Ok(Some(Ok(StreamChunk::TextDelta { text, .. }))) => {
                        return Some((Ok(text), Some(response)))
                    }
                    Ok(Some(Ok(StreamChunk::Done { stop_reason, .. }))) => {
                        tracing::debug!(?stop_reason, "Model stream finished");
                    }
                }
            }
        });

        Ok(Box::pin(deltas))
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = self
            .model
            .build_request(None, vec![Message::user(prompt)], false);
        let response = tokio::time::timeout(self.timeout, self.model.completion(request))
            .await
            .map_err(|_| self.timed_out())??;
        Ok(response.text().trim().to_string())
    }

    fn description(&self) -> String {
        format!("Anthropic ({})", self.model.model())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn llm(server: &MockServer) -> AnthropicLlm {
        let settings = AiSettings {
            api_key: Some("sk-test".into()),
            base_url: Some(server.uri()),
            request_timeout_secs: 5,
            ..AiSettings::default()
        };
        AnthropicLlm::from_settings(&settings).unwrap()
    }

    #[test]
    fn history_skips_system_and_empty_turns() {
        let messages = to_messages(&[
            ChatMessage::user("Hi"),
            ChatMessage {
                role: MessageRole::System,
                text: "ignored".into(),
            },
            ChatMessage::assistant("  "),
            ChatMessage::assistant("Hello"),
        ]);
        assert_eq!(messages, vec![Message::user("Hi"), Message::assistant("Hello")]);
    }

    #[tokio::test]
    async fn streams_text_deltas() {
        let server = MockServer::start().await;
        let body = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"type\":\"message\",\"role\":\"assistant\",\"content\":[],\"model\":\"claude-sonnet-4-5\",\"stop_reason\":null,\"stop_sequence\":null,\"usage\":{\"input_tokens\":5,\"output_tokens\":0}}}\n\n",
            "event: content_block_start\n",
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" there\"}}\n\n",
            "event: content_block_stop\n",
            "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\",\"stop_sequence\":null},\"usage\":{\"output_tokens\":2}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(serde_json::json!({
                "stream": true,
                "system": "Be kind"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let stream = llm(&server)
            .stream_chat("Be kind", &[ChatMessage::user("Hi")])
            .await
            .unwrap();
        let deltas: Vec<String> = stream.map(|d| d.unwrap()).collect().await;
        assert_eq!(deltas.concat(), "Hello there");
    }

    #[tokio::test]
    async fn api_errors_map_to_upstream_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = llm(&server).complete("Summarise").await.unwrap_err();
        assert!(matches!(err, NobleError::UpstreamModel(_)));
    }

    #[tokio::test]
    async fn complete_returns_trimmed_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "content": [{"type": "text", "text": "  Well done.\n"}],
                "model": "claude-sonnet-4-5",
                "stop_reason": "end_turn",
                "stop_sequence": null,
                "usage": {"input_tokens": 3, "output_tokens": 2}
            })))
            .mount(&server)
            .await;

        assert_eq!(llm(&server).complete("Summarise").await.unwrap(), "Well done.");
    }
}
