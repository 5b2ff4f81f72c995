//! CompletionModel for the Anthropic Messages API.

use crate::client::Client;
use crate::error::AnthropicError;
use crate::streaming::StreamingResponse;
use crate::types::{CompletionRequest, CompletionResponse, Message, DEFAULT_MAX_TOKENS};

/// Completion model bound to a client and a model identifier.
#[derive(Clone, Debug)]
pub struct CompletionModel {
    client: Client,
    model: String,
    max_tokens: u32,
    temperature: Option<f32>,
}

impl CompletionModel {
    /// Create a new completion model.
    pub fn new(client: Client, model: String) -> Self {
        Self {
            client,
            model,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
        }
    }

    /// Get the model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Build a request for this model.
    ///
    /// An empty system prompt is omitted rather than sent as `""`.
    pub fn build_request(
        &self,
        system: Option<String>,
        messages: Vec<Message>,
        stream: bool,
    ) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            system: system.filter(|s| !s.trim().is_empty()),
            temperature: self.temperature,
            stream: if stream { Some(true) } else { None },
        }
    }

    /// Send a request and wait for the full response.
    pub async fn completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, AnthropicError> {
        let response = self.send(&request).await?;

        let text = response.text().await?;
        tracing::debug!("completion: received {} bytes", text.len());
        let parsed: CompletionResponse = serde_json::from_str(&text)?;
        Ok(parsed)
    }

    /// Send a request and return the SSE stream of text deltas.
    pub async fn stream(
        &self,
        mut request: CompletionRequest,
    ) -> Result<StreamingResponse, AnthropicError> {
        request.stream = Some(true);
        let response = self.send(&request).await?;
        Ok(StreamingResponse::new(response))
    }

    async fn send(&self, request: &CompletionRequest) -> Result<reqwest::Response, AnthropicError> {
        let url = self.client.messages_url();
        let headers = self.client.build_headers()?;

        tracing::debug!(
            "Anthropic request: model={} messages={} stream={:?}",
            request.model,
            request.messages.len(),
            request.stream
        );

        let response = self
            .client
            .http_client()
            .post(&url)
            .headers(headers)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {}>", e));
            tracing::warn!("Anthropic API returned {}: {}", status, message);
            return Err(AnthropicError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::StreamChunk;
    use futures::StreamExt;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn model_for(server: &MockServer) -> CompletionModel {
        Client::with_base_url("test-key", server.uri())
            .unwrap()
            .completion_model("claude-test")
            .with_max_tokens(256)
    }

    #[test]
    fn build_request_drops_blank_system_prompt() {
        let model = Client::new("k").unwrap().completion_model("claude-test");
        let request = model.build_request(Some("  ".into()), vec![Message::user("hi")], false);
        assert!(request.system.is_none());
        assert!(request.stream.is_none());

        let request = model.build_request(Some("Be kind.".into()), vec![], true);
        assert_eq!(request.system.as_deref(), Some("Be kind."));
        assert_eq!(request.stream, Some(true));
    }

    #[tokio::test]
    async fn completion_sends_headers_and_parses_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", "2023-06-01"))
            .and(body_partial_json(serde_json::json!({
                "model": "claude-test",
                "max_tokens": 256
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "content": [{"type": "text", "text": "Well done."}],
                "model": "claude-test",
                "stop_reason": "end_turn",
                "stop_sequence": null,
                "usage": {"input_tokens": 5, "output_tokens": 2}
            })))
            .mount(&server)
            .await;

        let model = model_for(&server);
        let request = model.build_request(None, vec![Message::user("Summarise")], false);
        let response = model.completion(request).await.unwrap();
        assert_eq!(response.text(), "Well done.");
    }

    #[tokio::test]
    async fn non_success_status_becomes_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let model = model_for(&server);
        let request = model.build_request(None, vec![Message::user("Hi")], false);
        match model.completion(request).await {
            Err(AnthropicError::ApiError { status, message }) => {
                assert_eq!(status, 529);
                assert_eq!(message, "overloaded");
            }
            other => panic!("expected ApiError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stream_yields_deltas_from_sse_body() {
        let body = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Breathe\"}}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":1}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let model = model_for(&server);
        let request = model.build_request(None, vec![Message::user("Hi")], false);
        let chunks: Vec<_> = model.stream(request).await.unwrap().collect().await;

        assert_eq!(chunks.len(), 2);
        assert!(matches!(&chunks[0], Ok(StreamChunk::TextDelta { text, .. }) if text == "Breathe"));
        assert!(matches!(&chunks[1], Ok(StreamChunk::Done { .. })));
    }
}
