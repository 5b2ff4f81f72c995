//! Streaming response handling for the Messages API.

use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::AnthropicError;
use crate::types::{ContentDelta, StreamEvent, Usage};

type ByteStream = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>;

/// A streaming response from the Messages API.
///
/// Yields [`StreamChunk`]s until the API signals the end of the message. A
/// byte stream that ends before that signal yields a final
/// [`AnthropicError::StreamError`] so callers can tell a truncated answer from
/// a finished one.
pub struct StreamingResponse {
    /// The underlying byte stream
    inner: ByteStream,
    /// Bytes not yet decoded (split UTF-8 sequences)
    pending: Vec<u8>,
    /// Buffer for incomplete SSE data
    buffer: String,
    /// Accumulated text content
    accumulated_text: String,
    /// Whether the API signalled the end of the message
    finished: bool,
    /// Whether the stream has yielded its last item
    done: bool,
}

/// A chunk from the streaming response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Text delta
    TextDelta {
        text: String,
        /// Accumulated text so far, including this delta
        accumulated: String,
    },
    /// Stream completed
    Done {
        /// The reason the stream stopped
        stop_reason: Option<String>,
        usage: Option<Usage>,
    },
}

impl StreamingResponse {
    /// Create a new streaming response from a reqwest response.
    pub fn new(response: reqwest::Response) -> Self {
        tracing::debug!(
            "StreamingResponse::new - content-type: {:?}",
            response.headers().get("content-type")
        );
        Self::from_byte_stream(response.bytes_stream())
    }

    /// Create a streaming response from any byte stream.
    pub fn from_byte_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
            pending: Vec::new(),
            buffer: String::new(),
            accumulated_text: String::new(),
            finished: false,
            done: false,
        }
    }

    /// Get the accumulated text so far.
    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    /// Parse one SSE event block into a stream event.
    ///
    /// SSE format is:
    /// ```text
    /// event: content_block_delta
    /// data: {"type":"content_block_delta",...}
    /// ```
    ///
    /// Only `data: ` at the START of a line is matched, so streamed text that
    /// contains "data: " is never mistaken for a field.
    fn parse_sse_line(line: &str) -> Option<Result<StreamEvent, AnthropicError>> {
        let line = line.trim();

        if line.is_empty() || line.starts_with(':') {
            return None;
        }

        let mut data_content: Option<&str> = None;
        for subline in line.split('\n') {
            let subline = subline.trim();
            if let Some(content) = subline.strip_prefix("data:") {
                data_content = Some(content.trim_start());
            }
        }

        let data_content = match data_content {
            Some(d) => d.trim(),
            None => {
                tracing::trace!(
                    "SSE: No data field found in: {}",
                    &line[..floor_char_boundary(line, 100)]
                );
                return None;
            }
        };

        if data_content == "[DONE]" {
            tracing::debug!("SSE: Received [DONE] marker");
            return None;
        }

        match serde_json::from_str::<StreamEvent>(data_content) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                tracing::warn!(
                    "SSE: Failed to parse event: {} - data: {}",
                    e,
                    &data_content[..floor_char_boundary(data_content, 200)]
                );
                Some(Err(AnthropicError::ParseError(format!(
                    "Failed to parse stream event: {} - data: {}",
                    e, data_content
                ))))
            }
        }
    }

    /// Move decodable bytes from `pending` into the text buffer.
    fn decode_pending(&mut self) {
        let valid_up_to = match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                self.buffer.push_str(&text.replace("\r\n", "\n"));
                self.pending.clear();
                return;
            }
            Err(e) => e.valid_up_to(),
        };
        if valid_up_to > 0 {
            let rest = self.pending.split_off(valid_up_to);
            if let Ok(text) = std::str::from_utf8(&self.pending) {
                self.buffer.push_str(&text.replace("\r\n", "\n"));
            }
            self.pending = rest;
        }
    }

    /// Convert a stream event to a stream chunk.
    fn event_to_chunk(
        &mut self,
        event: StreamEvent,
    ) -> Option<Result<StreamChunk, AnthropicError>> {
        match event {
            StreamEvent::ContentBlockDelta { delta, .. } => match delta {
                ContentDelta::TextDelta { text } => {
                    self.accumulated_text.push_str(&text);
                    Some(Ok(StreamChunk::TextDelta {
                        text,
                        accumulated: self.accumulated_text.clone(),
                    }))
                }
                // Tools and extended thinking are never requested
                _ => None,
            },
            StreamEvent::MessageDelta { delta, usage } => {
                tracing::debug!(
                    "event_to_chunk: MessageDelta stop_reason={:?} usage={:?}",
                    delta.stop_reason,
                    usage
                );
                self.finished = true;
                self.done = true;
                Some(Ok(StreamChunk::Done {
                    stop_reason: delta.stop_reason.map(|r| format!("{:?}", r)),
                    usage: Some(usage),
                }))
            }
            StreamEvent::MessageStop => {
                self.finished = true;
                self.done = true;
                Some(Ok(StreamChunk::Done {
                    stop_reason: None,
                    usage: None,
                }))
            }
            StreamEvent::Error { error } => {
                tracing::error!(
                    "event_to_chunk: Error type={} message={}",
                    error.kind,
                    error.message
                );
                self.done = true;
                Some(Err(AnthropicError::StreamError(error.message)))
            }
            StreamEvent::MessageStart { .. }
            | StreamEvent::ContentBlockStart { .. }
            | StreamEvent::ContentBlockStop { .. }
            | StreamEvent::Ping => None,
        }
    }
}

impl Stream for StreamingResponse {
    type Item = Result<StreamChunk, AnthropicError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            if let Some(boundary) = self.buffer.find("\n\n") {
                let block = self.buffer[..boundary].to_string();
                self.buffer.drain(..boundary + 2);

                if let Some(result) = Self::parse_sse_line(&block) {
                    match result {
                        Ok(event) => {
                            if let Some(item) = self.event_to_chunk(event) {
                                return Poll::Ready(Some(item));
                            }
                            continue;
                        }
                        Err(e) => {
                            self.done = true;
                            return Poll::Ready(Some(Err(e)));
                        }
                    }
                }
                continue;
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    self.pending.extend_from_slice(&bytes);
                    self.decode_pending();
                }
                Poll::Ready(Some(Err(e))) => {
                    tracing::error!("poll_next: stream error: {}", e);
                    self.done = true;
                    return Poll::Ready(Some(Err(AnthropicError::StreamError(e.to_string()))));
                }
                Poll::Ready(None) => {
                    // Flush a trailing event that lacks its blank-line terminator
                    if !self.buffer.trim().is_empty() {
                        let block = std::mem::take(&mut self.buffer);
                        if let Some(result) = Self::parse_sse_line(&block) {
                            let item = match result {
                                Ok(event) => self.event_to_chunk(event),
                                Err(e) => Some(Err(e)),
                            };
                            if let Some(item) = item {
                                return Poll::Ready(Some(item));
                            }
                        }
                    }

                    self.done = true;
                    if !self.finished {
                        tracing::warn!(
                            "poll_next: stream ended after {} chars without message_stop",
                            self.accumulated_text.len()
                        );
                        return Poll::Ready(Some(Err(AnthropicError::StreamError(
                            "stream ended before the message was complete".to_string(),
                        ))));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    let mut end = s.len().min(max);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}
