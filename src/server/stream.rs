//! UI message stream encoding of a chat turn.
//!
//! Each SSE `data:` line carries one JSON chunk: `start`, `text-start`,
//! any number of `text-delta`, `text-end`, `finish`, then the literal
//! `[DONE]`. A failed turn sends a generic `error` chunk instead of the
//! closing text chunks.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::time::Duration;

use axum::http::HeaderName;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::Stream;
use serde::Serialize;
use tokio::sync::mpsc;

use super::types::GENERIC_ERROR;
use crate::conversation::{TurnEvent, TurnStream};

pub const UI_MESSAGE_STREAM_HEADER: &str = "x-vercel-ai-ui-message-stream";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiChunk {
    #[serde(rename_all = "camelCase")]
    Start { message_id: String },
    TextStart { id: String },
    TextDelta { id: String, delta: String },
    TextEnd { id: String },
    #[serde(rename_all = "camelCase")]
    Error { error_text: String },
    Finish,
}

impl UiChunk {
    fn event(&self) -> Event {
        match serde_json::to_string(self) {
            Ok(json) => Event::default().data(json),
            Err(e) => {
                tracing::error!("Failed to serialize stream chunk: {}", e);
                Event::default().data(r#"{"type":"error","errorText":"Something went wrong"}"#)
            }
        }
    }
}

struct Encoder {
    events: mpsc::Receiver<TurnEvent>,
    text_id: String,
    pending: VecDeque<Event>,
    done: bool,
}

impl Encoder {
    fn close_with(&mut self, chunks: &[UiChunk]) {
        self.pending.extend(chunks.iter().map(UiChunk::event));
        self.pending.push_back(Event::default().data("[DONE]"));
        self.done = true;
    }
}

/// Encode a turn's events as a UI message SSE stream.
pub fn ui_message_events(turn: TurnStream) -> impl Stream<Item = Result<Event, Infallible>> {
    let message_id = uuid::Uuid::new_v4().to_string();
    let text_id = uuid::Uuid::new_v4().to_string();
    let pending = VecDeque::from([
        UiChunk::Start { message_id }.event(),
        UiChunk::TextStart { id: text_id.clone() }.event(),
    ]);
    // Dropping the join handle detaches the turn task.
    let encoder = Encoder {
        events: turn.events,
        text_id,
        pending,
        done: false,
    };

    futures::stream::unfold(encoder, |mut enc| async move {
        loop {
            if let Some(event) = enc.pending.pop_front() {
                return Some((Ok(event), enc));
            }
            if enc.done {
                return None;
            }
            match enc.events.recv().await {
                Some(TurnEvent::Delta(delta)) => {
                    let chunk = UiChunk::TextDelta {
                        id: enc.text_id.clone(),
                        delta,
                    };
                    enc.pending.push_back(chunk.event());
                }
                Some(TurnEvent::Finished) => {
                    let end = UiChunk::TextEnd {
                        id: enc.text_id.clone(),
                    };
                    enc.close_with(&[end, UiChunk::Finish]);
                }
                Some(TurnEvent::Failed) | None => {
                    let error = UiChunk::Error {
                        error_text: GENERIC_ERROR.to_string(),
                    };
                    enc.close_with(&[error]);
                }
            }
        }
    })
}

/// SSE response for a chat turn, with the protocol header set.
pub fn ui_message_response(turn: TurnStream) -> Response {
    let sse = Sse::new(ui_message_events(turn)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    );
    (
        [(HeaderName::from_static(UI_MESSAGE_STREAM_HEADER), "v1")],
        sse,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn turn(events: Vec<TurnEvent>) -> TurnStream {
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(async move {
            for event in events {
                tx.send(event).await.unwrap();
            }
            crate::conversation::TurnOutcome::Failed
        });
        TurnStream { events: rx, task }
    }

    async fn body(turn: TurnStream) -> String {
        let response = ui_message_response(turn);
        assert_eq!(response.headers()[UI_MESSAGE_STREAM_HEADER], "v1");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn chunks(body: &str) -> Vec<String> {
        body.lines()
            .filter_map(|l| l.strip_prefix("data: "))
            .map(str::to_string)
            .collect()
    }

    fn chunk_type(chunk: &str) -> String {
        if chunk == "[DONE]" {
            return chunk.to_string();
        }
        let value: serde_json::Value = serde_json::from_str(chunk).unwrap();
        value["type"].as_str().unwrap().to_string()
    }

    #[test]
    fn chunks_serialize_in_wire_form() {
        assert_eq!(
            serde_json::to_value(UiChunk::Start { message_id: "m".into() }).unwrap(),
            json!({"type": "start", "messageId": "m"})
        );
        assert_eq!(
            serde_json::to_value(UiChunk::TextDelta {
                id: "t".into(),
                delta: "Hi".into()
            })
            .unwrap(),
            json!({"type": "text-delta", "id": "t", "delta": "Hi"})
        );
        assert_eq!(
            serde_json::to_value(UiChunk::Error {
                error_text: "x".into()
            })
            .unwrap(),
            json!({"type": "error", "errorText": "x"})
        );
        assert_eq!(serde_json::to_value(UiChunk::Finish).unwrap(), json!({"type": "finish"}));
    }

    #[tokio::test]
    async fn finished_turn_is_framed() {
        let body = body(turn(vec![
            TurnEvent::Delta("Hello".into()),
            TurnEvent::Delta(" there".into()),
            TurnEvent::Finished,
        ]))
        .await;
        let chunks = chunks(&body);

        let types: Vec<String> = chunks.iter().map(|c| chunk_type(c)).collect();
        assert_eq!(
            types,
            vec!["start", "text-start", "text-delta", "text-delta", "text-end", "finish", "[DONE]"]
        );
        let delta: serde_json::Value = serde_json::from_str(&chunks[2]).unwrap();
        assert_eq!(delta["delta"], "Hello");
    }

    #[tokio::test]
    async fn failed_turn_sends_generic_error() {
        let body = body(turn(vec![TurnEvent::Delta("Par".into()), TurnEvent::Failed])).await;
        let chunks = chunks(&body);

        let types: Vec<String> = chunks.iter().map(|c| chunk_type(c)).collect();
        assert_eq!(types, vec!["start", "text-start", "text-delta", "error", "[DONE]"]);
        assert!(chunks[3].contains(GENERIC_ERROR));
    }

    #[tokio::test]
    async fn closed_channel_without_finish_is_an_error() {
        let events: Vec<_> = ui_message_events(turn(vec![]))
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(events.len(), 4);
    }
}
