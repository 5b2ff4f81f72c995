//! Scripted backend for tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;

use super::{ChatMessage, TextCompletion, TextStream};
use crate::error::{NobleError, Result};

#[derive(Default)]
pub(crate) struct ScriptedLlm {
    deltas: Vec<String>,
    /// Yield an error after the scripted deltas
    fail_stream: bool,
    /// Never finish after the scripted deltas
    hang: bool,
    /// `None` makes `complete` fail
    completion: Option<String>,
    pub chat_calls: AtomicUsize,
    pub complete_calls: AtomicUsize,
    pub last_system: Mutex<Option<String>>,
    pub last_messages: Mutex<Vec<ChatMessage>>,
    pub last_prompt: Mutex<Option<String>>,
}

impl ScriptedLlm {
    pub fn replying(deltas: &[&str]) -> Self {
        Self {
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn failing_after(deltas: &[&str]) -> Self {
        Self {
            fail_stream: true,
            ..Self::replying(deltas)
        }
    }

    pub fn hanging_after(deltas: &[&str]) -> Self {
        Self {
            hang: true,
            ..Self::replying(deltas)
        }
    }

    pub fn with_completion(mut self, text: &str) -> Self {
        self.completion = Some(text.to_string());
        self
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextCompletion for ScriptedLlm {
    async fn stream_chat(&self, system: &str, messages: &[ChatMessage]) -> Result<TextStream> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_system.lock() = Some(system.to_string());
        *self.last_messages.lock() = messages.to_vec();

        let deltas = futures::stream::iter(self.deltas.clone().into_iter().map(Ok));
        let stream: TextStream = if self.fail_stream {
            let failure = futures::stream::once(async {
                Err(NobleError::UpstreamModel("scripted failure".to_string()))
            });
            Box::pin(deltas.chain(failure))
        } else if self.hang {
            Box::pin(deltas.chain(futures::stream::pending()))
        } else {
            Box::pin(deltas)
        };
        Ok(stream)
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock() = Some(prompt.to_string());
        self.completion
            .clone()
            .ok_or_else(|| NobleError::UpstreamModel("scripted failure".to_string()))
    }

    fn description(&self) -> String {
        "Scripted".to_string()
    }
}
