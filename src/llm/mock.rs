//! Scripted completion provider for tests and offline runs

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use super::client::{CompletionProvider, LlmError};
use super::messages::{Message, ResponseMessage, Tool};

/// One scripted reply
#[derive(Debug, Clone)]
pub enum MockReply {
    Message(ResponseMessage),
    ApiError { status: u16, body: String },
}

/// A provider that replays pre-configured replies
///
/// When the script runs out it either repeats the fallback reply (see
/// [`MockProvider::repeating`]) or answers with an empty finishing message.
#[derive(Debug, Default)]
pub struct MockProvider {
    script: Mutex<VecDeque<MockReply>>,
    fallback: Option<ResponseMessage>,
    calls: AtomicUsize,
    transcripts: Mutex<Vec<Vec<Message>>>,
    gate: Option<Arc<Notify>>,
}

impl MockProvider {
    /// Create a provider replaying `replies` in order
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    /// Create a provider that answers every call with `reply`
    pub fn repeating(reply: ResponseMessage) -> Self {
        Self {
            fallback: Some(reply),
            ..Self::default()
        }
    }

    /// Hold every call until `gate` is notified
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Number of completion calls made so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Transcripts received by each call, in call order
    pub fn transcripts(&self) -> Vec<Vec<Message>> {
        self.transcripts
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }

    fn next_reply(&self) -> MockReply {
        let scripted = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());
        scripted.unwrap_or_else(|| {
            MockReply::Message(self.fallback.clone().unwrap_or_default())
        })
    }
}

impl CompletionProvider for MockProvider {
    fn model(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[Tool],
    ) -> Result<ResponseMessage, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.transcripts.lock() {
            seen.push(messages.to_vec());
        }

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        match self.next_reply() {
            MockReply::Message(message) => Ok(message),
            MockReply::ApiError { status, body } => Err(LlmError::Api { status, body }),
        }
    }
}
