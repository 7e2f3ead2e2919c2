//! Rendering/notification boundary
//!
//! The agent loop and tool dispatcher report what happens during a turn to a
//! [`TurnObserver`]. The terminal front-end prints; tests record.

use std::sync::Mutex;

use crate::llm::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Warning,
    Error,
}

/// A user-visible side notice (a toast in a graphical front-end)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

impl Notice {
    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Receives turn events; every method defaults to a no-op
pub trait TurnObserver: Send + Sync {
    /// A message was appended to the transcript
    fn message_appended(&self, _message: &Message) {}

    /// A tool finished; `content` is its JSON envelope
    fn tool_result(&self, _tool_name: &str, _content: &str) {}

    fn notice(&self, _notice: Notice) {}
}

/// Display text for a finished tool call
pub fn tool_result_display(tool_name: &str, content: &str) -> String {
    format!("Tool Result for {}:\n{}", tool_name, content)
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl TurnObserver for NullObserver {}

/// Event captured by [`RecordingObserver`]
#[derive(Debug, Clone, PartialEq)]
pub enum ObservedEvent {
    Message(Message),
    ToolResult { tool_name: String, content: String },
    Notice(Notice),
}

/// Observer that keeps every event in order
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ObservedEvent::Notice(notice) => Some(notice),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ObservedEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl TurnObserver for RecordingObserver {
    fn message_appended(&self, message: &Message) {
        self.push(ObservedEvent::Message(message.clone()));
    }

    fn tool_result(&self, tool_name: &str, content: &str) {
        self.push(ObservedEvent::ToolResult {
            tool_name: tool_name.to_string(),
            content: content.to_string(),
        });
    }

    fn notice(&self, notice: Notice) {
        self.push(ObservedEvent::Notice(notice));
    }
}
