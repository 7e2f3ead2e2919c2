//! Conversations and their persistent store
//!
//! A [`Conversation`] is the ordered transcript the agent loop appends to.
//! The [`ConversationStore`] owns every conversation and writes the whole map
//! to a [`KeyValueStore`] under a single key.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::store::{load_json, save_json, KeyValueStore, StoreError};
use crate::llm::Message;

/// Title of a conversation nobody has spoken in yet
pub const DEFAULT_TITLE: &str = "New Conversation";

/// Preview shown before the first message
pub const DEFAULT_PREVIEW: &str = "...";

/// Storage key for the conversation map
pub const CONVERSATIONS_KEY: &str = "conversations";

const PREVIEW_CHARS: usize = 100;
const TITLE_CHARS: usize = 30;

/// A saved conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// `conv_<uuid v7>`
    pub id: String,
    pub title: String,
    pub preview: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Transcript in insertion order
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: format!("conv_{}", uuid::Uuid::now_v7()),
            title: DEFAULT_TITLE.to_string(),
            preview: DEFAULT_PREVIEW.to_string(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    /// Append a message and refresh the title/preview bookkeeping
    ///
    /// User messages and assistant messages with text update the preview,
    /// name a still-untitled conversation, and bump `updated_at`.
    pub fn push(&mut self, message: Message) {
        let visible = match &message {
            Message::User { content } => Some(content.as_str()),
            Message::Assistant { content, .. } => content.as_deref().filter(|c| !c.is_empty()),
            _ => None,
        };

        if let Some(text) = visible {
            let preview = prefix(text, PREVIEW_CHARS);
            if !preview.is_empty() {
                self.preview = preview.clone();
            }
            if self.title == DEFAULT_TITLE {
                let title = prefix(&preview, TITLE_CHARS);
                self.title = if title.is_empty() {
                    "Conversation".to_string()
                } else {
                    title
                };
            }
            self.updated_at = Utc::now();
        }

        self.messages.push(message);
    }

    /// Drop the transcript and return to the untitled state
    pub fn clear(&mut self) {
        self.messages.clear();
        self.title = DEFAULT_TITLE.to_string();
        self.preview = DEFAULT_PREVIEW.to_string();
        self.updated_at = Utc::now();
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Markdown transcript: a title heading, then one paragraph per
    /// non-tool message that has text
    pub fn to_markdown(&self) -> String {
        let mut out = format!("# {}\n\n", self.title);
        for message in &self.messages {
            if matches!(message, Message::Tool { .. }) {
                continue;
            }
            if let Some(text) = message.text() {
                out.push_str(&format!("**{}**: {}\n\n", message.role(), text));
            }
        }
        out
    }

    /// Title with whitespace runs replaced by `_`, plus `.md`
    pub fn export_file_name(&self) -> String {
        let stem = self.title.split_whitespace().collect::<Vec<_>>().join("_");
        let stem = if stem.is_empty() { "conversation".to_string() } else { stem };
        format!("{}.md", stem)
    }
}

/// Summary of a conversation for listing
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub preview: String,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

impl From<&Conversation> for ConversationSummary {
    fn from(conv: &Conversation) -> Self {
        Self {
            id: conv.id.clone(),
            title: conv.title.clone(),
            preview: conv.preview.clone(),
            updated_at: conv.updated_at,
            message_count: conv.messages.len(),
        }
    }
}

/// All conversations, backed by a key-value store
pub struct ConversationStore {
    backend: Arc<dyn KeyValueStore>,
    conversations: HashMap<String, Conversation>,
    auto_save: bool,
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStore")
            .field("conversations", &self.conversations.len())
            .field("auto_save", &self.auto_save)
            .finish()
    }
}

impl ConversationStore {
    /// Load the saved map, or start empty if nothing was saved
    pub fn load(backend: Arc<dyn KeyValueStore>, auto_save: bool) -> Result<Self, StoreError> {
        let saved: Vec<Conversation> = load_json(backend.as_ref(), CONVERSATIONS_KEY)?.unwrap_or_default();
        debug!(count = saved.len(), "Loaded conversations");
        let conversations = saved.into_iter().map(|c| (c.id.clone(), c)).collect();
        Ok(Self {
            backend,
            conversations,
            auto_save,
        })
    }

    /// Create an empty conversation and return its id
    pub fn create(&mut self) -> String {
        let conv = Conversation::new();
        let id = conv.id.clone();
        self.conversations.insert(id.clone(), conv);
        id
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.conversations.contains_key(id)
    }

    /// Copy of a conversation for the duration of a turn
    pub fn checkout(&self, id: &str) -> Option<Conversation> {
        self.conversations.get(id).cloned()
    }

    /// Replace the stored conversation with its post-turn state
    pub fn write_back(&mut self, conversation: Conversation) {
        self.conversations.insert(conversation.id.clone(), conversation);
    }

    /// Summaries, most recently updated first
    pub fn list(&self) -> Vec<ConversationSummary> {
        let mut list: Vec<_> = self.conversations.values().map(ConversationSummary::from).collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        list
    }

    pub fn most_recent(&self) -> Option<&Conversation> {
        self.conversations.values().max_by_key(|c| c.updated_at)
    }

    /// Clear one conversation's transcript; false if it does not exist
    pub fn clear_messages(&mut self, id: &str) -> bool {
        match self.conversations.get_mut(id) {
            Some(conv) => {
                conv.clear();
                true
            }
            None => false,
        }
    }

    /// Forget every conversation and wipe the backing store
    pub fn delete_all(&mut self) -> Result<(), StoreError> {
        self.conversations.clear();
        self.backend.clear()
    }

    /// Write the whole map, regardless of `auto_save`
    pub fn save(&self) -> Result<(), StoreError> {
        let mut all: Vec<&Conversation> = self.conversations.values().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        save_json(self.backend.as_ref(), CONVERSATIONS_KEY, &all)
    }

    /// Write the map if `auto_save` is on
    pub fn persist(&self) -> Result<(), StoreError> {
        if self.auto_save {
            self.save()
        } else {
            Ok(())
        }
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

/// First `max` characters of `s`
fn prefix(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
