//! Chat application state: single-flight submission over the conversation store

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::{info, warn};

use super::controller::{AgentLoop, TurnReport};
use super::sessions::ConversationStore;
use crate::llm::{CompletionProvider, Message};
use crate::observer::{Notice, TurnObserver};

/// Result of a [`ChatApp::submit`] call
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// A turn is already in flight; nothing was touched
    Busy,
    /// The input was blank
    EmptyInput,
    UnknownConversation,
    Completed(TurnReport),
}

/// Clears the in-flight flag however the turn ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One agent loop, one conversation store, at most one turn at a time
pub struct ChatApp<P> {
    agent: AgentLoop<P>,
    conversations: Mutex<ConversationStore>,
    busy: AtomicBool,
}

impl<P: CompletionProvider> ChatApp<P> {
    pub fn new(agent: AgentLoop<P>, conversations: ConversationStore) -> Self {
        Self {
            agent,
            conversations: Mutex::new(conversations),
            busy: AtomicBool::new(false),
        }
    }

    pub fn agent(&self) -> &AgentLoop<P> {
        &self.agent
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Read the conversation store
    ///
    /// The lock is held only for the duration of `f`; never across a turn.
    pub fn with_store<R>(&self, f: impl FnOnce(&ConversationStore) -> R) -> R {
        f(&self.lock_store())
    }

    /// Mutate the conversation store, or `None` while a turn is in flight
    ///
    /// A running turn writes its checked-out conversation back when it ends,
    /// which would undo any clear or delete made in the meantime.
    pub fn with_store_mut<R>(&self, f: impl FnOnce(&mut ConversationStore) -> R) -> Option<R> {
        let mut store = self.lock_store();
        // Checked under the lock: `submit` raises the flag before its checkout
        // and lowers it only after its write-back.
        if self.is_busy() {
            return None;
        }
        Some(f(&mut store))
    }

    /// Append `text` as a user message and drive one agent turn
    ///
    /// Rejected with [`SubmitOutcome::Busy`] while another turn runs. The
    /// conversation is checked out for the turn and written back (and
    /// persisted when auto-save is on) afterwards, whatever the outcome.
    pub async fn submit(&self, conversation_id: &str, text: &str, observer: &dyn TurnObserver) -> SubmitOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SubmitOutcome::EmptyInput;
        }

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!(conversation_id, "Submission rejected: turn in flight");
            return SubmitOutcome::Busy;
        }
        let _in_flight = InFlight(&self.busy);

        let checked_out = self.lock_store().checkout(conversation_id);
        let Some(mut conversation) = checked_out else {
            return SubmitOutcome::UnknownConversation;
        };

        conversation.push(Message::user(text));
        if let Some(user) = conversation.messages.last() {
            observer.message_appended(user);
        }

        let report = self.agent.run_turn(&mut conversation, observer).await;

        let mut store = self.lock_store();
        store.write_back(conversation);
        if let Err(e) = store.persist() {
            warn!(error = %e, "Failed to save conversations");
            observer.notice(Notice::error("Save Failed", e.to_string()));
        }

        SubmitOutcome::Completed(report)
    }

    fn lock_store(&self) -> MutexGuard<'_, ConversationStore> {
        // A panic while holding the lock cannot leave the map half-updated
        self.conversations.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
