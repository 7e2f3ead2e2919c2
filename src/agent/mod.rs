//! Agent module: the turn loop and the chat state around it
//!
//! # Architecture
//!
//! ```text
//! User input → ChatApp.submit (single-flight) → checkout Conversation
//!                  ↓
//!           AgentLoop.run_turn ──► CompletionProvider (transcript + tool schema)
//!                  ↓
//!           tool_calls? ── no ──► Completed
//!                  ↓ yes
//!           ToolDispatcher.dispatch_all (concurrent, request order)
//!             ├─ web_search   → SearchClient
//!             └─ execute_code → SandboxExecutor
//!                  ↓
//!           Tool messages appended → next LLM call (at most 5 per turn)
//!                  ↓
//!           write back + persist (ConversationStore → KeyValueStore)
//! ```

pub mod app;
pub mod controller;
pub mod sessions;
pub mod store;

pub use app::{ChatApp, SubmitOutcome};
pub use controller::{AgentConfig, AgentLoop, TurnOutcome, TurnReport};
pub use sessions::{Conversation, ConversationStore, ConversationSummary};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
