//! Nexus - a terminal chat client with a tool-using agent loop
//!
//! A user turn is driven through repeated calls to a hosted LLM completion
//! endpoint. The model may call two tools, `web_search` and `execute_code`;
//! their results are fed back until it answers without tools or the turn
//! budget runs out.
//!
//! # Modules
//!
//! - `agent` - Agent loop, chat app state, conversations and persistence
//! - `llm` - Completion client, wire types and a scripted mock provider
//! - `tools` - Tool dispatch, result envelopes and web search
//! - `sandbox` - Isolated, time-limited code execution
//! - `observer` - Rendering/notification boundary
//! - `config` - Settings document and environment overrides
//! - `metrics` - Prometheus metrics for observability
//! - `tracing` - Logging and OpenTelemetry setup
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use nexus::{AgentLoop, ChatApp, CompletionClient, ConversationStore, FileStore, NullObserver};
//!
//! let backend = Arc::new(FileStore::default_store()?);
//! let settings = nexus::agent::store::load_settings(backend.as_ref())?;
//! let agent = AgentLoop::from_settings(CompletionClient::new(&settings.llm), &settings);
//! let app = ChatApp::new(agent, ConversationStore::load(backend, settings.advanced.auto_save)?);
//!
//! let id = app.with_store_mut(|s| s.create()).expect("no turn in flight yet");
//! app.submit(&id, "What is 2^10?", &NullObserver).await;
//! ```

pub mod agent;
pub mod config;
pub mod llm;
pub mod metrics;
pub mod observer;
pub mod sandbox;
pub mod tools;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use agent::{
    AgentConfig, AgentLoop, ChatApp, Conversation, ConversationStore, FileStore, KeyValueStore,
    MemoryStore, SubmitOutcome, TurnOutcome, TurnReport,
};
pub use config::Settings;
pub use llm::{CompletionClient, CompletionProvider, LlmError, Message};
pub use observer::{Notice, NoticeLevel, NullObserver, TurnObserver};
pub use sandbox::{ExecutionError, SandboxExecutor};
pub use tools::{ToolDispatcher, ToolResult};
