//! LLM integration module
//!
//! This module provides the client for the hosted completion endpoint and the
//! wire types of the tool-calling protocol.

pub mod client;
pub mod messages;
pub mod mock;

// Re-export public types so callers can `use crate::llm::Message`
pub use client::{CompletionClient, CompletionProvider, LlmError};
pub use messages::{tool_schema, FunctionCall, Message, ResponseMessage, Tool, ToolCallRequest};
pub use mock::{MockProvider, MockReply};
