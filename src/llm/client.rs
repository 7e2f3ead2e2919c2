//! Client for an OpenAI-compatible `chat/completions` endpoint

use std::future::Future;

use serde::Serialize;
use tracing::debug;

use super::messages::{ChatResponse, Message, ResponseMessage, Tool};
use crate::config::LlmSettings;

/// Error type for completion calls
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// No API key configured; raised before any network call
    #[error("API key is not configured in settings.")]
    MissingApiKey,
    /// Endpoint answered with a non-success status
    #[error("API Error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Empty response from completion endpoint")]
    EmptyResponse,
}

/// Something that can produce the next assistant message for a transcript
pub trait CompletionProvider: Send + Sync {
    /// Model name used for logging and metrics labels
    fn model(&self) -> &str;

    /// Send the whole transcript plus the tool schema and return the first
    /// choice's message
    fn complete(
        &self,
        messages: &[Message],
        tools: &[Tool],
    ) -> impl Future<Output = Result<ResponseMessage, LlmError>> + Send;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    tools: &'a [Tool],
    tool_choice: &'static str,
    max_tokens: u32,
    temperature: f32,
}

/// HTTP client for the completion endpoint
#[derive(Clone)]
pub struct CompletionClient {
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl std::fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .finish()
    }
}

impl CompletionClient {
    /// Create a client from the LLM section of the settings
    pub fn new(settings: &LlmSettings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            client: reqwest::Client::new(),
        }
    }
}

impl CompletionProvider for CompletionClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ResponseMessage, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let body = CompletionRequest {
            model: &self.model,
            messages,
            tools,
            tool_choice: "auto",
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        debug!(endpoint = %self.endpoint, messages = messages.len(), "Sending completion request");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&text)?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or(LlmError::EmptyResponse)
    }
}
