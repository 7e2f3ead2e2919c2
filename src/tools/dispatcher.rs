//! Tool dispatch and result envelopes
//!
//! A [`ToolCallRequest`] is resolved into the closed [`ToolInvocation`] enum
//! and executed. Whatever happens, the caller receives a [`ToolResult`] whose
//! content is a JSON envelope:
//!
//! ```text
//! web_search    ok    → [{"title","link","snippet"}, ...]   (≤ 5)
//!               empty → {"message":"No results found."}
//! execute_code  ok    → {"result":"<log>","error":null}
//!               fail  → {"result":<partial log|null>,"error":"<message>"}
//! anything else       → {"error":"..."}
//! ```

use futures_util::future::join_all;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, info_span, warn, Instrument};

use super::search::{SearchClient, SearchError};
use crate::config::Settings;
use crate::llm::ToolCallRequest;
use crate::metrics::TOOL_CALLS;
use crate::observer::{Notice, TurnObserver};
use crate::sandbox::{CapturedOutput, ExecutionError, SandboxExecutor};

/// A tool call resolved against the built-in tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    WebSearch { query: String },
    ExecuteCode { code: String },
}

/// Why a request could not be turned into a [`ToolInvocation`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    Unknown(String),
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
}

#[derive(Deserialize)]
struct WebSearchArgs {
    query: String,
}

#[derive(Deserialize)]
struct ExecuteCodeArgs {
    code: String,
}

fn parse_args<T: for<'de> Deserialize<'de>>(request: &ToolCallRequest) -> Result<T, ToolError> {
    let raw = request.function.arguments.trim();
    let raw = if raw.is_empty() { "{}" } else { raw };
    serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments {
        tool: request.name().to_string(),
        reason: e.to_string(),
    })
}

impl TryFrom<&ToolCallRequest> for ToolInvocation {
    type Error = ToolError;

    fn try_from(request: &ToolCallRequest) -> Result<Self, Self::Error> {
        match request.name() {
            "web_search" => {
                let args: WebSearchArgs = parse_args(request)?;
                Ok(ToolInvocation::WebSearch { query: args.query })
            }
            "execute_code" => {
                let args: ExecuteCodeArgs = parse_args(request)?;
                Ok(ToolInvocation::ExecuteCode { code: args.code })
            }
            other => Err(ToolError::Unknown(other.to_string())),
        }
    }
}

/// Outcome of one tool call, correlated by id
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    /// Serialized JSON envelope
    pub content: String,
}

/// `{"error": message}`
pub fn error_envelope(message: impl std::fmt::Display) -> String {
    json!({ "error": message.to_string() }).to_string()
}

/// Envelope for an executor settlement
pub fn execution_envelope(settlement: &Result<CapturedOutput, ExecutionError>) -> String {
    match settlement {
        Ok(captured) => json!({ "result": captured.output, "error": null }),
        Err(e) => json!({ "result": e.partial_output(), "error": e.to_string() }),
    }
    .to_string()
}

/// Routes tool calls to the search client or the sandbox
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    search: SearchClient,
    executor: SandboxExecutor,
}

impl ToolDispatcher {
    pub fn new(search: SearchClient, executor: SandboxExecutor) -> Self {
        Self { search, executor }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            SearchClient::new(&settings.search),
            SandboxExecutor::from_settings(&settings.sandbox),
        )
    }

    /// Execute one request; never fails
    pub async fn dispatch(&self, request: &ToolCallRequest, observer: &dyn TurnObserver) -> ToolResult {
        let span = info_span!(
            "tool_call",
            tool = %request.name(),
            tool_call_id = %request.id,
            otel.name = "tool_call"
        );

        let content = async {
            TOOL_CALLS.with_label_values(&[metric_label(request.name())]).inc();
            match ToolInvocation::try_from(request) {
                Ok(ToolInvocation::WebSearch { query }) => self.web_search(&query, observer).await,
                Ok(ToolInvocation::ExecuteCode { code }) => {
                    execution_envelope(&self.executor.execute(&code).await)
                }
                Err(e) => {
                    warn!(error = %e, "Rejected tool call");
                    error_envelope(e)
                }
            }
        }
        .instrument(span)
        .await;

        ToolResult {
            tool_call_id: request.id.clone(),
            name: request.name().to_string(),
            content,
        }
    }

    /// Dispatch all requests concurrently; results come back in request order
    pub async fn dispatch_all(
        &self,
        requests: &[ToolCallRequest],
        observer: &dyn TurnObserver,
    ) -> Vec<ToolResult> {
        join_all(requests.iter().map(|request| self.dispatch(request, observer))).await
    }

    async fn web_search(&self, query: &str, observer: &dyn TurnObserver) -> String {
        match self.search.search(query).await {
            Ok(hits) if hits.is_empty() => json!({ "message": "No results found." }).to_string(),
            Ok(hits) => {
                info!(results = hits.len(), "Web search succeeded");
                json!(hits).to_string()
            }
            Err(SearchError::MissingApiKey) => {
                observer.notice(Notice::warning(
                    "API Key Missing",
                    "Web Search API key is not configured.",
                ));
                error_envelope(SearchError::MissingApiKey)
            }
            Err(e) => {
                warn!(error = %e, "Web search failed");
                observer.notice(Notice::error("Search Failed", e.to_string()));
                error_envelope(e)
            }
        }
    }
}

/// Bound the label cardinality: unknown names share one series
fn metric_label(name: &str) -> &'static str {
    match name {
        "web_search" => "web_search",
        "execute_code" => "execute_code",
        _ => "unknown",
    }
}
