//! Agent loop - drives one user turn to completion
//!
//! The loop calls the LLM with the whole transcript, appends what it says,
//! runs any requested tools concurrently, appends their results in request
//! order and calls the LLM again. It stops when the model answers without
//! tool calls, when the LLM call fails, or when the turn budget runs out.

use std::borrow::Cow;
use std::collections::HashSet;
use std::time::Instant;

use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::sessions::Conversation;
use crate::config::{AgentSettings, Settings};
use crate::llm::{tool_schema, CompletionProvider, Message, Tool, ToolCallRequest};
use crate::metrics::{AGENT_LLM_CALLS, AGENT_TURNS, LLM_CALL_TIME};
use crate::observer::{Notice, TurnObserver};
use crate::tools::ToolDispatcher;

/// Configuration for the agent loop
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Maximum number of LLM calls per user turn
    pub max_turns: usize,
    /// Prepended to every request when set; never stored in the transcript
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 5,
            system_prompt: None,
        }
    }
}

impl From<&AgentSettings> for AgentConfig {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            max_turns: settings.max_turns,
            system_prompt: settings.system_prompt.clone().filter(|p| !p.trim().is_empty()),
        }
    }
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model answered without requesting tools
    Completed,
    /// Every LLM call in the budget requested tools
    BudgetExhausted,
    /// An LLM call failed; the error was appended as a system message
    Failed(String),
    /// The model reused a tool-call id within one response
    ProtocolViolation,
}

impl TurnOutcome {
    fn label(&self) -> &'static str {
        match self {
            TurnOutcome::Completed => "completed",
            TurnOutcome::BudgetExhausted => "budget_exhausted",
            TurnOutcome::Failed(_) => "failed",
            TurnOutcome::ProtocolViolation => "protocol_violation",
        }
    }
}

/// Result of one user turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    /// Number of LLM calls made
    pub llm_calls: usize,
    /// Number of tool calls dispatched
    pub tool_calls_made: usize,
    /// Unique trace ID for this turn
    pub trace_id: String,
}

/// Per-turn bookkeeping, dropped when the turn ends
struct AgentTurnContext {
    trace_id: String,
    remaining_turns: usize,
    llm_calls: usize,
    tool_calls_made: usize,
}

impl AgentTurnContext {
    fn new(max_turns: usize) -> Self {
        Self {
            trace_id: Uuid::now_v7().to_string(),
            remaining_turns: max_turns,
            llm_calls: 0,
            tool_calls_made: 0,
        }
    }

    fn into_report(self, outcome: TurnOutcome) -> TurnReport {
        TurnReport {
            outcome,
            llm_calls: self.llm_calls,
            tool_calls_made: self.tool_calls_made,
            trace_id: self.trace_id,
        }
    }
}

/// The orchestration loop over an LLM provider and the tool dispatcher
pub struct AgentLoop<P> {
    provider: P,
    dispatcher: ToolDispatcher,
    config: AgentConfig,
    tools: Vec<Tool>,
}

impl<P: CompletionProvider> AgentLoop<P> {
    pub fn new(provider: P, dispatcher: ToolDispatcher, config: AgentConfig) -> Self {
        Self {
            provider,
            dispatcher,
            config,
            tools: tool_schema(),
        }
    }

    /// Build the loop and its dispatcher from settings
    pub fn from_settings(provider: P, settings: &Settings) -> Self {
        Self::new(
            provider,
            ToolDispatcher::from_settings(settings),
            AgentConfig::from(&settings.agent),
        )
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Drive one user turn; the user message must already be in `conversation`
    ///
    /// Only appends to the transcript. Never fails: errors end up in the
    /// transcript or in the returned outcome.
    pub async fn run_turn(&self, conversation: &mut Conversation, observer: &dyn TurnObserver) -> TurnReport {
        let mut ctx = AgentTurnContext::new(self.config.max_turns);

        let root_span = info_span!(
            "agent_turn",
            trace_id = %ctx.trace_id,
            conversation_id = %conversation.id,
            model = %self.provider.model(),
            otel.name = "agent_turn"
        );

        let outcome = self.drive(conversation, observer, &mut ctx).instrument(root_span).await;

        AGENT_TURNS.with_label_values(&[outcome.label()]).inc();
        AGENT_LLM_CALLS.observe(ctx.llm_calls as f64);

        ctx.into_report(outcome)
    }

    async fn drive(
        &self,
        conversation: &mut Conversation,
        observer: &dyn TurnObserver,
        ctx: &mut AgentTurnContext,
    ) -> TurnOutcome {
        info!(trace_id = %ctx.trace_id, budget = ctx.remaining_turns, "Starting agent turn");

        while ctx.remaining_turns > 0 {
            ctx.remaining_turns -= 1;
            ctx.llm_calls += 1;

            let llm_span = info_span!(
                "llm_call",
                trace_id = %ctx.trace_id,
                call = ctx.llm_calls,
                model = %self.provider.model(),
                otel.name = "llm_call"
            );

            let call_start = Instant::now();
            let response = {
                let request = self.request_messages(conversation);
                self.provider
                    .complete(&request, &self.tools)
                    .instrument(llm_span)
                    .await
            };

            let call_duration_secs = call_start.elapsed().as_secs_f64();
            LLM_CALL_TIME
                .with_label_values(&[self.provider.model()])
                .observe(call_duration_secs);

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    warn!(trace_id = %ctx.trace_id, error = %e, "LLM call failed");
                    append(conversation, observer, Message::system(format!("An error occurred: {}", e)));
                    observer.notice(Notice::error("Agent Error", e.to_string()));
                    return TurnOutcome::Failed(e.to_string());
                }
            };

            debug!(
                trace_id = %ctx.trace_id,
                call = ctx.llm_calls,
                duration_ms = call_duration_secs * 1000.0,
                "LLM call completed"
            );

            if let Some(text) = response.visible_content() {
                append(conversation, observer, Message::assistant(text));
            }

            let Some(calls) = response.requested_tools() else {
                info!(
                    trace_id = %ctx.trace_id,
                    llm_calls = ctx.llm_calls,
                    tool_calls = ctx.tool_calls_made,
                    "Agent turn completed"
                );
                return TurnOutcome::Completed;
            };

            if let Some(id) = first_duplicate_id(calls) {
                warn!(trace_id = %ctx.trace_id, tool_call_id = %id, "Duplicate tool call id in one response");
                let notice = format!(
                    "The model returned tool call id '{}' more than once; the turn was stopped.",
                    id
                );
                append(conversation, observer, Message::system(notice.clone()));
                observer.notice(Notice::error("Agent Error", notice));
                return TurnOutcome::ProtocolViolation;
            }

            let calls = calls.to_vec();
            ctx.tool_calls_made += calls.len();
            info!(trace_id = %ctx.trace_id, count = calls.len(), "Dispatching tool calls");

            append(conversation, observer, Message::tool_calls(calls.clone()));

            // join_all keeps request order regardless of completion order
            let results = self.dispatcher.dispatch_all(&calls, observer).await;
            for result in results {
                append(conversation, observer, Message::tool(&result.tool_call_id, &result.content));
                observer.tool_result(&result.name, &result.content);
            }
        }

        warn!(
            trace_id = %ctx.trace_id,
            llm_calls = ctx.llm_calls,
            "Turn budget exhausted while the model was still requesting tools"
        );
        TurnOutcome::BudgetExhausted
    }

    /// The transcript as sent, with the configured system prompt in front
    fn request_messages<'a>(&self, conversation: &'a Conversation) -> Cow<'a, [Message]> {
        match &self.config.system_prompt {
            Some(prompt) => {
                let mut messages = Vec::with_capacity(conversation.messages.len() + 1);
                messages.push(Message::system(prompt.as_str()));
                messages.extend(conversation.messages.iter().cloned());
                Cow::Owned(messages)
            }
            None => Cow::Borrowed(&conversation.messages),
        }
    }
}

fn append(conversation: &mut Conversation, observer: &dyn TurnObserver, message: Message) {
    conversation.push(message);
    if let Some(appended) = conversation.messages.last() {
        observer.message_appended(appended);
    }
}

fn first_duplicate_id(calls: &[ToolCallRequest]) -> Option<&str> {
    let mut seen = HashSet::new();
    calls
        .iter()
        .map(|call| call.id.as_str())
        .find(|id| !seen.insert(*id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchSettings;
    use crate::llm::{MockProvider, MockReply, ResponseMessage};
    use crate::observer::{NullObserver, RecordingObserver};
    use crate::sandbox::{SandboxExecutor, SandboxRuntime};
    use crate::tools::SearchClient;
    use std::time::Duration;

    fn dispatcher() -> ToolDispatcher {
        ToolDispatcher::new(
            SearchClient::new(&SearchSettings::default()),
            SandboxExecutor::new(SandboxRuntime::shell(), Duration::from_secs(5)),
        )
    }

    fn conversation_with(text: &str) -> Conversation {
        let mut conv = Conversation::new();
        conv.push(Message::user(text));
        conv
    }

    #[test]
    fn test_duplicate_detection() {
        let calls = vec![
            ToolCallRequest::new("a", "web_search", "{}"),
            ToolCallRequest::new("b", "web_search", "{}"),
            ToolCallRequest::new("a", "execute_code", "{}"),
        ];
        assert_eq!(first_duplicate_id(&calls), Some("a"));
        assert_eq!(first_duplicate_id(&calls[..2]), None);
    }

    #[test]
    fn test_config_from_settings_ignores_blank_prompt() {
        let settings = AgentSettings {
            max_turns: 3,
            system_prompt: Some("   ".to_string()),
        };
        let config = AgentConfig::from(&settings);
        assert_eq!(config.max_turns, 3);
        assert!(config.system_prompt.is_none());
    }

    #[tokio::test]
    async fn test_plain_answer_completes_in_one_call() {
        let provider = MockProvider::new(vec![MockReply::Message(ResponseMessage::text("Hello!"))]);
        let agent = AgentLoop::new(provider, dispatcher(), AgentConfig::default());
        let mut conv = conversation_with("hi");

        let report = agent.run_turn(&mut conv, &NullObserver).await;
        assert_eq!(report.outcome, TurnOutcome::Completed);
        assert_eq!(report.llm_calls, 1);
        assert_eq!(conv.messages.last(), Some(&Message::assistant("Hello!")));
    }

    #[tokio::test]
    async fn test_system_prompt_is_sent_but_not_stored() {
        let provider = MockProvider::new(vec![MockReply::Message(ResponseMessage::text("ok"))]);
        let config = AgentConfig {
            max_turns: 5,
            system_prompt: Some("Be brief.".to_string()),
        };
        let agent = AgentLoop::new(provider, dispatcher(), config);
        let mut conv = conversation_with("hi");

        agent.run_turn(&mut conv, &NullObserver).await;
        let sent = agent.provider().transcripts();
        assert_eq!(sent[0][0], Message::system("Be brief."));
        assert_eq!(sent[0][1], Message::user("hi"));
        assert!(conv.messages.iter().all(|m| m.role() != "system"));
    }

    #[tokio::test]
    async fn test_custom_budget() {
        let call = ToolCallRequest::new("c", "execute_code", r#"{"code":"true"}"#);
        let provider = MockProvider::repeating(ResponseMessage::with_tool_calls(vec![call]));
        let config = AgentConfig {
            max_turns: 2,
            system_prompt: None,
        };
        let agent = AgentLoop::new(provider, dispatcher(), config);
        let mut conv = conversation_with("loop");

        let report = agent.run_turn(&mut conv, &NullObserver).await;
        assert_eq!(report.outcome, TurnOutcome::BudgetExhausted);
        assert_eq!(agent.provider().call_count(), 2);
        assert_eq!(report.tool_calls_made, 2);
    }

    #[tokio::test]
    async fn test_tool_results_reach_observer() {
        let call = ToolCallRequest::new("c1", "execute_code", r#"{"code":"echo 7"}"#);
        let provider = MockProvider::new(vec![
            MockReply::Message(ResponseMessage::with_tool_calls(vec![call])),
            MockReply::Message(ResponseMessage::text("7")),
        ]);
        let agent = AgentLoop::new(provider, dispatcher(), AgentConfig::default());
        let observer = RecordingObserver::new();
        let mut conv = conversation_with("seven?");

        agent.run_turn(&mut conv, &observer).await;
        let tool_events: Vec<_> = observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                crate::observer::ObservedEvent::ToolResult { tool_name, content } => Some((tool_name, content)),
                _ => None,
            })
            .collect();
        assert_eq!(tool_events.len(), 1);
        assert_eq!(tool_events[0].0, "execute_code");
        let envelope: serde_json::Value = serde_json::from_str(&tool_events[0].1).unwrap();
        assert_eq!(envelope, serde_json::json!({"result": "7", "error": null}));
    }
}
