//! Application settings
//!
//! Settings are persisted as JSON under the `settings` key of the
//! [`KeyValueStore`](crate::agent::store::KeyValueStore). Every field has a
//! default, so a partially written settings document (or one written by an
//! older version) still loads.

use serde::{Deserialize, Serialize};

/// Default completion endpoint
pub const DEFAULT_LLM_ENDPOINT: &str = "https://aipipe.org/v1/chat/completions";

/// Default search provider endpoint
pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://google.serper.dev/search";

/// Model ids offered by the model selector
pub const KNOWN_MODELS: &[&str] = &[
    "openai/gpt-4o-mini",
    "openai/gpt-4o",
    "anthropic/claude-3.5-sonnet",
    "google/gemini-1.5-flash",
    "mistralai/mistral-large",
];

/// Top-level settings document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub llm: LlmSettings,
    pub search: SearchSettings,
    pub sandbox: SandboxSettings,
    pub agent: AgentSettings,
    pub advanced: AdvancedSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: String,
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "aipipe".to_string(),
            api_key: String::new(),
            endpoint: DEFAULT_LLM_ENDPOINT.to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            max_tokens: 4000,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub api_key: String,
    pub endpoint: String,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
        }
    }
}

/// Interpreter used for `execute_code`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// JavaScript through `node` with the capture harness
    #[default]
    Javascript,
    /// POSIX shell (`sh -eu`)
    Shell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    pub runtime: RuntimeKind,
    /// Override for the interpreter binary (e.g. an absolute path to node)
    pub program: Option<String>,
    pub timeout_secs: u64,
    pub deny_network: bool,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::default(),
            program: None,
            timeout_secs: 5,
            deny_network: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Maximum LLM calls per user turn
    pub max_turns: usize,
    /// Prepended as a system message on every call when set
    pub system_prompt: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_turns: 5,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSettings {
    pub auto_save: bool,
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self { auto_save: true }
    }
}

impl Settings {
    /// Apply `NEXUS_*` environment overrides on top of stored settings
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("NEXUS_LLM_API_KEY").filter(|v| !v.is_empty()) {
            self.llm.api_key = key;
        }
        if let Some(key) = lookup("NEXUS_SEARCH_API_KEY").filter(|v| !v.is_empty()) {
            self.search.api_key = key;
        }
        if let Some(model) = lookup("NEXUS_MODEL").filter(|v| !v.is_empty()) {
            self.llm.model = model;
        }
    }
}
