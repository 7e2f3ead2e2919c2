//! Chat completion wire types with tool calling support
//!
//! These types follow the OpenAI `chat/completions` format, which is what the
//! hosted endpoint speaks. A [`Message`] is tagged by its `role` field:
//!
//! ```text
//! {"role":"user","content":"..."}
//! {"role":"assistant","content":null,"tool_calls":[{"id":"call_1","type":"function",
//!     "function":{"name":"execute_code","arguments":"{\"code\":\"...\"}"}}]}
//! {"role":"tool","tool_call_id":"call_1","content":"{\"result\":\"42\",\"error\":null}"}
//! ```

use serde::{Deserialize, Deserializer, Serialize};

/// A message in a conversation transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default)]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// An assistant message carrying the model's tool-call requests
    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Message::Assistant {
            content: None,
            tool_calls: calls,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    /// Role name as it appears on the wire
    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::Tool { .. } => "tool",
        }
    }

    /// Visible text of the message, if any
    pub fn text(&self) -> Option<&str> {
        match self {
            Message::System { content }
            | Message::User { content }
            | Message::Tool { content, .. } => Some(content),
            Message::Assistant { content, .. } => content.as_deref(),
        }
    }

    /// Tool-call requests carried by an assistant message
    pub fn requested_tools(&self) -> &[ToolCallRequest] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// A tool call emitted by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub kind: String, // Always "function"
    pub function: FunctionCall,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: function_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// Function call details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object
    #[serde(default, deserialize_with = "arguments_as_string")]
    pub arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

/// The endpoint sends `arguments` as a JSON string, but some providers inline
/// the object. Both are normalized to the string form.
fn arguments_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Tool definition for the model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String, // Always "function"
    pub function: ToolFunction,
}

/// Function specification for a tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value, // JSON Schema
}

impl Tool {
    fn function(name: &str, description: &str, parameters: serde_json::Value) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: ToolFunction {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
        }
    }

    /// The `web_search` tool definition
    pub fn web_search() -> Self {
        Self::function(
            "web_search",
            "Search the web for current information, news, or facts.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query."
                    }
                },
                "required": ["query"]
            }),
        )
    }

    /// The `execute_code` tool definition
    pub fn execute_code() -> Self {
        Self::function(
            "execute_code",
            "Execute JavaScript code in a secure, sandboxed environment. Use for calculations, data manipulation, or testing algorithms. Use console.log() to see output.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "The JavaScript code to execute."
                    }
                },
                "required": ["code"]
            }),
        )
    }
}

/// The two-tool schema exposed to the model on every call
pub fn tool_schema() -> Vec<Tool> {
    vec![Tool::web_search(), Tool::execute_code()]
}

/// The message returned in the first choice of a completion
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
}

impl ResponseMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: None,
        }
    }

    pub fn with_tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: None,
            tool_calls: Some(calls),
        }
    }

    /// Visible content, ignoring empty strings
    pub fn visible_content(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }

    /// Tool calls, treating an empty list the same as none
    pub fn requested_tools(&self) -> Option<&[ToolCallRequest]> {
        self.tool_calls.as_deref().filter(|calls| !calls.is_empty())
    }
}

/// Response from `chat/completions`
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_roles_serialize_as_tag() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));

        let json = serde_json::to_value(Message::tool("call_1", "{}")).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
    }

    #[test]
    fn test_plain_assistant_omits_tool_calls() {
        let json = serde_json::to_string(&Message::assistant("done")).unwrap();
        assert!(!json.contains("tool_calls"));
    }

    #[test]
    fn test_tool_call_message_has_null_content() {
        let msg = Message::tool_calls(vec![ToolCallRequest::new(
            "call_1",
            "web_search",
            r#"{"query":"rust"}"#,
        )]);
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json["content"].is_null());
        assert_eq!(json["tool_calls"][0]["type"], "function");
        assert_eq!(json["tool_calls"][0]["function"]["name"], "web_search");
        assert_eq!(msg.requested_tools().len(), 1);
    }

    #[test]
    fn test_inline_object_arguments_are_normalized() {
        let call: ToolCallRequest = serde_json::from_value(serde_json::json!({
            "id": "call_9",
            "function": {"name": "execute_code", "arguments": {"code": "1+1"}}
        }))
        .unwrap();
        assert_eq!(call.kind, "function");
        let args: serde_json::Value = serde_json::from_str(&call.function.arguments).unwrap();
        assert_eq!(args["code"], "1+1");
    }

    #[test]
    fn test_tool_schema_shape() {
        let schema = tool_schema();
        assert_eq!(schema.len(), 2);
        assert_eq!(schema[0].function.name, "web_search");
        assert_eq!(schema[0].function.parameters["required"][0], "query");
        assert_eq!(schema[1].function.name, "execute_code");
        assert_eq!(schema[1].function.parameters["required"][0], "code");
    }

    #[test]
    fn test_response_message_treats_empty_as_absent() {
        let msg: ResponseMessage =
            serde_json::from_value(serde_json::json!({"content": "", "tool_calls": []})).unwrap();
        assert!(msg.visible_content().is_none());
        assert!(msg.requested_tools().is_none());
    }
}
