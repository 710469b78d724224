//! LLM Provider Abstraction Layer
//!
//! The engine talks to language models only through the [`LLMProvider`]
//! trait: one `generate` call per turn, optionally carrying a structured chat
//! transcript and tool definitions. Concrete HTTP adapters live outside this
//! crate; [`mock::MockProvider`] is the in-process implementation used for
//! offline runs and tests.

use async_trait::async_trait;
use sdk::skill::SkillCallResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub mod mock;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Message in a tool-loop transcript
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Role of the message sender (user, assistant, system, tool)
    pub role: MessageRole,

    pub content: String,

    /// Tool name, set on tool result messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool call ID for tool result messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool calls requested by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reasoning_content: String,
}

impl ChatMessage {
    fn with_role(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
            reasoning_content: String::new(),
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content)
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, content)
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content)
    }

    /// Create a new tool result message answering `call`
    pub fn tool_result(content: impl Into<String>, call: &ToolCall) -> Self {
        Self {
            name: Some(call.name.clone()),
            tool_call_id: Some(call.id.clone()),
            ..Self::with_role(MessageRole::Tool, content)
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Tool call request from the LLM
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,

    /// Name of the tool to call
    pub name: String,

    /// Arguments to pass to the tool (JSON string)
    pub arguments: String,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Identity used to detect a model repeating the same call
    pub fn repeat_key(&self) -> String {
        format!("{}|{}", self.name, self.arguments.trim())
    }
}

/// Tool advertised to a tool-capable provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
    #[serde(default)]
    pub strict: bool,
}

/// One generation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub agent_name: String,
    pub model: String,
    pub system_prompt: String,
    /// Compiled context, or the raw run input during a tool loop
    pub input: String,
    pub available_skills: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub startup_results: Vec<SkillCallResult>,
    /// Structured transcript; empty outside the tool loop
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

/// Response from an LLM provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LLMResponse {
    pub text: String,
    /// Provider name reported by the adapter, overrides the configured one when set
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub meta: Map<String, Value>,
    #[serde(default)]
    pub finish_reason: String,
    #[serde(default)]
    pub reasoning_content: String,
    /// Non-empty when the model wants tools run before answering
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl LLMResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Default::default()
        }
    }

    /// `meta.provider_type`, when the adapter reports it
    pub fn provider_type(&self) -> Option<&str> {
        self.meta
            .get("provider_type")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider
    fn name(&self) -> &str;

    /// Whether this provider understands tool definitions and returns tool calls
    fn supports_tools(&self) -> bool {
        false
    }

    /// Generate a response from the LLM
    async fn generate(&self, request: GenerateRequest) -> Result<LLMResponse>;
}
