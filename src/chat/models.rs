//! Chat data models
//!
//! Defines the message structure shared by requests, session history and
//! streamed agent output.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instructions
    System,
    /// Message from the user
    User,
    /// Message from the assistant/AI
    Assistant,
    /// Result of a tool invocation
    Tool,
}

impl MessageRole {
    /// Convert the role to its string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

impl From<&str> for MessageRole {
    fn from(s: &str) -> Self {
        match s {
            "system" => MessageRole::System,
            "assistant" => MessageRole::Assistant,
            "tool" => MessageRole::Tool,
            _ => MessageRole::User,
        }
    }
}

/// A tool invocation requested by the assistant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back in the tool result
    pub id: String,
    /// Name of the tool function
    pub name: String,
    /// Raw JSON arguments as produced by the model
    pub arguments: String,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier; streamed chunks of one reply share it
    #[serde(default = "generate_id")]
    pub id: String,
    /// Display name of the sender
    #[serde(default)]
    pub name: String,
    /// Role of the message sender
    pub role: MessageRole,
    /// Text content
    #[serde(default)]
    pub content: String,
    /// Tool calls requested by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Call id this tool message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// When the message was created (Unix timestamp)
    #[serde(default = "now")]
    pub created_at: i64,
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

fn now() -> i64 {
    Utc::now().timestamp()
}

impl Message {
    /// Create a new message with a fresh id
    pub fn new(name: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            name: name.into(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            created_at: now(),
        }
    }

    /// Shorthand for a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", MessageRole::User, content)
    }

    /// Tool result answering `call`
    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        let mut message = Self::new(call.name.clone(), MessageRole::Tool, content);
        message.tool_call_id = Some(call.id.clone());
        message
    }
}
