//! OpenAI chat formatter
//!
//! Turns a system prompt and session history into the `messages` array of
//! an OpenAI chat completions request.

use crate::chat::{Message, MessageRole};
use serde_json::{json, Value};

/// Formats messages for OpenAI-compatible chat APIs
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiChatFormatter;

impl OpenAiChatFormatter {
    /// Format `history` preceded by `sys_prompt`
    pub fn format(&self, sys_prompt: &str, history: &[Message]) -> Vec<Value> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !sys_prompt.is_empty() {
            messages.push(json!({ "role": "system", "content": sys_prompt }));
        }
        messages.extend(history.iter().map(format_message));
        messages
    }
}

fn format_message(message: &Message) -> Value {
    match message.role {
        MessageRole::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
            "content": message.content,
        }),
        MessageRole::Assistant if !message.tool_calls.is_empty() => {
            let tool_calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": { "name": call.name, "arguments": call.arguments },
                    })
                })
                .collect();
            json!({
                "role": "assistant",
                "content": message.content,
                "tool_calls": tool_calls,
            })
        }
        role => {
            let mut value = json!({ "role": role.as_str(), "content": message.content });
            if role == MessageRole::User && !message.name.is_empty() && message.name != "user" {
                value["name"] = json!(message.name);
            }
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ToolCall;

    #[test]
    fn test_system_prompt_first() {
        let formatted = OpenAiChatFormatter.format(
            "You're a helpful assistant named Friday.",
            &[Message::user("hello")],
        );
        assert_eq!(formatted.len(), 2);
        assert_eq!(formatted[0]["role"], "system");
        assert_eq!(formatted[1], json!({"role": "user", "content": "hello"}));
    }

    #[test]
    fn test_empty_prompt_is_omitted() {
        let formatted = OpenAiChatFormatter.format("", &[Message::user("hello")]);
        assert_eq!(formatted.len(), 1);
    }

    #[test]
    fn test_tool_round_trip_shape() {
        let call = ToolCall {
            id: "call_9".to_string(),
            name: "execute_python_code".to_string(),
            arguments: r#"{"code":"print(2)"}"#.to_string(),
        };
        let mut assistant = Message::new("Friday", MessageRole::Assistant, "");
        assistant.tool_calls = vec![call.clone()];
        let result = Message::tool_result(&call, "2");

        let formatted = OpenAiChatFormatter.format("", &[assistant, result]);
        assert_eq!(formatted[0]["tool_calls"][0]["id"], "call_9");
        assert_eq!(
            formatted[0]["tool_calls"][0]["function"]["name"],
            "execute_python_code"
        );
        assert_eq!(formatted[1]["role"], "tool");
        assert_eq!(formatted[1]["tool_call_id"], "call_9");
        assert_eq!(formatted[1]["content"], "2");
    }

    #[test]
    fn test_named_user_keeps_name() {
        let message = Message::new("alice", MessageRole::User, "hi");
        let formatted = OpenAiChatFormatter.format("", &[message]);
        assert_eq!(formatted[0]["name"], "alice");
    }
}
