//! Agent tools
//!
//! A toolkit is a set of named tool functions offered to the model with a
//! JSON schema each. Tool failures never abort a turn: they are reported to
//! the model as the tool's result.

pub mod error;
pub mod python;

use crate::chat::{Message, ToolCall};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

pub use error::ToolError;
pub use python::ExecutePythonCode;

/// A function the agent can call
#[async_trait]
pub trait ToolFunction: Send + Sync {
    /// Name the model uses to call the tool
    fn name(&self) -> &str;

    /// What the tool does, shown to the model
    fn description(&self) -> &str;

    /// JSON schema of the arguments object
    fn parameters(&self) -> Value;

    /// Run the tool
    async fn call(&self, arguments: Value) -> Result<String, ToolError>;
}

/// Registered tool functions, keyed by name
#[derive(Clone, Default)]
pub struct Toolkit {
    tools: BTreeMap<String, Arc<dyn ToolFunction>>,
}

impl Toolkit {
    /// Create an empty toolkit
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register_tool_function(&mut self, tool: Arc<dyn ToolFunction>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Whether no tools are registered
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Names of the registered tools
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// OpenAI `tools` array for the registered functions
    pub fn json_schemas(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.parameters(),
                    }
                })
            })
            .collect()
    }

    /// Execute `call` and wrap the outcome in a tool result message
    pub async fn execute(&self, call: &ToolCall) -> Message {
        let outcome = match self.tools.get(&call.name) {
            None => Err(ToolError::UnknownTool(call.name.clone())),
            Some(tool) => match parse_arguments(&call.arguments) {
                Ok(arguments) => tool.call(arguments).await,
                Err(e) => Err(e),
            },
        };

        let content = match outcome {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool call failed");
                format!("Error: {}", e)
            }
        };
        Message::tool_result(call, content)
    }
}

fn parse_arguments(raw: &str) -> Result<Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::MessageRole;

    struct Echo;

    #[async_trait]
    impl ToolFunction for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the text argument"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn call(&self, arguments: Value) -> Result<String, ToolError> {
            Ok(arguments["text"].as_str().unwrap_or_default().to_string())
        }
    }

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    #[test]
    fn test_schemas() {
        let mut toolkit = Toolkit::new();
        assert!(toolkit.is_empty());
        toolkit.register_tool_function(Arc::new(Echo));
        toolkit.register_tool_function(Arc::new(ExecutePythonCode::new(5)));

        assert_eq!(toolkit.names(), vec!["echo", "execute_python_code"]);
        let schemas = toolkit.json_schemas();
        assert_eq!(schemas[0]["function"]["name"], "echo");
        assert_eq!(schemas[1]["function"]["parameters"]["required"][0], "code");
    }

    #[tokio::test]
    async fn test_execute_success() {
        let mut toolkit = Toolkit::new();
        toolkit.register_tool_function(Arc::new(Echo));
        let result = toolkit.execute(&call("echo", r#"{"text":"pong"}"#)).await;
        assert_eq!(result.role, MessageRole::Tool);
        assert_eq!(result.content, "pong");
        assert_eq!(result.tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn test_failures_become_results() {
        let mut toolkit = Toolkit::new();
        toolkit.register_tool_function(Arc::new(Echo));

        let unknown = toolkit.execute(&call("missing", "{}")).await;
        assert!(unknown.content.starts_with("Error: Unknown tool"));

        let invalid = toolkit.execute(&call("echo", "{oops")).await;
        assert!(invalid.content.starts_with("Error: Invalid tool arguments"));
    }
}
