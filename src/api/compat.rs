//! OpenAI-compatible chat completions surface
//!
//! Lets OpenAI SDK clients talk to the agent at
//! `/compatible-mode/v1/chat/completions`. The session is taken from the
//! `x-session-id` header; history lives server side, so with a session only
//! the user messages after the last assistant message become turn input.

use super::process::merge_piece;
use super::streaming::{error_data, sse_response, SSE_DONE_SIGNAL};
use crate::chat::{Message, MessageRole};
use crate::error::AppError;
use crate::runtime::{AgentRequest, AppContext, TurnStream};
use async_stream::stream;
use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Header carrying the session id
pub const SESSION_HEADER: &str = "x-session-id";

/// User id used when the request names none
pub const ANONYMOUS_USER: &str = "anonymous";

/// Model name reported when the request names none
pub const DEFAULT_MODEL: &str = "agent-model";

/// Chat completion request body
#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    /// Requested model name, echoed back
    #[serde(default)]
    pub model: Option<String>,
    /// Conversation so far
    #[serde(default)]
    pub messages: Vec<CompatMessage>,
    /// Stream the reply as chunks
    #[serde(default)]
    pub stream: bool,
    /// End-user id
    #[serde(default)]
    pub user: Option<String>,
}

/// Message in a chat completion request
#[derive(Debug, Deserialize)]
pub struct CompatMessage {
    /// Sender role
    pub role: String,
    /// Text, or an array of content parts
    #[serde(default)]
    pub content: Value,
    /// Optional sender name
    #[serde(default)]
    pub name: Option<String>,
}

impl CompatMessage {
    fn text(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            Value::Array(parts) => parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(""),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    fn into_message(self) -> Message {
        let role = MessageRole::from(self.role.as_str());
        let content = self.text();
        let name = self.name.unwrap_or_else(|| role.as_str().to_string());
        Message::new(name, role, content)
    }
}

/// Turn input selected from the client's message list
pub fn select_input(messages: Vec<CompatMessage>, has_session: bool) -> Vec<Message> {
    let messages: Vec<CompatMessage> = messages
        .into_iter()
        .filter(|m| m.role != MessageRole::System.as_str())
        .collect();

    let start = if has_session {
        messages
            .iter()
            .rposition(|m| m.role == MessageRole::Assistant.as_str())
            .map(|i| i + 1)
            .unwrap_or(0)
    } else {
        0
    };

    messages
        .into_iter()
        .skip(start)
        .map(CompatMessage::into_message)
        .collect()
}

struct Completion {
    id: String,
    created: i64,
    model: String,
}

impl Completion {
    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> Value {
        json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        })
    }

    fn unary(&self, content: String) -> Value {
        json!({
            "id": self.id,
            "object": "chat.completion",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop",
            }],
        })
    }
}

/// POST /compatible-mode/v1/chat/completions
pub async fn chat_completions(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(body): Json<ChatCompletionRequest>,
) -> Result<Response, AppError> {
    let header_session = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let has_session = header_session.is_some();
    let session_id = header_session.unwrap_or_else(|| Uuid::new_v4().to_string());
    let user_id = body
        .user
        .clone()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| ANONYMOUS_USER.to_string());

    let completion = Completion {
        id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
        created: Utc::now().timestamp(),
        model: body.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
    };
    let streaming = body.stream;
    let input = select_input(body.messages, has_session);
    info!(
        session_id = %session_id,
        user_id = %user_id,
        stream = streaming,
        input_len = input.len(),
        "Chat completion request"
    );

    let request = AgentRequest::new(session_id.clone(), user_id, input);
    let turn = ctx.turns.run(request).await?;

    let mut response = if streaming {
        sse_response(completion_frames(completion, turn))?
    } else {
        let mut output = Vec::new();
        let mut turn = turn;
        while let Some(item) = turn.next().await {
            merge_piece(&mut output, item?.message);
        }
        let content = output
            .into_iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .map(|m| m.content)
            .collect::<Vec<_>>()
            .join("");
        Json(completion.unary(content)).into_response()
    };

    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    Ok(response)
}

fn completion_frames(
    completion: Completion,
    mut turn: TurnStream,
) -> impl futures_util::Stream<Item = String> + Send + 'static {
    stream! {
        let mut failed = false;
        let mut first = true;
        while let Some(item) = turn.next().await {
            match item {
                Ok(output) => {
                    let message = output.message;
                    if message.role != MessageRole::Assistant || message.content.is_empty() {
                        continue;
                    }
                    let delta = if first {
                        json!({"role": "assistant", "content": message.content})
                    } else {
                        json!({"content": message.content})
                    };
                    first = false;
                    yield completion.chunk(delta, None).to_string();
                }
                Err(e) => {
                    yield error_data(&e);
                    failed = true;
                    break;
                }
            }
        }
        if !failed {
            yield completion.chunk(json!({}), Some("stop")).to_string();
        }
        yield SSE_DONE_SIGNAL.to_string();
    }
}
