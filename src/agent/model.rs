//! Chat model client
//!
//! HTTP client for OpenAI-compatible chat completion APIs (GLM, SiliconFlow,
//! and anything else speaking the same protocol). Streamed responses are
//! parsed from server-sent events into [`ModelChunk`]s.

use crate::config::ModelConfig;
use async_stream::try_stream;
use futures_util::stream::{BoxStream, Stream};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

/// Errors raised by the model client
#[derive(Error, Debug)]
pub enum ModelError {
    /// Transport-level failure
    #[error("HTTP request to model API failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("Model API returned error status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body as returned by the provider
        body: String,
    },

    /// The response could not be understood
    #[error("Failed to parse model response: {0}")]
    Parse(String),
}

/// One chat completion request
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    /// Provider-formatted messages
    pub messages: Vec<Value>,
    /// Tool schemas; empty when no tools are offered
    pub tools: Vec<Value>,
}

/// Incremental tool call fragment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallDelta {
    /// Position of the call within the reply, when the provider sends one
    pub index: Option<usize>,
    /// Call id, usually only on the first fragment
    pub id: Option<String>,
    /// Function name, usually only on the first fragment
    pub name: Option<String>,
    /// Next piece of the JSON arguments
    pub arguments: String,
}

/// A piece of model output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelChunk {
    /// Next piece of assistant text (may be empty)
    pub content: String,
    /// Tool call fragments carried by this piece
    pub tool_calls: Vec<ToolCallDelta>,
    /// Set on the closing piece
    pub finish_reason: Option<String>,
}

/// Produces chat completions
pub trait ModelClient: Send + Sync {
    /// Model name sent to the provider
    fn model_name(&self) -> &str;

    /// Run a completion, yielding output pieces in order
    ///
    /// Unary clients yield a single chunk holding the whole reply.
    fn stream_chat(&self, request: ModelRequest)
        -> BoxStream<'static, Result<ModelChunk, ModelError>>;
}

/// Client for OpenAI-compatible chat completion endpoints
pub struct OpenAiChatModel {
    client: reqwest::Client,
    model_name: String,
    api_key: Option<String>,
    base_url: String,
    stream: bool,
    extra_body: Map<String, Value>,
}

impl OpenAiChatModel {
    /// Build a client from configuration
    pub fn new(config: &ModelConfig) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model_name: config.model_name.clone(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            stream: config.stream,
            extra_body: config.extra_body.clone(),
        })
    }

    fn request_body(&self, request: &ModelRequest) -> Value {
        let mut body = Map::new();
        body.insert("model".to_string(), json!(self.model_name));
        body.insert("messages".to_string(), Value::Array(request.messages.clone()));
        body.insert("stream".to_string(), json!(self.stream));
        if !request.tools.is_empty() {
            body.insert("tools".to_string(), Value::Array(request.tools.clone()));
        }
        for (key, value) in &self.extra_body {
            body.insert(key.clone(), value.clone());
        }
        Value::Object(body)
    }
}

impl ModelClient for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn stream_chat(
        &self,
        request: ModelRequest,
    ) -> BoxStream<'static, Result<ModelChunk, ModelError>> {
        let body = self.request_body(&request);
        let url = format!("{}/chat/completions", self.base_url);
        let stream = self.stream;

        debug!(
            url = %url,
            model = %self.model_name,
            stream = stream,
            message_count = request.messages.len(),
            tool_count = request.tools.len(),
            "Calling chat completions API"
        );

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        Box::pin(completion_stream(builder, stream))
    }
}

fn completion_stream(
    builder: reqwest::RequestBuilder,
    stream: bool,
) -> impl Stream<Item = Result<ModelChunk, ModelError>> + Send + 'static {
    try_stream! {
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());
            error!(status_code = status.as_u16(), error_body = %body, "Model API returned error status");
            Err::<(), ModelError>(ModelError::Status { status: status.as_u16(), body })?;
        } else if stream {
            let mut bytes = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut chunk_count = 0usize;
            let mut done = false;
            'read: while let Some(piece) = bytes.next().await {
                buffer.extend_from_slice(&piece?);
                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    match parse_sse_line(&String::from_utf8_lossy(&line))? {
                        SseLine::Chunk(chunk) => {
                            chunk_count += 1;
                            yield chunk;
                        }
                        SseLine::Done => {
                            done = true;
                            break 'read;
                        }
                        SseLine::Skip => {}
                    }
                }
            }
            // Last event without a trailing newline
            if !done && !buffer.is_empty() {
                if let SseLine::Chunk(chunk) = parse_sse_line(&String::from_utf8_lossy(&buffer))? {
                    chunk_count += 1;
                    yield chunk;
                }
            }
            debug!(chunk_count = chunk_count, "Model stream closed");
        } else {
            let text = response.text().await?;
            yield parse_completion(&text)?;
        }
    }
}

/// Meaning of one line of an SSE body
#[derive(Debug, PartialEq)]
enum SseLine {
    Chunk(ModelChunk),
    Done,
    Skip,
}

#[derive(Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChunkChoice>,
}

#[derive(Deserialize)]
struct WireChunkChoice {
    #[serde(default)]
    delta: Option<WireDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Deserialize)]
struct WireToolCallDelta {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunction>,
}

#[derive(Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct WireCompletion {
    #[serde(default)]
    choices: Vec<WireCompletionChoice>,
}

#[derive(Deserialize)]
struct WireCompletionChoice {
    message: WireCompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireCompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

fn convert_tool_calls(calls: Option<Vec<WireToolCallDelta>>) -> Vec<ToolCallDelta> {
    calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            let (name, arguments) = match call.function {
                Some(function) => (function.name, function.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            ToolCallDelta {
                index: call.index,
                id: call.id,
                name,
                arguments,
            }
        })
        .collect()
}

fn parse_sse_line(line: &str) -> Result<SseLine, ModelError> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let wire: WireChunk = serde_json::from_str(data)
        .map_err(|e| ModelError::Parse(format!("{} - chunk: {}", e, data)))?;

    let mut chunk = ModelChunk::default();
    for choice in wire.choices {
        if let Some(delta) = choice.delta {
            if let Some(content) = delta.content {
                chunk.content.push_str(&content);
            }
            chunk.tool_calls.extend(convert_tool_calls(delta.tool_calls));
        }
        if choice.finish_reason.is_some() {
            chunk.finish_reason = choice.finish_reason;
        }
    }
    Ok(SseLine::Chunk(chunk))
}

fn parse_completion(body: &str) -> Result<ModelChunk, ModelError> {
    let wire: WireCompletion = serde_json::from_str(body)
        .map_err(|e| ModelError::Parse(format!("{} - response body: {}", e, body)))?;
    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::Parse("response contains no choices".to_string()))?;

    Ok(ModelChunk {
        content: choice.message.content.unwrap_or_default(),
        tool_calls: convert_tool_calls(choice.message.tool_calls),
        finish_reason: choice.finish_reason,
    })
}
