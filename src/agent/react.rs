//! Reasoning/acting agent
//!
//! Each turn: store the incoming messages, then repeatedly ask the model
//! for a reply over the whole session history, executing any requested
//! tool calls, until the model answers without tools or `max_iters` is
//! reached.

use super::factory::AgentSpec;
use super::formatter::OpenAiChatFormatter;
use super::memory::SessionHistoryMemory;
use super::model::{ModelClient, ModelRequest, ToolCallDelta};
use super::tools::Toolkit;
use super::{Agent, AgentError};
use crate::chat::{Message, MessageRole, ToolCall};
use crate::services::AgentState;
use async_stream::try_stream;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Persisted part of a [`ReActAgent`]
#[derive(Debug, Default, Deserialize)]
struct ReActState {
    /// Completed turns in this session
    #[serde(default)]
    turns: u64,
}

/// Chat agent with an optional toolkit
pub struct ReActAgent {
    name: String,
    sys_prompt: String,
    model: Arc<dyn ModelClient>,
    memory: SessionHistoryMemory,
    formatter: OpenAiChatFormatter,
    toolkit: Option<Toolkit>,
    max_iters: usize,
    turns: u64,
}

impl ReActAgent {
    /// Build an agent from its parts
    pub fn new(spec: AgentSpec) -> Self {
        Self {
            name: spec.name,
            sys_prompt: spec.sys_prompt,
            model: spec.model,
            memory: spec.memory,
            formatter: spec.formatter,
            toolkit: spec.toolkit.filter(|toolkit| !toolkit.is_empty()),
            max_iters: spec.max_iters.max(1),
            turns: 0,
        }
    }

    /// Completed turns, including those restored from state
    pub fn turns(&self) -> u64 {
        self.turns
    }

    fn run_turn(
        &mut self,
        msgs: Vec<Message>,
    ) -> impl Stream<Item = Result<Message, AgentError>> + Send + '_ {
        try_stream! {
            self.memory.add(&msgs).await?;
            let tools = self
                .toolkit
                .as_ref()
                .map(Toolkit::json_schemas)
                .unwrap_or_default();

            let mut answered = false;
            for iteration in 0..self.max_iters {
                let history = self.memory.get().await?;
                let request = ModelRequest {
                    messages: self.formatter.format(&self.sys_prompt, &history),
                    tools: tools.clone(),
                };
                debug!(
                    session_id = %self.memory.session_id(),
                    user_id = %self.memory.user_id(),
                    model = %self.model.model_name(),
                    iteration = iteration,
                    history_len = history.len(),
                    "Requesting model reply"
                );

                let mut reply = Message::new(self.name.clone(), MessageRole::Assistant, "");
                let mut calls = ToolCallAccumulator::default();
                let mut chunks = self.model.stream_chat(request);
                while let Some(chunk) = chunks.next().await {
                    let chunk = chunk?;
                    calls.extend(chunk.tool_calls);
                    if !chunk.content.is_empty() {
                        reply.content.push_str(&chunk.content);
                        yield content_piece(&reply, chunk.content);
                    }
                }
                reply.tool_calls = calls.finish();
                self.memory.add(std::slice::from_ref(&reply)).await?;

                let toolkit = match self.toolkit.as_ref() {
                    Some(toolkit) if !reply.tool_calls.is_empty() => toolkit,
                    _ => {
                        answered = true;
                        break;
                    }
                };

                let mut announcement = content_piece(&reply, String::new());
                announcement.tool_calls = reply.tool_calls.clone();
                yield announcement;

                for call in &reply.tool_calls {
                    let result = toolkit.execute(call).await;
                    self.memory.add(std::slice::from_ref(&result)).await?;
                    yield result;
                }
            }

            if !answered {
                warn!(
                    session_id = %self.memory.session_id(),
                    max_iters = self.max_iters,
                    "Reached max iterations without a final answer"
                );
            }
            self.turns += 1;
        }
    }
}

/// Merges streamed tool call fragments by position
#[derive(Default)]
struct ToolCallAccumulator {
    calls: BTreeMap<usize, ToolCall>,
}

impl ToolCallAccumulator {
    /// Slot of a fragment; without an index a new id opens the next call
    /// and a fragment without id continues the latest one
    fn slot(&self, delta: &ToolCallDelta) -> usize {
        if let Some(index) = delta.index {
            return index;
        }
        let next = self.calls.keys().next_back().map_or(0, |last| last + 1);
        match delta.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => self
                .calls
                .iter()
                .find(|(_, call)| call.id == id)
                .map_or(next, |(index, _)| *index),
            None => next.saturating_sub(1),
        }
    }

    fn extend(&mut self, deltas: Vec<ToolCallDelta>) {
        for delta in deltas {
            let slot = self.slot(&delta);
            let call = self.calls.entry(slot).or_insert_with(|| ToolCall {
                id: String::new(),
                name: String::new(),
                arguments: String::new(),
            });
            if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
                call.id = id;
            }
            if let Some(name) = delta.name {
                call.name.push_str(&name);
            }
            call.arguments.push_str(&delta.arguments);
        }
    }

    fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .map(|(index, mut call)| {
                if call.id.is_empty() {
                    call.id = format!("call_{}", index);
                }
                call
            })
            .collect()
    }
}

/// Streamed piece of `reply`
fn content_piece(reply: &Message, content: String) -> Message {
    Message {
        id: reply.id.clone(),
        name: reply.name.clone(),
        role: reply.role,
        content,
        tool_calls: Vec::new(),
        tool_call_id: None,
        created_at: reply.created_at,
    }
}

impl Agent for ReActAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_state(&mut self, state: AgentState) -> Result<(), AgentError> {
        let restored: ReActState = serde_json::from_value(state.0)
            .map_err(|e| AgentError::InvalidState(e.to_string()))?;
        self.turns = restored.turns;
        Ok(())
    }

    fn state(&self) -> AgentState {
        AgentState(json!({
            "name": self.name,
            "turns": self.turns,
        }))
    }

    fn reply(&mut self, msgs: Vec<Message>) -> BoxStream<'_, Result<Message, AgentError>> {
        Box::pin(self.run_turn(msgs))
    }
}
