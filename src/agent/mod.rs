//! Agent runtime
//!
//! A reasoning/acting chat agent built from a model client, a system
//! prompt, a memory adapter bound to one session, a formatter and an
//! optional toolkit. Agents are created fresh for every turn by an
//! [`factory::AgentFactory`] and carry their cross-turn state in an opaque
//! [`AgentState`] blob.

pub mod factory;
pub mod formatter;
pub mod memory;
pub mod model;
pub mod react;
pub mod tools;

use crate::chat::Message;
use crate::services::{AgentState, ServiceError};
use futures_util::stream::BoxStream;
use thiserror::Error;

pub use factory::{AgentFactory, AgentSpec, ReActAgentFactory};
pub use formatter::OpenAiChatFormatter;
pub use memory::SessionHistoryMemory;
pub use model::{ModelClient, ModelError, OpenAiChatModel};
pub use react::ReActAgent;
pub use tools::Toolkit;

/// Errors raised while an agent runs
#[derive(Error, Debug)]
pub enum AgentError {
    /// The model provider failed
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Reading or writing session history failed
    #[error("Memory error: {0}")]
    Memory(#[from] ServiceError),

    /// A saved state blob could not be loaded
    #[error("Invalid agent state: {0}")]
    InvalidState(String),
}

/// A chat agent instance living for one turn
pub trait Agent: Send {
    /// Agent name, used as the sender name of its replies
    fn name(&self) -> &str;

    /// Restore state saved at the end of a previous turn
    fn load_state(&mut self, state: AgentState) -> Result<(), AgentError>;

    /// Snapshot of the agent's state for persistence
    fn state(&self) -> AgentState;

    /// Process incoming messages, yielding output messages as they are produced
    ///
    /// Streamed text arrives as several messages sharing one id, each holding
    /// the next piece of content.
    fn reply(&mut self, msgs: Vec<Message>) -> BoxStream<'_, Result<Message, AgentError>>;
}
