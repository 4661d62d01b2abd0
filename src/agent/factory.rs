//! Agent factory
//!
//! The turn controller never constructs agents directly; it hands the
//! injected parts to an [`AgentFactory`] so tests can substitute their own.

use super::formatter::OpenAiChatFormatter;
use super::memory::SessionHistoryMemory;
use super::model::ModelClient;
use super::react::ReActAgent;
use super::tools::Toolkit;
use super::Agent;
use std::sync::Arc;

/// Everything an agent needs for one turn
pub struct AgentSpec {
    /// Agent name
    pub name: String,
    /// System prompt
    pub sys_prompt: String,
    /// Model client
    pub model: Arc<dyn ModelClient>,
    /// Memory bound to the turn's session
    pub memory: SessionHistoryMemory,
    /// Message formatter
    pub formatter: OpenAiChatFormatter,
    /// Tools offered to the model, if any
    pub toolkit: Option<Toolkit>,
    /// Upper bound on reasoning/acting iterations
    pub max_iters: usize,
}

/// Creates a fresh agent for each turn
pub trait AgentFactory: Send + Sync {
    /// Build an agent from its parts
    fn build(&self, spec: AgentSpec) -> Box<dyn Agent>;
}

/// Builds [`ReActAgent`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct ReActAgentFactory;

impl AgentFactory for ReActAgentFactory {
    fn build(&self, spec: AgentSpec) -> Box<dyn Agent> {
        Box::new(ReActAgent::new(spec))
    }
}
