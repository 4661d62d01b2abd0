//! Chat message model
//!
//! Messages exchanged between users, the agent and its tools.

pub mod models;

pub use models::{Message, MessageRole, ToolCall};
