//! Backing services
//!
//! The state store keeps one opaque agent state blob per session; the
//! session history store keeps the ordered message log per session. Both
//! are keyed by `(user_id, session_id)` and have an explicit start/stop
//! lifecycle driven by [`crate::runtime::AppContext`].

pub mod memory;
pub mod sqlite;

use crate::chat::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::{InMemorySessionHistoryService, InMemoryStateService};
pub use sqlite::{SqliteSessionHistoryService, SqliteStateService};

/// Opaque snapshot of an agent's internal state at the end of a turn
///
/// The service layer stores and returns it wholesale and never looks inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentState(pub serde_json::Value);

/// Errors raised by the state and session history stores
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The store was used before `start` or after `stop`
    #[error("{0} is not started")]
    NotStarted(&'static str),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error while preparing the store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persists agent state blobs keyed by `(user_id, session_id)`
#[async_trait]
pub trait StateService: Send + Sync {
    /// Bring the store up; must be called before any other method
    async fn start(&self) -> Result<(), ServiceError>;

    /// Shut the store down
    async fn stop(&self) -> Result<(), ServiceError>;

    /// Latest saved state for the session, `None` for a session never saved
    async fn export_state(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Option<AgentState>, ServiceError>;

    /// Replace the session's state
    async fn save_state(
        &self,
        user_id: &str,
        session_id: &str,
        state: AgentState,
    ) -> Result<(), ServiceError>;
}

/// Append-only message history keyed by `(user_id, session_id)`
#[async_trait]
pub trait SessionHistoryService: Send + Sync {
    /// Bring the store up; must be called before any other method
    async fn start(&self) -> Result<(), ServiceError>;

    /// Shut the store down
    async fn stop(&self) -> Result<(), ServiceError>;

    /// Append messages to the end of the session's history
    async fn append_messages(
        &self,
        user_id: &str,
        session_id: &str,
        messages: &[Message],
    ) -> Result<(), ServiceError>;

    /// Full history of the session in append order (empty if unknown)
    async fn get_messages(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<Message>, ServiceError>;

    /// Ids of the sessions a user has history for
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<String>, ServiceError>;
}
