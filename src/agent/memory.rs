//! Session history memory
//!
//! Agent memory backed by the session history store, scoped to one
//! `(user_id, session_id)` pair.

use crate::chat::Message;
use crate::services::{ServiceError, SessionHistoryService};
use std::sync::Arc;

/// Memory adapter bound to one session
#[derive(Clone)]
pub struct SessionHistoryMemory {
    service: Arc<dyn SessionHistoryService>,
    session_id: String,
    user_id: String,
}

impl SessionHistoryMemory {
    /// Bind `service` to the given session
    pub fn new(
        service: Arc<dyn SessionHistoryService>,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            service,
            session_id: session_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Session this memory is bound to
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// User this memory is bound to
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Append messages to the session history
    pub async fn add(&self, messages: &[Message]) -> Result<(), ServiceError> {
        if messages.is_empty() {
            return Ok(());
        }
        self.service
            .append_messages(&self.user_id, &self.session_id, messages)
            .await
    }

    /// Whole session history in order
    pub async fn get(&self) -> Result<Vec<Message>, ServiceError> {
        self.service
            .get_messages(&self.user_id, &self.session_id)
            .await
    }
}
