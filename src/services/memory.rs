//! In-memory stores
//!
//! Process-local maps guarded by `tokio::sync::RwLock`. Everything is lost
//! on restart.

use super::{AgentState, ServiceError, SessionHistoryService, StateService};
use crate::chat::Message;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

type SessionKey = (String, String);

fn key(user_id: &str, session_id: &str) -> SessionKey {
    (user_id.to_string(), session_id.to_string())
}

/// In-memory agent state store
#[derive(Default)]
pub struct InMemoryStateService {
    running: AtomicBool,
    states: RwLock<HashMap<SessionKey, AgentState>>,
}

impl InMemoryStateService {
    /// Create a stopped store
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_running(&self) -> Result<(), ServiceError> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ServiceError::NotStarted("state service"))
        }
    }
}

#[async_trait]
impl StateService for InMemoryStateService {
    async fn start(&self) -> Result<(), ServiceError> {
        self.running.store(true, Ordering::SeqCst);
        debug!("In-memory state service started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.running.store(false, Ordering::SeqCst);
        self.states.write().await.clear();
        debug!("In-memory state service stopped");
        Ok(())
    }

    async fn export_state(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Option<AgentState>, ServiceError> {
        self.ensure_running()?;
        let states = self.states.read().await;
        Ok(states.get(&key(user_id, session_id)).cloned())
    }

    async fn save_state(
        &self,
        user_id: &str,
        session_id: &str,
        state: AgentState,
    ) -> Result<(), ServiceError> {
        self.ensure_running()?;
        self.states
            .write()
            .await
            .insert(key(user_id, session_id), state);
        Ok(())
    }
}

/// In-memory session history store
#[derive(Default)]
pub struct InMemorySessionHistoryService {
    running: AtomicBool,
    sessions: RwLock<HashMap<SessionKey, Vec<Message>>>,
}

impl InMemorySessionHistoryService {
    /// Create a stopped store
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_running(&self) -> Result<(), ServiceError> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ServiceError::NotStarted("session history service"))
        }
    }
}

#[async_trait]
impl SessionHistoryService for InMemorySessionHistoryService {
    async fn start(&self) -> Result<(), ServiceError> {
        self.running.store(true, Ordering::SeqCst);
        debug!("In-memory session history service started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.running.store(false, Ordering::SeqCst);
        self.sessions.write().await.clear();
        debug!("In-memory session history service stopped");
        Ok(())
    }

    async fn append_messages(
        &self,
        user_id: &str,
        session_id: &str,
        messages: &[Message],
    ) -> Result<(), ServiceError> {
        self.ensure_running()?;
        self.sessions
            .write()
            .await
            .entry(key(user_id, session_id))
            .or_default()
            .extend_from_slice(messages);
        Ok(())
    }

    async fn get_messages(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<Message>, ServiceError> {
        self.ensure_running()?;
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(&key(user_id, session_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<String>, ServiceError> {
        self.ensure_running()?;
        let sessions = self.sessions.read().await;
        let mut ids: Vec<String> = sessions
            .keys()
            .filter(|(user, _)| user == user_id)
            .map(|(_, session)| session.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
