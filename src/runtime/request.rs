//! Agent request and output types

use crate::chat::Message;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum total content length of one turn's input, in bytes
pub const MAX_INPUT_LENGTH: usize = 100_000;

fn default_stream() -> bool {
    true
}

/// One call into the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Session the turn belongs to
    #[serde(default)]
    pub session_id: String,
    /// Owner of the session
    #[serde(default)]
    pub user_id: String,
    /// Messages for this turn
    #[serde(default)]
    pub input: Vec<Message>,
    /// Stream the reply as it is produced
    #[serde(default = "default_stream")]
    pub stream: bool,
}

impl AgentRequest {
    /// Request for `user_id`/`session_id` carrying `input`
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        input: Vec<Message>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            input,
            stream: true,
        }
    }

    /// Check the session identity fields
    pub fn validate(&self) -> Result<(), AppError> {
        if self.session_id.trim().is_empty() {
            return Err(AppError::InvalidRequest(
                "session_id cannot be empty".to_string(),
            ));
        }
        if self.user_id.trim().is_empty() {
            return Err(AppError::InvalidRequest(
                "user_id cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Check a request headed for the agent
    pub fn validate_query(&self) -> Result<(), AppError> {
        self.validate()?;
        if self.input.is_empty() {
            return Err(AppError::InvalidRequest(
                "input cannot be empty".to_string(),
            ));
        }
        let total: usize = self.input.iter().map(|m| m.content.len()).sum();
        if total > MAX_INPUT_LENGTH {
            return Err(AppError::InvalidRequest(format!(
                "input exceeds maximum length of {} bytes",
                MAX_INPUT_LENGTH
            )));
        }
        Ok(())
    }
}

impl fmt::Display for AgentRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(
                f,
                "AgentRequest(session_id={}, user_id={})",
                self.session_id, self.user_id
            ),
        }
    }
}

/// One emitted item of a turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputMessage {
    /// Message produced by the agent
    pub message: Message,
    /// Whether this is the final item of the turn
    pub last: bool,
}
