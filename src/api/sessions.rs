//! Session history read handlers

use crate::chat::Message;
use crate::error::AppError;
use crate::runtime::AppContext;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

/// Sessions of one user
#[derive(Debug, Serialize)]
pub struct SessionList {
    /// Owner of the sessions
    pub user_id: String,
    /// Session ids, sorted
    pub sessions: Vec<String>,
}

/// History of one session
#[derive(Debug, Serialize)]
pub struct SessionHistory {
    /// Owner of the session
    pub user_id: String,
    /// Session id
    pub session_id: String,
    /// Messages in order
    pub messages: Vec<Message>,
}

/// GET /sessions/:user_id - List a user's sessions
pub async fn list_sessions(
    State(ctx): State<Arc<AppContext>>,
    Path(user_id): Path<String>,
) -> Result<Json<SessionList>, AppError> {
    let sessions = ctx.session_service.list_sessions(&user_id).await?;
    Ok(Json(SessionList { user_id, sessions }))
}

/// GET /sessions/:user_id/:session_id - Read a session's history
pub async fn get_session(
    State(ctx): State<Arc<AppContext>>,
    Path((user_id, session_id)): Path<(String, String)>,
) -> Result<Json<SessionHistory>, AppError> {
    let messages = ctx
        .session_service
        .get_messages(&user_id, &session_id)
        .await?;
    Ok(Json(SessionHistory {
        user_id,
        session_id,
        messages,
    }))
}
