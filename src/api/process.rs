//! Agent query handler
//!
//! `POST /process` runs one turn. Streaming requests get an SSE stream of
//! output messages closed by `[DONE]`; non-streaming requests get the
//! merged messages as one JSON reply.

use super::streaming::{error_data, sse_response, SSE_DONE_SIGNAL};
use crate::chat::Message;
use crate::error::AppError;
use crate::runtime::{AgentRequest, AppContext, OutputMessage};
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Non-streaming reply of `/process`
#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    /// Session the turn ran in
    pub session_id: String,
    /// Owner of the session
    pub user_id: String,
    /// Output messages with streamed pieces merged
    pub output: Vec<Message>,
}

/// POST /process - Run one agent turn
pub async fn process(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<AgentRequest>,
) -> Result<Response, AppError> {
    info!(
        session_id = %request.session_id,
        user_id = %request.user_id,
        stream = request.stream,
        "Processing agent request"
    );
    let streaming = request.stream;
    let session_id = request.session_id.clone();
    let user_id = request.user_id.clone();
    let turn = ctx.turns.run(request).await?;

    if streaming {
        let frames = turn
            .map(|item| match item {
                Ok(output) => output_data(&output),
                Err(e) => error_data(&e),
            })
            .chain(stream::once(async { SSE_DONE_SIGNAL.to_string() }));
        return sse_response(frames);
    }

    let mut output: Vec<Message> = Vec::new();
    let mut turn = turn;
    while let Some(item) = turn.next().await {
        merge_piece(&mut output, item?.message);
    }
    Ok(Json(ProcessResponse {
        session_id,
        user_id,
        output,
    })
    .into_response())
}

fn output_data(output: &OutputMessage) -> String {
    serde_json::to_string(output)
        .unwrap_or_else(|e| error_data(&AppError::Internal(anyhow::Error::new(e))))
}

/// Fold a streamed piece into the message it belongs to
pub fn merge_piece(output: &mut Vec<Message>, piece: Message) {
    if let Some(existing) = output.iter_mut().rev().find(|m| m.id == piece.id) {
        existing.content.push_str(&piece.content);
        existing.tool_calls.extend(piece.tool_calls);
        return;
    }
    output.push(piece);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{MessageRole, ToolCall};

    #[test]
    fn test_merge_pieces_by_id() {
        let mut first = Message::new("Friday", MessageRole::Assistant, "Hel");
        let mut output = Vec::new();
        merge_piece(&mut output, first.clone());
        first.content = "lo".to_string();
        merge_piece(&mut output, first.clone());

        first.content.clear();
        first.tool_calls = vec![ToolCall {
            id: "call_0".into(),
            name: "execute_python_code".into(),
            arguments: "{}".into(),
        }];
        merge_piece(&mut output, first);
        merge_piece(&mut output, Message::new("tool", MessageRole::Tool, "done"));

        assert_eq!(output.len(), 2);
        assert_eq!(output[0].content, "Hello");
        assert_eq!(output[0].tool_calls.len(), 1);
        assert_eq!(output[1].content, "done");
    }
}
