//! Streaming utilities for Server-Sent Events (SSE)

use crate::error::AppError;
use axum::{
    body::Body,
    http::{header, StatusCode},
    response::Response,
};
use futures_util::{stream::Stream, StreamExt};

/// Final frame of an agent stream
pub const SSE_DONE_SIGNAL: &str = "[DONE]";

/// Prefix of an error frame
pub const SSE_ERROR_PREFIX: &str = "[ERROR]";

/// Encode `data` as one SSE event
///
/// Every line gets its own `data:` field so multi-line payloads survive.
pub fn sse_frame(data: &str) -> String {
    let mut frame = String::with_capacity(data.len() + 8);
    let mut lines = data.lines().peekable();
    if lines.peek().is_none() {
        frame.push_str("data: \n");
    }
    for line in lines {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

/// Data of an error frame
pub fn error_data(error: &AppError) -> String {
    format!("{} {}", SSE_ERROR_PREFIX, error)
}

/// Build an SSE response whose events are the items of `stream`
///
/// # Arguments
/// * `stream` - Event data, one item per event
///
/// # Returns
/// A `text/event-stream` response with each item framed by [`sse_frame`]
pub fn sse_response<S>(stream: S) -> Result<Response, AppError>
where
    S: Stream<Item = String> + Send + 'static,
{
    let sse_stream = stream.map(|data| Ok::<_, std::io::Error>(sse_frame(&data)));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(sse_stream))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build SSE response: {}", e)))
}

/// Data payloads of a collected SSE body, in order
pub fn parse_sse_body(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter(|event| !event.trim().is_empty())
        .map(|event| {
            event
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|value| value.strip_prefix(' ').unwrap_or(value))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_frame() {
        assert_eq!(sse_frame("[DONE]"), "data: [DONE]\n\n");
        assert_eq!(sse_frame("a\nb\n"), "data: a\ndata: b\n\n");
        assert_eq!(sse_frame(""), "data: \n\n");
    }

    #[test]
    fn test_parse_round_trip() {
        let body = format!("{}{}", sse_frame("one\ntwo"), sse_frame(SSE_DONE_SIGNAL));
        assert_eq!(parse_sse_body(&body), vec!["one\ntwo", "[DONE]"]);
    }
}
