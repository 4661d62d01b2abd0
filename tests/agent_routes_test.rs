//! Agent query, OpenAI-compatible and session history route tests

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{agent_request, get, post_json, send, test_config, Harness, Step};
use friday_agent::api::streaming::parse_sse_body;
use friday_agent::api::{build_router, default_registry};
use serde_json::{json, Value};

async fn router_with(script: Vec<Step>) -> (axum::Router, Harness) {
    let harness = Harness::new(script);
    let config = test_config();
    let registry = default_registry(&config.tasks);
    let ctx = harness.context(config).await;
    (build_router(ctx, registry).unwrap(), harness)
}

fn completion_request(body: Value, session: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/compatible-mode/v1/chat/completions")
        .header("content-type", "application/json");
    if let Some(session) = session {
        builder = builder.header("x-session-id", session);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn test_process_streams_output_messages() {
    let (router, _) = router_with(vec![Step::Say("Hel"), Step::Continue("lo")]).await;

    let (status, body) = post_json(&router, "/process", agent_request("s1", "u1", "hi")).await;
    assert_eq!(status, StatusCode::OK);

    let frames = parse_sse_body(&body);
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[2], "[DONE]");
    let first: Value = serde_json::from_str(&frames[0]).unwrap();
    let second: Value = serde_json::from_str(&frames[1]).unwrap();
    assert_eq!(first["message"]["content"], "Hel");
    assert_eq!(first["last"], false);
    assert_eq!(second["message"]["content"], "lo");
    assert_eq!(second["last"], true);
}

#[tokio::test]
async fn test_process_reports_errors_in_stream() {
    let (router, _) = router_with(vec![Step::Say("partial"), Step::Fail("provider down")]).await;

    let (_, body) = post_json(&router, "/process", agent_request("s1", "u1", "hi")).await;
    let frames = parse_sse_body(&body);
    assert_eq!(frames.len(), 3);
    assert!(frames[1].starts_with("[ERROR] "));
    assert!(frames[1].contains("provider down"));
    assert_eq!(frames[2], "[DONE]");
}

#[tokio::test]
async fn test_process_unary_merges_pieces() {
    let (router, _) = router_with(vec![Step::Say("Hel"), Step::Continue("lo")]).await;

    let mut request = agent_request("s1", "u1", "hi");
    request["stream"] = json!(false);
    let (status, body) = post_json(&router, "/process", request).await;
    assert_eq!(status, StatusCode::OK);

    let reply: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(reply["session_id"], "s1");
    assert_eq!(reply["output"].as_array().unwrap().len(), 1);
    assert_eq!(reply["output"][0]["content"], "Hello");
}

#[tokio::test]
async fn test_process_rejects_empty_input() {
    let (router, harness) = router_with(Vec::new()).await;
    let (status, body) = post_json(
        &router,
        "/process",
        json!({"session_id": "s1", "user_id": "u1", "input": []}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("input cannot be empty"));
    assert_eq!(harness.log.count("export"), 0);
}

#[tokio::test]
async fn test_chat_completions_stream() {
    let (router, _) = router_with(vec![Step::Say("Hel"), Step::Continue("lo")]).await;

    let request = completion_request(
        json!({
            "model": "agent-model",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}],
        }),
        Some("chat-1"),
    );
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);

    let frames = parse_sse_body(&body);
    assert_eq!(frames.len(), 4);
    assert_eq!(frames[3], "[DONE]");

    let chunks: Vec<Value> = frames[..3]
        .iter()
        .map(|f| serde_json::from_str(f).unwrap())
        .collect();
    assert_eq!(chunks[0]["object"], "chat.completion.chunk");
    assert_eq!(chunks[0]["model"], "agent-model");
    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
    assert_eq!(chunks[0]["choices"][0]["delta"]["content"], "Hel");
    assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "lo");
    assert_eq!(chunks[2]["choices"][0]["finish_reason"], "stop");
    assert_eq!(chunks[0]["id"], chunks[2]["id"]);
}

#[tokio::test]
async fn test_chat_completions_unary_uses_session_history() {
    let (router, _) = router_with(vec![Step::Say("Hello")]).await;

    let body = json!({
        "messages": [
            {"role": "system", "content": "ignored"},
            {"role": "user", "content": "first"},
            {"role": "assistant", "content": "earlier reply"},
            {"role": "user", "content": "second"},
        ],
        "user": "alice",
    });
    let (status, reply) = send(&router, completion_request(body, Some("chat-2"))).await;
    assert_eq!(status, StatusCode::OK);

    let reply: Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply["object"], "chat.completion");
    assert_eq!(reply["choices"][0]["message"]["content"], "Hello");
    assert_eq!(reply["choices"][0]["finish_reason"], "stop");

    let (status, history) = get(&router, "/sessions/alice/chat-2").await;
    assert_eq!(status, StatusCode::OK);
    let history: Value = serde_json::from_str(&history).unwrap();
    let contents: Vec<&str> = history["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["second", "Hello"]);
}

#[tokio::test]
async fn test_session_routes() {
    let (router, _) = router_with(vec![Step::Say("ok")]).await;
    for session in ["s2", "s1"] {
        let (status, _) = post_json(&router, "/process", agent_request(session, "u1", "hi")).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = get(&router, "/sessions/u1").await;
    assert_eq!(status, StatusCode::OK);
    let list: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(list["sessions"], json!(["s1", "s2"]));

    let (_, body) = get(&router, "/sessions/u1/s1").await;
    let history: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(history["messages"][0]["role"], "user");
    assert_eq!(history["messages"][1]["content"], "ok");

    let (_, body) = get(&router, "/sessions/nobody").await;
    let empty: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(empty["sessions"], json!([]));
}

#[tokio::test]
async fn test_health_and_root() {
    let (router, _) = router_with(Vec::new()).await;
    let (status, body) = get(&router, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Hello from Friday!"));

    let (_, body) = get(&router, "/health").await;
    let health: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["description"], "A helpful assistant");
}
