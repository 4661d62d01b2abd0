//! Application lifecycle and deployment tests

mod common;

use axum::http::StatusCode;
use common::{agent_request, post_json, test_config, Harness, Step};
use friday_agent::api::streaming::parse_sse_body;
use friday_agent::api::{build_router, default_registry};
use friday_agent::chat::Message;
use friday_agent::deploy::serve;
use friday_agent::runtime::{AgentRequest, AppContext};
use futures_util::StreamExt;
use std::sync::atomic::Ordering;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[tokio::test]
async fn test_init_starts_state_then_session() {
    let harness = Harness::new(Vec::new());
    let _ctx = harness.context(test_config()).await;
    assert_eq!(harness.log.events(), vec!["state.start", "session.start"]);
}

#[tokio::test]
async fn test_shutdown_stops_each_store_once() {
    let harness = Harness::new(Vec::new());
    let ctx = harness.context(test_config()).await;

    ctx.shutdown().await;
    ctx.shutdown().await;

    assert!(ctx.is_stopped());
    assert_eq!(harness.log.count("state.stop"), 1);
    assert_eq!(harness.log.count("session.stop"), 1);
}

#[tokio::test]
async fn test_failed_session_start_rolls_back_state() {
    let harness = Harness::new(Vec::new());
    harness.session.fail_start.store(true, Ordering::SeqCst);

    let result = AppContext::init(test_config(), harness.services.clone()).await;
    assert!(result.is_err());
    assert_eq!(
        harness.log.events(),
        vec!["state.start", "session.start", "state.stop"]
    );
}

#[tokio::test]
async fn test_requests_after_shutdown_are_unavailable() {
    let harness = Harness::new(vec![Step::Say("hi")]);
    let config = test_config();
    let registry = default_registry(&config.tasks);
    let ctx = harness.context(config).await;
    let router = build_router(ctx.clone(), registry).unwrap();
    ctx.shutdown().await;

    let (status, body) = post_json(&router, "/process", agent_request("s1", "u1", "hi")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body.contains("not started"));
}

#[tokio::test]
async fn test_serve_until_signal() {
    let harness = Harness::new(vec![Step::Say("hi")]);
    let config = test_config();
    let registry = default_registry(&config.tasks);
    let ctx = harness.context(config).await;
    let router = build_router(ctx.clone(), registry).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(serve(listener, ctx.clone(), router, async move {
        let _ = stop_rx.await;
    }));

    let health: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["name"], "Friday");
    assert!(!ctx.is_stopped());

    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
    assert!(ctx.is_stopped());
    assert_eq!(harness.log.count("state.stop"), 1);
    assert_eq!(harness.log.count("session.stop"), 1);
}

fn position(events: &[String], event: &str) -> usize {
    events
        .iter()
        .position(|e| e == event)
        .unwrap_or_else(|| panic!("{} not in {:?}", event, events))
}

#[tokio::test]
async fn test_stop_signal_lets_open_stream_finish() {
    let harness = Harness::new(vec![
        Step::SlowSay("one", 100),
        Step::SlowSay("two", 100),
        Step::SlowSay("three", 100),
    ]);
    let config = test_config();
    let registry = default_registry(&config.tasks);
    let ctx = harness.context(config).await;
    let router = build_router(ctx.clone(), registry).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(serve(listener, ctx.clone(), router, async move {
        let _ = stop_rx.await;
    }));

    let response = reqwest::Client::new()
        .post(format!("http://{}/process", addr))
        .json(&agent_request("s1", "u1", "hi"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    stop_tx.send(()).unwrap();
    let body = response.text().await.unwrap();
    let frames = parse_sse_body(&body);
    assert_eq!(frames.len(), 4, "unexpected frames {:?}", frames);
    assert_eq!(frames[3], "[DONE]");

    server.await.unwrap().unwrap();
    let events = harness.log.events();
    assert!(position(&events, "save") < position(&events, "state.stop"));
    assert_eq!(harness.log.count("state.stop"), 1);
    assert_eq!(harness.log.count("session.stop"), 1);
}

#[tokio::test]
async fn test_shutdown_waits_for_abandoned_turn_to_save() {
    let harness = Harness::new(vec![
        Step::Say("first"),
        Step::Say("second"),
        Step::SlowSay("third", 100),
    ]);
    let ctx = harness.context(test_config()).await;

    let request = AgentRequest::new("s1", "u1", vec![Message::user("hi")]);
    let mut stream = ctx.turns.run(request).await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.message.content, "first");
    drop(stream);

    ctx.shutdown().await;

    let events = harness.log.events();
    assert_eq!(harness.log.count("save"), 1);
    assert!(position(&events, "save") < position(&events, "state.stop"));
    assert_eq!(ctx.turns.running_count(), 0);
}
