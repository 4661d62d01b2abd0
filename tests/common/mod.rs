//! Shared fakes for integration tests
#![allow(dead_code)]

use async_stream::try_stream;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use friday_agent::agent::model::{ModelChunk, ModelError, ModelRequest};
use friday_agent::agent::{
    Agent, AgentError, AgentFactory, AgentSpec, ModelClient, SessionHistoryMemory,
};
use friday_agent::chat::{Message, MessageRole};
use friday_agent::config::Config;
use friday_agent::runtime::{AppContext, Services};
use friday_agent::services::{
    AgentState, InMemorySessionHistoryService, InMemoryStateService, ServiceError,
    SessionHistoryService, StateService,
};
use futures_util::stream::{self, BoxStream, Stream};
use futures_util::StreamExt;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

/// Ordered record of collaborator calls
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| e.as_str() == event).count()
    }

    /// Events without their `:detail` suffix
    pub fn names(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|e| e.split(':').next().unwrap_or_default().to_string())
            .collect()
    }
}

/// In-memory state store that records every call
pub struct RecordingStateService {
    inner: InMemoryStateService,
    log: EventLog,
    pub fail_export: AtomicBool,
    pub fail_save: AtomicBool,
    pub saved: Mutex<Vec<AgentState>>,
}

impl RecordingStateService {
    pub fn new(log: EventLog) -> Self {
        Self {
            inner: InMemoryStateService::new(),
            log,
            fail_export: AtomicBool::new(false),
            fail_save: AtomicBool::new(false),
            saved: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl StateService for RecordingStateService {
    async fn start(&self) -> Result<(), ServiceError> {
        self.log.push("state.start");
        self.inner.start().await
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.log.push("state.stop");
        self.inner.stop().await
    }

    async fn export_state(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Option<AgentState>, ServiceError> {
        self.log.push("export");
        if self.fail_export.load(Ordering::SeqCst) {
            return Err(ServiceError::Io(std::io::Error::other("export failed")));
        }
        self.inner.export_state(session_id, user_id).await
    }

    async fn save_state(
        &self,
        user_id: &str,
        session_id: &str,
        state: AgentState,
    ) -> Result<(), ServiceError> {
        self.log.push("save");
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(ServiceError::Io(std::io::Error::other("save failed")));
        }
        self.saved.lock().unwrap().push(state.clone());
        self.inner.save_state(user_id, session_id, state).await
    }
}

/// In-memory session store that records lifecycle calls
pub struct RecordingSessionService {
    inner: InMemorySessionHistoryService,
    log: EventLog,
    pub fail_start: AtomicBool,
}

impl RecordingSessionService {
    pub fn new(log: EventLog) -> Self {
        Self {
            inner: InMemorySessionHistoryService::new(),
            log,
            fail_start: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl SessionHistoryService for RecordingSessionService {
    async fn start(&self) -> Result<(), ServiceError> {
        self.log.push("session.start");
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ServiceError::Io(std::io::Error::other("start failed")));
        }
        self.inner.start().await
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.log.push("session.stop");
        self.inner.stop().await
    }

    async fn append_messages(
        &self,
        user_id: &str,
        session_id: &str,
        messages: &[Message],
    ) -> Result<(), ServiceError> {
        self.inner
            .append_messages(user_id, session_id, messages)
            .await
    }

    async fn get_messages(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<Message>, ServiceError> {
        self.inner.get_messages(user_id, session_id).await
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<String>, ServiceError> {
        self.inner.list_sessions(user_id).await
    }
}

/// Model that must never be called
pub struct UnusedModel;

impl ModelClient for UnusedModel {
    fn model_name(&self) -> &str {
        "unused"
    }

    fn stream_chat(&self, _: ModelRequest) -> BoxStream<'static, Result<ModelChunk, ModelError>> {
        stream::once(async { Err(ModelError::Parse("model should not be called".into())) })
            .boxed()
    }
}

/// One step of a scripted agent reply
#[derive(Clone, Debug)]
pub enum Step {
    /// Emit an assistant message
    Say(&'static str),
    /// Wait, then emit an assistant message
    SlowSay(&'static str, u64),
    /// Emit another piece of the previous assistant message
    Continue(&'static str),
    /// Fail the run
    Fail(&'static str),
}

/// Builds [`FakeAgent`]s that follow a script
pub struct FakeAgentFactory {
    log: EventLog,
    script: Vec<Step>,
}

impl FakeAgentFactory {
    pub fn new(log: EventLog, script: Vec<Step>) -> Self {
        Self { log, script }
    }
}

impl AgentFactory for FakeAgentFactory {
    fn build(&self, spec: AgentSpec) -> Box<dyn Agent> {
        self.log.push("build");
        Box::new(FakeAgent {
            name: spec.name,
            memory: spec.memory,
            log: self.log.clone(),
            script: self.script.clone(),
            turns: 0,
        })
    }
}

/// Agent replaying a script; state is `{"turns": n}`
pub struct FakeAgent {
    name: String,
    memory: SessionHistoryMemory,
    log: EventLog,
    script: Vec<Step>,
    turns: u64,
}

impl Agent for FakeAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_state(&mut self, state: AgentState) -> Result<(), AgentError> {
        self.log.push(format!("load_state:{}", state.0));
        self.turns = state.0["turns"]
            .as_u64()
            .ok_or_else(|| AgentError::InvalidState("missing turns".into()))?;
        Ok(())
    }

    fn state(&self) -> AgentState {
        self.log.push("state");
        AgentState(json!({ "turns": self.turns }))
    }

    fn reply(&mut self, msgs: Vec<Message>) -> BoxStream<'_, Result<Message, AgentError>> {
        self.log.push("reply");
        self.turns += 1;
        scripted_reply(
            self.memory.clone(),
            self.name.clone(),
            self.script.clone(),
            msgs,
        )
        .boxed()
    }
}

fn scripted_reply(
    memory: SessionHistoryMemory,
    name: String,
    script: Vec<Step>,
    msgs: Vec<Message>,
) -> impl Stream<Item = Result<Message, AgentError>> + Send + 'static {
    try_stream! {
        memory.add(&msgs).await?;
        let mut current = Message::new(name.clone(), MessageRole::Assistant, "");
        for step in script {
            let piece = match step {
                Step::Say(text) => {
                    current = Message::new(name.clone(), MessageRole::Assistant, text);
                    current.clone()
                }
                Step::SlowSay(text, ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    current = Message::new(name.clone(), MessageRole::Assistant, text);
                    current.clone()
                }
                Step::Continue(text) => {
                    let mut piece = current.clone();
                    piece.content = text.to_string();
                    piece
                }
                Step::Fail(reason) => {
                    Err::<(), AgentError>(AgentError::Model(ModelError::Parse(reason.to_string())))?;
                    continue;
                }
            };
            memory.add(std::slice::from_ref(&piece)).await?;
            yield piece;
        }
    }
}

/// Fakes wired into an application context
pub struct Harness {
    pub log: EventLog,
    pub state: Arc<RecordingStateService>,
    pub session: Arc<RecordingSessionService>,
    pub services: Services,
}

impl Harness {
    pub fn new(script: Vec<Step>) -> Self {
        let log = EventLog::default();
        let state = Arc::new(RecordingStateService::new(log.clone()));
        let session = Arc::new(RecordingSessionService::new(log.clone()));
        let services = Services {
            state: state.clone(),
            session: session.clone(),
            model: Arc::new(UnusedModel),
            factory: Arc::new(FakeAgentFactory::new(log.clone(), script)),
        };
        Self {
            log,
            state,
            session,
            services,
        }
    }

    pub async fn context(&self, config: Config) -> Arc<AppContext> {
        AppContext::init(config, self.services.clone())
            .await
            .unwrap()
    }
}

/// Config suited to tests: short task delays
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.tasks.task_delay_secs = 1;
    config.tasks.atask_delay_secs = 1;
    config
}

pub fn agent_request(session_id: &str, user_id: &str, text: &str) -> Value {
    json!({
        "session_id": session_id,
        "user_id": user_id,
        "input": [{"role": "user", "content": text}],
    })
}

pub async fn post_json(router: &Router, uri: &str, body: Value) -> (StatusCode, String) {
    send(
        router,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

pub async fn get(router: &Router, uri: &str) -> (StatusCode, String) {
    send(
        router,
        Request::builder().uri(uri).body(Body::empty()).unwrap(),
    )
    .await
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}
