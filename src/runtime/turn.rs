//! Per-request agent lifecycle
//!
//! A turn runs as: state export, agent construction, hydration, streamed
//! execution, state save. Execution is driven by a spawned task that feeds
//! a bounded channel, so a caller going away never interrupts the run or
//! the save that closes it.

use super::locks::{SessionGuard, SessionLocks};
use super::request::{AgentRequest, OutputMessage};
use crate::agent::tools::ExecutePythonCode;
use crate::agent::{
    Agent, AgentFactory, AgentSpec, ModelClient, OpenAiChatFormatter, SessionHistoryMemory,
    Toolkit,
};
use crate::chat::Message;
use crate::config::{AppConfig, Config};
use crate::error::AppError;
use crate::services::{AgentState, SessionHistoryService, StateService};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, Instrument};

/// Items buffered between the running turn and its consumer
const TURN_CHANNEL_CAPACITY: usize = 64;

/// Output of one turn, in production order
pub type TurnStream = BoxStream<'static, Result<OutputMessage, AppError>>;

type TurnSender = mpsc::Sender<Result<OutputMessage, AppError>>;

/// Runs agent turns against the shared stores
pub struct TurnController {
    app: AppConfig,
    tool_timeout_secs: u64,
    model: Arc<dyn ModelClient>,
    factory: Arc<dyn AgentFactory>,
    state_service: Arc<dyn StateService>,
    session_service: Arc<dyn SessionHistoryService>,
    locks: Option<SessionLocks>,
    running: TaskTracker,
}

impl TurnController {
    /// Create a controller over the given collaborators
    pub fn new(
        config: &Config,
        model: Arc<dyn ModelClient>,
        factory: Arc<dyn AgentFactory>,
        state_service: Arc<dyn StateService>,
        session_service: Arc<dyn SessionHistoryService>,
    ) -> Self {
        let locks = config.app.serialize_sessions.then(SessionLocks::new);
        Self {
            app: config.app.clone(),
            tool_timeout_secs: config.tasks.tool_timeout_secs,
            model,
            factory,
            state_service,
            session_service,
            locks,
            running: TaskTracker::new(),
        }
    }

    /// Start a turn for `request`
    ///
    /// # Arguments
    /// * `request` - Session identity plus the turn's input messages
    ///
    /// # Returns
    /// A stream of the turn's output messages, the last one flagged `last`,
    /// with errors as items. Fails without starting anything when the
    /// request is invalid or the prior state cannot be read. Once a stream is
    /// returned the turn runs to completion and saves its state whether or
    /// not the stream is consumed.
    pub async fn run(&self, request: AgentRequest) -> Result<TurnStream, AppError> {
        request.validate_query()?;
        let AgentRequest {
            session_id,
            user_id,
            input,
            ..
        } = request;

        let guard = match &self.locks {
            Some(locks) => Some(locks.acquire(&user_id, &session_id).await),
            None => None,
        };

        let prior = self
            .state_service
            .export_state(&session_id, &user_id)
            .await
            .map_err(|e| {
                error!(
                    session_id = %session_id,
                    user_id = %user_id,
                    error = %e,
                    "Failed to export agent state"
                );
                AppError::from(e)
            })?;
        debug!(
            session_id = %session_id,
            user_id = %user_id,
            has_state = prior.is_some(),
            "Exported agent state"
        );

        let agent = self.factory.build(self.agent_spec(&session_id, &user_id));

        let (tx, rx) = mpsc::channel(TURN_CHANNEL_CAPACITY);
        let turn = Turn {
            state_service: self.state_service.clone(),
            session_id: session_id.clone(),
            user_id: user_id.clone(),
            _guard: guard,
        };
        let span = info_span!("turn", session_id = %session_id, user_id = %user_id);
        self.running
            .spawn(turn.drive(agent, prior, input, tx).instrument(span));

        Ok(ReceiverStream::new(rx).boxed())
    }

    /// Turns spawned and not yet finished
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Wait until every spawned turn has saved its state and ended
    pub async fn drain(&self) {
        self.running.close();
        self.running.wait().await;
    }

    fn agent_spec(&self, session_id: &str, user_id: &str) -> AgentSpec {
        let toolkit = self.app.enable_tools.then(|| {
            let mut toolkit = Toolkit::new();
            toolkit.register_tool_function(Arc::new(ExecutePythonCode::new(
                self.tool_timeout_secs,
            )));
            toolkit
        });

        AgentSpec {
            name: self.app.name.clone(),
            sys_prompt: self.app.sys_prompt.clone(),
            model: self.model.clone(),
            memory: SessionHistoryMemory::new(self.session_service.clone(), session_id, user_id),
            formatter: OpenAiChatFormatter,
            toolkit,
            max_iters: self.app.max_iters,
        }
    }
}

/// Everything a spawned turn owns
struct Turn {
    state_service: Arc<dyn StateService>,
    session_id: String,
    user_id: String,
    _guard: Option<SessionGuard>,
}

impl Turn {
    async fn drive(
        self,
        mut agent: Box<dyn Agent>,
        prior: Option<AgentState>,
        input: Vec<Message>,
        tx: TurnSender,
    ) {
        let mut out = Forwarder::new(tx);

        if let Some(state) = prior {
            if let Err(e) = agent.load_state(state) {
                error!(error = %e, "Failed to hydrate agent");
                out.fail(e.into()).await;
                return;
            }
        }

        info!(agent = %agent.name(), input_len = input.len(), "Turn started");
        let mut failure = None;
        {
            let mut replies = agent.reply(input);
            while let Some(item) = replies.next().await {
                match item {
                    Ok(message) => out.push(message).await,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }

        let failure = match failure {
            Some(e) if out.produced == 0 => {
                error!(error = %e, "Agent run failed before any output, state not saved");
                out.fail(e.into()).await;
                return;
            }
            Some(e) => {
                error!(error = %e, produced = out.produced, "Agent run failed");
                Some(e)
            }
            None => None,
        };

        let saved = self
            .state_service
            .save_state(&self.user_id, &self.session_id, agent.state())
            .await;

        match (saved, failure) {
            (Ok(()), None) => {
                out.finish().await;
                info!(produced = out.produced, "Turn completed");
            }
            (Ok(()), Some(e)) => out.fail(e.into()).await,
            (Err(e), _) => {
                error!(error = %e, "Failed to save agent state");
                out.fail(e.into()).await;
            }
        }

        if !out.open {
            info!(produced = out.produced, "Consumer left before the turn ended");
        }
    }
}

/// Holds back one message so the final one can be flagged `last`
struct Forwarder {
    tx: TurnSender,
    pending: Option<Message>,
    produced: usize,
    open: bool,
}

impl Forwarder {
    fn new(tx: TurnSender) -> Self {
        Self {
            tx,
            pending: None,
            produced: 0,
            open: true,
        }
    }

    async fn push(&mut self, message: Message) {
        self.produced += 1;
        if let Some(previous) = self.pending.replace(message) {
            self.send(Ok(OutputMessage {
                message: previous,
                last: false,
            }))
            .await;
        }
    }

    async fn finish(&mut self) {
        if let Some(message) = self.pending.take() {
            self.send(Ok(OutputMessage {
                message,
                last: true,
            }))
            .await;
        }
    }

    async fn fail(&mut self, error: AppError) {
        self.finish().await;
        self.send(Err(error)).await;
    }

    async fn send(&mut self, item: Result<OutputMessage, AppError>) {
        if !self.open {
            return;
        }
        if self.tx.send(item).await.is_err() {
            debug!("Turn consumer dropped, continuing without forwarding");
            self.open = false;
        }
    }
}
