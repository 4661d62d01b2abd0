//! Application lifecycle
//!
//! [`AppContext`] owns the process-wide collaborators. It only exists once
//! both stores are started, and every handler receives it as router state,
//! so no request can reach a store before `init` completed.

use super::tasks::TaskQueue;
use super::turn::TurnController;
use crate::agent::{AgentFactory, ModelClient, OpenAiChatModel, ReActAgentFactory};
use crate::config::{Config, StoreKind};
use crate::services::{
    InMemorySessionHistoryService, InMemoryStateService, SessionHistoryService,
    SqliteSessionHistoryService, SqliteStateService, StateService,
};
use anyhow::Context;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Collaborators wired into the application
#[derive(Clone)]
pub struct Services {
    /// Agent state store
    pub state: Arc<dyn StateService>,
    /// Session history store
    pub session: Arc<dyn SessionHistoryService>,
    /// Chat model client
    pub model: Arc<dyn ModelClient>,
    /// Agent factory used for every turn
    pub factory: Arc<dyn AgentFactory>,
}

impl Services {
    /// Default collaborators for `config`
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let (state, session): (Arc<dyn StateService>, Arc<dyn SessionHistoryService>) =
            match config.storage.kind {
                StoreKind::Memory => (
                    Arc::new(InMemoryStateService::new()),
                    Arc::new(InMemorySessionHistoryService::new()),
                ),
                StoreKind::Sqlite => (
                    Arc::new(SqliteStateService::new(&config.storage.db_path)),
                    Arc::new(SqliteSessionHistoryService::new(&config.storage.db_path)),
                ),
            };

        let model = OpenAiChatModel::new(&config.model).context("Failed to build model client")?;
        if config.model.api_key.is_none() {
            warn!(
                provider = ?config.model.provider,
                "No API key configured for the model provider"
            );
        }

        Ok(Self {
            state,
            session,
            model: Arc::new(model),
            factory: Arc::new(ReActAgentFactory),
        })
    }
}

/// Shared application state handed to every handler
pub struct AppContext {
    /// Loaded configuration
    pub config: Config,
    /// Agent state store
    pub state_service: Arc<dyn StateService>,
    /// Session history store
    pub session_service: Arc<dyn SessionHistoryService>,
    /// Turn runner
    pub turns: TurnController,
    /// Background task queues
    pub tasks: TaskQueue,
    stopped: AtomicBool,
}

impl AppContext {
    /// Start the stores and assemble the context
    ///
    /// The state store starts first, then the session store. If the session
    /// store fails to start, the state store is stopped again.
    pub async fn init(config: Config, services: Services) -> anyhow::Result<Arc<Self>> {
        services
            .state
            .start()
            .await
            .context("Failed to start state service")?;
        info!("State service started");

        if let Err(e) = services.session.start().await {
            error!(error = %e, "Failed to start session history service");
            if let Err(stop_err) = services.state.stop().await {
                warn!(error = %stop_err, "Failed to stop state service after startup failure");
            }
            return Err(anyhow::Error::new(e).context("Failed to start session history service"));
        }
        info!("Session history service started");

        let turns = TurnController::new(
            &config,
            services.model,
            services.factory,
            services.state.clone(),
            services.session.clone(),
        );

        let tasks = TaskQueue::default().with_retention(
            Duration::from_secs(config.tasks.task_retention_secs),
            config.tasks.max_finished_tasks,
        );

        Ok(Arc::new(Self {
            config,
            state_service: services.state,
            session_service: services.session,
            turns,
            tasks,
            stopped: AtomicBool::new(false),
        }))
    }

    /// Whether `shutdown` already ran
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stop both stores; later calls do nothing
    ///
    /// Running turns finish and save before the stores stop.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let running = self.turns.running_count();
        if running > 0 {
            info!(turns = running, "Waiting for running turns to finish");
        }
        self.turns.drain().await;

        let abandoned = self.tasks.active_count();
        if abandoned > 0 {
            warn!(tasks = abandoned, "Abandoning unfinished background tasks");
        }

        if let Err(e) = self.state_service.stop().await {
            error!(error = %e, "Failed to stop state service");
        }
        if let Err(e) = self.session_service.stop().await {
            error!(error = %e, "Failed to stop session history service");
        }
        info!("Application services stopped");
    }
}
