//! Endpoint registry
//!
//! User-defined endpoints are declared in an explicit table, validated once
//! at startup and then mounted on the router. Each entry says how its
//! handler runs: on the blocking pool, on the async runtime, as a stream, or
//! as a background task.

use super::streaming::sse_response;
use crate::error::AppError;
use crate::runtime::{AgentRequest, AppContext, TaskQueue, TaskRecord, TaskWork};
use axum::{
    extract::{Path, State},
    routing::{get, post, MethodRouter},
    Json, Router,
};
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

/// Items buffered between a stream handler and the response body
const STREAM_CHANNEL_CAPACITY: usize = 16;

/// Routes owned by the application itself
pub const RESERVED_ROUTES: &[&str] = &[
    "/",
    "/health",
    "/process",
    "/sessions",
    "/compatible-mode/v1/chat/completions",
];

/// Handler run to completion on the blocking pool
pub type SyncHandler = Arc<dyn Fn(AgentRequest) -> Result<Value, AppError> + Send + Sync>;

/// Handler run on the async runtime
pub type AsyncHandler =
    Arc<dyn Fn(AgentRequest) -> BoxFuture<'static, Result<Value, AppError>> + Send + Sync>;

/// Handler producing chunks from a blocking iterator
pub type StreamSyncHandler =
    Arc<dyn Fn(AgentRequest) -> Box<dyn Iterator<Item = String> + Send> + Send + Sync>;

/// Handler producing chunks from an async stream
pub type StreamAsyncHandler =
    Arc<dyn Fn(AgentRequest) -> BoxStream<'static, String> + Send + Sync>;

/// How a background task executes
#[derive(Clone)]
pub enum TaskKind {
    /// On the blocking pool
    Blocking(SyncHandler),
    /// On the async runtime
    Cooperative(AsyncHandler),
}

/// How an endpoint executes and replies
#[derive(Clone)]
pub enum EndpointKind {
    /// JSON reply computed on the blocking pool
    Sync(SyncHandler),
    /// JSON reply computed asynchronously
    Async(AsyncHandler),
    /// SSE reply fed by a blocking iterator
    StreamSync(StreamSyncHandler),
    /// SSE reply fed by an async stream
    StreamAsync(StreamAsyncHandler),
    /// Submitted to a named task queue; the reply only carries the task id
    Task {
        /// Queue to submit to
        queue: String,
        /// How the task runs
        kind: TaskKind,
    },
}

impl EndpointKind {
    fn label(&self) -> &'static str {
        match self {
            EndpointKind::Sync(_) => "sync",
            EndpointKind::Async(_) => "async",
            EndpointKind::StreamSync(_) => "stream_sync",
            EndpointKind::StreamAsync(_) => "stream_async",
            EndpointKind::Task { .. } => "task",
        }
    }
}

/// One registered endpoint
#[derive(Clone)]
pub struct Endpoint {
    /// Route path
    pub path: String,
    /// Execution kind and handler
    pub kind: EndpointKind,
}

/// Errors found while validating the endpoint table
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// Path is malformed
    #[error("Invalid endpoint path {path:?}: {reason}")]
    InvalidPath {
        /// Offending path
        path: String,
        /// What is wrong with it
        reason: &'static str,
    },

    /// Path registered twice
    #[error("Duplicate endpoint path: {0}")]
    Duplicate(String),

    /// Path collides with a built-in route
    #[error("Endpoint path {0} is reserved")]
    Reserved(String),

    /// Task endpoint names a queue that does not exist
    #[error("Endpoint {path} uses unknown task queue {queue}")]
    UnknownQueue {
        /// Endpoint path
        path: String,
        /// Queue name
        queue: String,
    },

    /// Path overlaps the status route of a task endpoint
    #[error("Endpoint path {path} overlaps task endpoint {task}")]
    Overlap {
        /// Endpoint path
        path: String,
        /// Task endpoint it overlaps
        task: String,
    },
}

/// Ordered table of user-defined endpoints
#[derive(Clone, Default)]
pub struct EndpointRegistry {
    endpoints: Vec<Endpoint>,
}

impl EndpointRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint
    pub fn register(&mut self, path: impl Into<String>, kind: EndpointKind) -> &mut Self {
        self.endpoints.push(Endpoint {
            path: path.into(),
            kind,
        });
        self
    }

    /// Add a JSON endpoint run on the blocking pool
    pub fn sync<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(AgentRequest) -> Result<Value, AppError> + Send + Sync + 'static,
    {
        self.register(path, EndpointKind::Sync(Arc::new(handler)))
    }

    /// Add an async JSON endpoint
    pub fn asynchronous<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(AgentRequest) -> BoxFuture<'static, Result<Value, AppError>> + Send + Sync + 'static,
    {
        self.register(path, EndpointKind::Async(Arc::new(handler)))
    }

    /// Add a streaming endpoint fed by a blocking iterator
    pub fn stream_sync<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(AgentRequest) -> Box<dyn Iterator<Item = String> + Send> + Send + Sync + 'static,
    {
        self.register(path, EndpointKind::StreamSync(Arc::new(handler)))
    }

    /// Add a streaming endpoint fed by an async stream
    pub fn stream_async<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(AgentRequest) -> BoxStream<'static, String> + Send + Sync + 'static,
    {
        self.register(path, EndpointKind::StreamAsync(Arc::new(handler)))
    }

    /// Add a background task endpoint
    pub fn task(&mut self, path: &str, queue: &str, kind: TaskKind) -> &mut Self {
        self.register(
            path,
            EndpointKind::Task {
                queue: queue.to_string(),
                kind,
            },
        )
    }

    /// Registered endpoints in registration order
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Check the whole table against the built-in routes and `tasks`
    pub fn validate(&self, tasks: &TaskQueue) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            let path = endpoint.path.as_str();
            check_path(path)?;
            if is_reserved(path) {
                return Err(RegistryError::Reserved(path.to_string()));
            }
            if !seen.insert(path) {
                return Err(RegistryError::Duplicate(path.to_string()));
            }
            if let EndpointKind::Task { queue, .. } = &endpoint.kind {
                if !tasks.has_queue(queue) {
                    return Err(RegistryError::UnknownQueue {
                        path: path.to_string(),
                        queue: queue.clone(),
                    });
                }
            }
        }

        for task in self
            .endpoints
            .iter()
            .filter(|e| matches!(e.kind, EndpointKind::Task { .. }))
        {
            let prefix = format!("{}/", task.path);
            if let Some(other) = self.endpoints.iter().find(|e| e.path.starts_with(&prefix)) {
                return Err(RegistryError::Overlap {
                    path: other.path.clone(),
                    task: task.path.clone(),
                });
            }
        }
        Ok(())
    }

    /// Validate the table and mount every endpoint
    ///
    /// # Arguments
    /// * `tasks` - Task queues that task endpoints submit to
    ///
    /// # Returns
    /// A router with one route per endpoint, plus `GET <path>/:task_id` for
    /// each task endpoint, or the first validation error found.
    pub fn into_router(self, tasks: &TaskQueue) -> Result<Router<Arc<AppContext>>, RegistryError> {
        self.validate(tasks)?;

        let mut router = Router::new();
        for Endpoint { path, kind } in self.endpoints {
            info!(route = %path, kind = kind.label(), "Registering endpoint");
            router = match kind {
                EndpointKind::Sync(handler) => router.route(&path, sync_route(handler)),
                EndpointKind::Async(handler) => router.route(&path, async_route(handler)),
                EndpointKind::StreamSync(handler) => {
                    router.route(&path, stream_sync_route(handler))
                }
                EndpointKind::StreamAsync(handler) => {
                    router.route(&path, stream_async_route(handler))
                }
                EndpointKind::Task { queue, kind } => router
                    .route(&path, task_submit_route(queue, kind))
                    .route(&format!("{}/:task_id", path), get(task_status)),
            };
        }
        Ok(router)
    }
}

fn check_path(path: &str) -> Result<(), RegistryError> {
    let invalid = |reason| RegistryError::InvalidPath {
        path: path.to_string(),
        reason,
    };
    if !path.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }
    if path.len() > 1 && path.ends_with('/') {
        return Err(invalid("must not end with '/'"));
    }
    if path.contains("//") {
        return Err(invalid("must not contain empty segments"));
    }
    if path
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, ':' | '*' | '{' | '}' | '?' | '#'))
    {
        return Err(invalid("contains a reserved character"));
    }
    Ok(())
}

fn is_reserved(path: &str) -> bool {
    RESERVED_ROUTES.iter().any(|reserved| {
        path == *reserved || (*reserved != "/" && path.starts_with(&format!("{}/", reserved)))
    })
}

fn sync_route(handler: SyncHandler) -> MethodRouter<Arc<AppContext>> {
    post(move |Json(request): Json<AgentRequest>| {
        let handler = handler.clone();
        async move {
            let value = tokio::task::spawn_blocking(move || handler(request))
                .await
                .map_err(|e| AppError::Task(format!("sync handler panicked: {}", e)))??;
            Ok::<_, AppError>(Json(value))
        }
    })
}

fn async_route(handler: AsyncHandler) -> MethodRouter<Arc<AppContext>> {
    post(move |Json(request): Json<AgentRequest>| {
        let handler = handler.clone();
        async move {
            let value = handler(request).await?;
            Ok::<_, AppError>(Json(value))
        }
    })
}

fn stream_sync_route(handler: StreamSyncHandler) -> MethodRouter<Arc<AppContext>> {
    post(move |Json(request): Json<AgentRequest>| {
        let handler = handler.clone();
        async move {
            let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
            tokio::task::spawn_blocking(move || {
                for chunk in handler(request) {
                    if tx.blocking_send(chunk).is_err() {
                        debug!("Stream consumer dropped, stopping iterator");
                        break;
                    }
                }
            });
            sse_response(ReceiverStream::new(rx))
        }
    })
}

fn stream_async_route(handler: StreamAsyncHandler) -> MethodRouter<Arc<AppContext>> {
    post(move |Json(request): Json<AgentRequest>| {
        let handler = handler.clone();
        async move {
            let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
            let mut chunks = handler(request);
            tokio::spawn(async move {
                while let Some(chunk) = chunks.next().await {
                    if tx.send(chunk).await.is_err() {
                        debug!("Stream consumer dropped, stopping stream");
                        break;
                    }
                }
            });
            sse_response(ReceiverStream::new(rx))
        }
    })
}

fn task_submit_route(queue: String, kind: TaskKind) -> MethodRouter<Arc<AppContext>> {
    post(
        move |State(ctx): State<Arc<AppContext>>, Json(request): Json<AgentRequest>| {
            let queue = queue.clone();
            let kind = kind.clone();
            async move {
                let work = match kind {
                    TaskKind::Blocking(handler) => {
                        TaskWork::Blocking(Box::new(move || handler(request)))
                    }
                    TaskKind::Cooperative(handler) => TaskWork::Cooperative(handler(request)),
                };
                let record = ctx.tasks.submit(&queue, work).await?;
                Ok::<_, AppError>(Json(json!({
                    "task_id": record.task_id,
                    "status": "submitted",
                    "queue": record.queue,
                })))
            }
        },
    )
}

async fn task_status(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskRecord>, AppError> {
    ctx.tasks
        .get(&task_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("task {}", task_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    fn ok_sync(_: AgentRequest) -> Result<Value, AppError> {
        Ok(Value::Null)
    }

    #[test]
    fn test_path_rules() {
        assert!(check_path("/sync").is_ok());
        assert!(check_path("/a/b").is_ok());
        assert!(check_path("sync").is_err());
        assert!(check_path("/sync/").is_err());
        assert!(check_path("/a//b").is_err());
        assert!(check_path("/:id").is_err());
        assert!(is_reserved("/process"));
        assert!(is_reserved("/sessions/u1"));
        assert!(!is_reserved("/processing"));
    }

    #[test]
    fn test_validate_table() {
        let tasks = TaskQueue::default();

        let mut registry = EndpointRegistry::new();
        registry.sync("/sync", ok_sync);
        registry.asynchronous("/async", |_| async { Ok(Value::Null) }.boxed());
        assert!(registry.validate(&tasks).is_ok());

        registry.sync("/sync", ok_sync);
        assert_eq!(
            registry.validate(&tasks),
            Err(RegistryError::Duplicate("/sync".to_string()))
        );

        let mut reserved = EndpointRegistry::new();
        reserved.sync("/health", ok_sync);
        assert_eq!(
            reserved.validate(&tasks),
            Err(RegistryError::Reserved("/health".to_string()))
        );

        let mut unknown = EndpointRegistry::new();
        unknown.task("/job", "nope", TaskKind::Blocking(Arc::new(ok_sync)));
        assert!(matches!(
            unknown.validate(&tasks),
            Err(RegistryError::UnknownQueue { .. })
        ));

        let mut overlap = EndpointRegistry::new();
        overlap
            .task("/job", "default", TaskKind::Blocking(Arc::new(ok_sync)))
            .sync("/job/extra", ok_sync);
        assert!(matches!(
            overlap.validate(&tasks),
            Err(RegistryError::Overlap { .. })
        ));
    }
}
