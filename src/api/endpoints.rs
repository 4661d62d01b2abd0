//! Demo endpoints registered by default

use super::registry::{EndpointRegistry, TaskKind};
use crate::config::TaskConfig;
use crate::error::AppError;
use crate::runtime::tasks::{CELERY_QUEUE, DEFAULT_QUEUE};
use crate::runtime::AgentRequest;
use futures_util::future::BoxFuture;
use futures_util::{stream, FutureExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Number of chunks emitted by the streaming demo endpoints
pub const DEMO_CHUNKS: usize = 5;

fn echo(request: AgentRequest) -> Value {
    json!({"status": "ok", "payload": request})
}

fn chunk(kind: &str, i: usize, request: &AgentRequest) -> String {
    format!("{} chunk {}, with request payload {}\n", kind, i, request)
}

/// Echo, streaming and background task endpoints
pub fn default_registry(tasks: &TaskConfig) -> EndpointRegistry {
    let task_delay = Duration::from_secs(tasks.task_delay_secs);
    let atask_delay = Duration::from_secs(tasks.atask_delay_secs);

    let mut registry = EndpointRegistry::new();
    registry
        .sync("/sync", |request| Ok(echo(request)))
        .asynchronous("/async", |request| async move { Ok(echo(request)) }.boxed())
        .stream_async("/stream_async", |request| {
            stream::iter((0..DEMO_CHUNKS).map(move |i| chunk("async", i, &request))).boxed()
        })
        .stream_sync("/stream_sync", |request| {
            Box::new((0..DEMO_CHUNKS).map(move |i| chunk("sync", i, &request)))
        })
        .task(
            "/task",
            CELERY_QUEUE,
            TaskKind::Blocking(Arc::new(move |request: AgentRequest| {
                std::thread::sleep(task_delay);
                Ok::<_, AppError>(echo(request))
            })),
        )
        .task(
            "/atask",
            DEFAULT_QUEUE,
            TaskKind::Cooperative(Arc::new(
                move |request: AgentRequest| -> BoxFuture<'static, Result<Value, AppError>> {
                    async move {
                        tokio::time::sleep(atask_delay).await;
                        Ok(echo(request))
                    }
                    .boxed()
                },
            )),
        );
    registry
}
