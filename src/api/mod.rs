//! HTTP API
//!
//! Built-in routes plus the endpoints of an [`registry::EndpointRegistry`],
//! mounted on one axum router that shares an [`AppContext`].

pub mod compat;
pub mod endpoints;
pub mod process;
pub mod registry;
pub mod sessions;
pub mod streaming;

use crate::runtime::AppContext;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use registry::{EndpointRegistry, RegistryError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub use endpoints::default_registry;

#[derive(Serialize)]
struct HelloResponse {
    message: String,
    status: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    name: String,
    description: String,
    version: String,
}

/// Request ID middleware - adds unique ID to each request for tracing
async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        uri = %uri,
    );

    let response = next.run(request).instrument(span).await;

    info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status().as_u16(),
        duration_ms = start.elapsed().as_millis(),
        "Request completed"
    );

    response
}

async fn hello(State(ctx): State<Arc<AppContext>>) -> Json<HelloResponse> {
    Json(HelloResponse {
        message: format!("Hello from {}!", ctx.config.app.name),
        status: "ok".to_string(),
    })
}

async fn health(State(ctx): State<Arc<AppContext>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        name: ctx.config.app.name.clone(),
        description: ctx.config.app.description.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Build the application router
///
/// Fails when the endpoint table does not validate.
pub fn build_router(
    ctx: Arc<AppContext>,
    registry: EndpointRegistry,
) -> Result<Router, RegistryError> {
    let endpoints = registry.into_router(&ctx.tasks)?;

    let router = Router::new()
        .route("/", get(hello))
        .route("/health", get(health))
        .route("/process", post(process::process))
        .route(
            "/compatible-mode/v1/chat/completions",
            post(compat::chat_completions),
        )
        .route("/sessions/:user_id", get(sessions::list_sessions))
        .route("/sessions/:user_id/:session_id", get(sessions::get_session))
        .merge(endpoints)
        // Middleware (order matters - request_id should be first)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(CorsLayer::permissive())
        .with_state(ctx);

    Ok(router)
}
