//! Friday agent server
//!
//! Loads `.env`, builds the application from the environment and serves it
//! until Ctrl+C, SIGTERM or Enter.

use friday_agent::api::{build_router, default_registry};
use friday_agent::config::Config;
use friday_agent::deploy::{block_on_with_grace, LocalDeployManager, SHUTDOWN_GRACE};
use friday_agent::runtime::{AppContext, Services};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    block_on_with_grace(run(), SHUTDOWN_GRACE)?
}

async fn run() -> anyhow::Result<()> {
    // Load .env before anything reads the environment
    let dotenv = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match dotenv {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Failed to load .env file"),
    }

    // Load configuration
    let config = Config::from_env();
    info!("Configuration loaded: {:?}", config);

    let services = Services::from_config(&config)?;
    let deploy = LocalDeployManager::from_config(&config.server);
    let registry = default_registry(&config.tasks);
    let ctx = AppContext::init(config, services).await?;

    let router = match build_router(ctx.clone(), registry) {
        Ok(router) => router,
        Err(e) => {
            ctx.shutdown().await;
            return Err(anyhow::Error::new(e).context("Invalid endpoint registry"));
        }
    };
    info!("✅ AgentApp configuration completed");

    deploy.deploy(ctx, router).await
}
