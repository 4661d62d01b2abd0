//! Local deployment
//!
//! Serves the application on a local TCP listener until a stop signal
//! arrives: Ctrl+C, SIGTERM, or Enter on stdin. In-flight requests finish
//! before the application services are stopped. Background work still
//! running after that gets [`SHUTDOWN_GRACE`] before the process exits.

use crate::config::ServerConfig;
use crate::runtime::AppContext;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// Time left to blocking background work once the runtime shuts down
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Run `future` to completion on a fresh multi-threaded runtime
///
/// # Arguments
/// * `future` - The application's main future
/// * `grace` - How long to wait for leftover tasks when the runtime is dropped
///
/// # Returns
/// The future's output. Work still running on the blocking pool after
/// `grace` is abandoned instead of holding up process exit.
pub fn block_on_with_grace<F: Future>(
    future: F,
    grace: Duration,
) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(grace);
    Ok(output)
}

/// Runs the application in the current process
#[derive(Debug, Clone)]
pub struct LocalDeployManager {
    host: String,
    port: u16,
}

impl LocalDeployManager {
    /// Deploy to `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Deploy to the configured server address
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.host.clone(), config.port)
    }

    /// Address the manager binds to
    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))
    }

    /// Serve until Ctrl+C, SIGTERM or Enter
    pub async fn deploy(&self, ctx: Arc<AppContext>, router: Router) -> anyhow::Result<()> {
        self.deploy_until(ctx, router, shutdown_signal()).await
    }

    /// Serve until `signal` resolves
    ///
    /// # Arguments
    /// * `ctx` - Initialised application context, shut down on return
    /// * `router` - Router built from `ctx`
    /// * `signal` - Future that resolves when the server should stop
    ///
    /// # Returns
    /// `Ok(())` once accepted requests have finished and the stores are
    /// stopped, or the bind/serve error. The context is shut down either way.
    pub async fn deploy_until<F>(
        &self,
        ctx: Arc<AppContext>,
        router: Router,
        signal: F,
    ) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.addr()?;
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                ctx.shutdown().await;
                return Err(anyhow::Error::new(e).context(format!("Failed to bind {}", addr)));
            }
        };
        serve(listener, ctx, router, signal).await
    }
}

/// Serve `router` on `listener`, then stop the application services
pub async fn serve<F>(
    listener: TcpListener,
    ctx: Arc<AppContext>,
    router: Router,
    signal: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!("🚀 Server running on http://{}", addr);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .await;

    ctx.shutdown().await;
    served?;
    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C, SIGTERM or a line on stdin
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let enter = async {
        if stdin_line().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    info!("Press Enter to stop the server...");
    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
        _ = enter => {
            info!("Received Enter, shutting down gracefully...");
        },
    }
}

/// Resolves once a line is read from stdin; errors on EOF
///
/// The read happens on a detached thread, outside the runtime's blocking pool.
fn stdin_line() -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name("stdin-shutdown".to_string())
        .spawn(move || {
            let mut line = String::new();
            match std::io::stdin().read_line(&mut line) {
                Ok(n) if n > 0 => {
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to read stdin"),
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "Failed to watch stdin for shutdown");
    }
    rx
}
