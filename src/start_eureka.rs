//! Startup helpers for the Eureka server.

use std::process::ExitCode;

use anyhow::Context;

use crate::config::AppConfig;
use crate::server::{self, AppState};

/// Run the server (used by the `eureka-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting Eureka v{}", env!("CARGO_PKG_VERSION"));

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(serve()) {
        tracing::error!("Server error: {e:#}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

async fn serve() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    let state = initialize(config).await?;
    server::run_server_with_shutdown(state, shutdown_signal())
        .await
        .context("server stopped with an error")?;
    tracing::info!("Server stopped");
    Ok(())
}

/// Initialize application state without starting the server.
///
/// # Errors
/// Returns an error if the store or the upstream client cannot be created.
pub async fn initialize(config: AppConfig) -> anyhow::Result<std::sync::Arc<AppState>> {
    tracing::info!(
        port = config.server.port,
        upstream = %config.upstream.base_url,
        "Configuration loaded"
    );
    AppState::new(config)
        .await
        .context("failed to create state")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
