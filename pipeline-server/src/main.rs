use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use pipeline_server::{router, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    pipeline_core::init_tracing_from_env("pipeline_server");

    let config = ServerConfig::from_env().context("Failed to load configuration")?;
    pipeline_server::metrics::init_metrics()?;

    info!(
        engines = ?config.engines.keys().collect::<Vec<_>>(),
        default_engine = %config.default_engine,
        "Starting engines"
    );
    let state = AppState::start(&config)
        .await
        .context("Failed to start engine workers")?;

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!(bind_addr = %config.bind_addr, "Pipeline server starting");

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server failed")?;

    state.shutdown().await;
    info!("Pipeline server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
