use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use corrective_rag::config::Settings;
use corrective_rag::{bootstrap, server, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    telemetry::init_logging(&settings.logging);

    tracing::info!("Connecting to Qdrant: {}", settings.vector_store.url);
    tracing::info!("Connecting to LLM: {}", settings.llm.base_url);

    let state = Arc::new(bootstrap::build_app_state(&settings).await?);
    let app = server::router(
        state,
        Duration::from_secs(settings.server.request_timeout_secs),
    );

    let listener = tokio::net::TcpListener::bind(settings.bind_addr()).await?;
    tracing::info!("Corrective RAG server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
