mod api;
mod router;
mod state;

use std::sync::Arc;

use anyhow::Context;
use geoloop_agent::GeoSession;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn load_config() -> geoloop_core::Config {
    geoloop_core::config::load_dotenv();
    geoloop_core::Config::from_env()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .with_level(true)
        .init();

    config.log_summary();
    let session = Arc::new(GeoSession::from_config(&config).context("invalid configuration")?);

    // Requests reconnect on demand, so a failed first connect is not fatal.
    if let Err(e) = session.connect().await {
        warn!(error = %e, "Tool provider unavailable at startup");
    }

    let state = Arc::new(state::AppState::new(session.clone()));
    let app = router::build_router(state, &config.server.cors_origin);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    session.shutdown().await;
    Ok(())
}
