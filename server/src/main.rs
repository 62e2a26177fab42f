use std::net::SocketAddr;

use server::{build_router, config::ServerConfig, metrics, AppState};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    info!("Starting voice chat server...");
    metrics::mark_start();

    let config = ServerConfig::from_env();
    let port = config.port;
    info!(
        "Server configuration loaded: port={}, history_limit={}, max_sentence_length={}",
        config.port,
        config.history_limit,
        config.synthesis_max_length()
    );

    let state = AppState::from_config(config)?;
    let app = build_router(state);

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr} (WebSocket at ws://{addr}/ws)");
    axum::serve(listener, app).await?;
    Ok(())
}
