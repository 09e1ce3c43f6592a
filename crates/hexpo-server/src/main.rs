//! Hexpo game server.

use hexpo_core::{Game, GameConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod protocol;
mod runner;
mod server;

use server::ServerState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse address from env or use default
    let addr: SocketAddr = std::env::var("SERVER_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".into())
        .parse()?;

    let config = match std::env::var("HEXPO_CONFIG") {
        Ok(path) => {
            info!("Loading config from {}", path);
            GameConfig::from_path(&path)?
        }
        Err(_) => GameConfig::default(),
    };

    info!("Starting Hexpo server...");

    let game = Arc::new(Game::new(config)?);
    let state = Arc::new(ServerState::new(game));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            // Dropping the sender would read as a shutdown
            std::future::pending::<()>().await;
        }
        info!("Shutting down");
        let _ = shutdown_tx.send(true);
    });

    let scheduler = tokio::spawn(runner::run_scheduler(
        Arc::clone(&state),
        shutdown_rx.clone(),
    ));
    server::run_server(addr, state, shutdown_rx).await?;
    scheduler.await?;
    Ok(())
}
