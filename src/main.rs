// src/main.rs
// PeerBridge process entry point: load config, wire components, bind the
// HTTP listener, serve until a shutdown signal, then tear sessions down
// cleanly (spec.md §6 "Exit codes").

use axum::Router;
use peerbridge::config::BridgeConfig;
use peerbridge::security::loopback_only;
use peerbridge::state::AppState;
use peerbridge::transport;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("peerbridge=info,tower_http=warn")))
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "startup failed");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Arc::new(BridgeConfig::from_env());
    let port = config.port;

    let state = AppState::new(config).await?;

    let app = Router::new()
        .merge(transport::router(state.clone()))
        .layer(axum::middleware::from_fn(loopback_only))
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "peerbridge listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Shutdown hook (spec.md §4.4): close every live session, mirroring
    // offline status to the registry and store, then drop the registry's
    // last mappings.
    state.close_all_sessions().await;
    state.registry.clear().await;

    info!("peerbridge shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
