use std::sync::Arc;

use anyhow::Context;
use sessionroom_server::{
    app::{build_router, shutdown_signal},
    config::ServerConfig,
    registry::RoomRegistry,
    store::SnapshotStore,
};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let store = SnapshotStore::open_dir(&config.data_dir)
        .with_context(|| format!("failed to open snapshot store in `{}`", config.data_dir.display()))?;
    let registry = Arc::new(RoomRegistry::new(store, config.flush_delay));
    let app = build_router(registry);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting sessionroom server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("sessionroom server exited unexpectedly")
}
