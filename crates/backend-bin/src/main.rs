//! WatchSync server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use backend_lib::{config::Settings, coordinator, ws_router, AppState};
use tokio::net::TcpListener;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .init();

    info!("starting WatchSync server...");

    let settings = Settings::load()?;
    debug!(?settings, "configuration loaded");

    let state = Arc::new(AppState::new(settings.clone()));

    // Background eviction of clients that stopped talking.
    tokio::spawn(coordinator::run_reaper(state.clone()));
    debug!(
        interval_secs = settings.session.cleanup_interval_secs,
        threshold_secs = settings.session.inactivity_threshold_secs,
        "inactivity reaper scheduled"
    );

    let app = ws_router::create_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    let listener = TcpListener::bind(&addr).await?;
    info!("server listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
