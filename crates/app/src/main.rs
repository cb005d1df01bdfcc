mod events;
mod lifecycle;
mod problem;
mod router;
mod surface;
mod sync;
mod telemetry;

use std::{net::SocketAddr, sync::Arc};

use employee_map_core::{MapOptions, TileLayer, DEFAULT_CONTAINER_ID};
use employee_map_directory::DirectoryClient;
use employee_map_util::{load_env_file, AppConfig};
use tracing::{info, warn};

use crate::events::EventHub;
use crate::lifecycle::MapMount;
use crate::surface::MapBoard;
use crate::sync::SyncController;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let events = EventHub::new();
    let board = Arc::new(MapBoard::new(events.clone()));
    let mount = Arc::new(MapMount::mount(
        board.clone(),
        DEFAULT_CONTAINER_ID,
        &MapOptions::default(),
        &TileLayer::openstreetmap(),
        config.layout_delay,
    )?);

    let directory = DirectoryClient::new(
        config.directory.activation_url.clone(),
        config.directory.employees_url.clone(),
        reqwest::Client::builder().build()?,
    );
    let controller = Arc::new(SyncController::new(directory, board.clone(), config.sync));
    controller.attach(mount.handle());

    // The map is ready, so the first sync starts right away.
    {
        let controller = controller.clone();
        tokio::spawn(async move {
            controller.sync_employees().await;
        });
    }

    let state = router::AppState::new(metrics, events, board, mount.clone(), controller.clone());

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    router::serve(listener, state, shutdown_signal()).await?;

    controller.detach();
    mount.unmount()?;
    info!(stage = "app", "shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(stage = "app", error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(stage = "app", "shutdown signal received");
}
