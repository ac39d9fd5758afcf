// main.rs
use rf_device_server::{
    config, controllers,
    devices::DeviceManager,
    events::EventBus,
    handlers, metrics,
    models::AppState,
    storage::{DeviceStore, JsonFileStore, MemoryStore},
};
use std::{sync::Arc, time::Duration};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = config::Settings::new()
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    let store: Arc<dyn DeviceStore> = match &settings.storage.devices_file {
        Some(path) if !path.as_os_str().is_empty() => Arc::new(JsonFileStore::new(path.clone())),
        _ => {
            tracing::warn!("No devices file configured, devices will not survive a restart");
            Arc::new(MemoryStore::default())
        }
    };

    let manager = Arc::new(DeviceManager::new(
        store,
        controllers::build(&settings.controllers)?,
        Arc::new(EventBus::new()),
        settings.devices.lock_timeout_ms.map(Duration::from_millis),
    ));
    let loaded = manager
        .load()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load devices: {}", e))?;
    tracing::info!(loaded, "Devices restored");

    let mut state = AppState::new(manager, settings.server.max_connections as usize);
    if settings.metrics.enabled {
        state = state.with_metrics(metrics::setup_metrics(settings.metrics.port)?);
        tracing::info!(port = settings.metrics.port, "Metrics exporter started");
    }

    let app = handlers::router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&settings.server.address)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind address: {}", e))?;

    tracing::info!("Server started on {}", settings.server.address);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
