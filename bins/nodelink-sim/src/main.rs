mod backend;
mod device;
mod http;
mod sim;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use nodelink_core::{system_parameters, NodeConfig, ParameterStore};
use nodelink_runtime::{EventQueue, NodeRuntime, Peripherals};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::backend::FileBackend;
use crate::device::Thermostat;
use crate::http::{create_router, AppState};
use crate::sim::{SimBroker, SimFirmware, SimIndicator, SimProvisioning, SimWifi};

const CONNECT_DELAY: Duration = Duration::from_millis(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,nodelink_runtime=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("nodelink simulator starting...");

    // Configuration
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading configuration {path}"))?;
            NodeConfig::from_json(&text).with_context(|| format!("loading configuration {path}"))?
        }
        None => NodeConfig {
            device_type: "thermostat".to_string(),
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            ..NodeConfig::default()
        },
    };
    let data_dir: PathBuf = std::env::var("NODELINK_DATA_DIR")
        .unwrap_or_else(|_| "./nodelink-data".into())
        .into();
    let http_addr: SocketAddr = std::env::var("NODELINK_HTTP")
        .unwrap_or_else(|_| "127.0.0.1:3030".into())
        .parse()
        .context("parsing NODELINK_HTTP")?;

    // Parameter store
    let backend = FileBackend::open(&data_dir, &config.namespace)?;
    tracing::info!(path = %backend.path().display(), "parameter file");

    let thermostat = Arc::new(Thermostat::new());
    let default_client_id = format!("nodelink-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
    let mut parameters = system_parameters(&default_client_id);
    parameters.extend(thermostat.parameters());
    let store = ParameterStore::with_parameters(backend, config.sync_capacity, parameters)?;
    store.init()?;

    if store.get("base_topic")?.is_empty() {
        let client_id = store.get("mqtt_client_id")?;
        store.set("base_topic", &format!("devices/{client_id}"))?;
    }
    let params = Arc::new(store);

    // Simulated platform
    let events = EventQueue::new(config.event_queue_depth);
    let provisioning = Arc::new(SimProvisioning::new(Arc::clone(&params), events.sender()));
    let indicator = Arc::new(SimIndicator::new(Arc::clone(&provisioning)));
    let wifi = Arc::new(SimWifi::new(events.sender(), CONNECT_DELAY));
    let broker = Arc::new(SimBroker::new(events.sender(), CONNECT_DELAY));

    let peripherals = Peripherals {
        indicator: indicator.clone(),
        provisioning: provisioning.clone(),
        wifi: wifi.clone(),
        broker: broker.clone(),
        firmware: Some(Arc::new(SimFirmware::new())),
    };
    let runtime = NodeRuntime::new(
        config,
        Arc::clone(&params),
        peripherals,
        thermostat,
        events,
    );
    let sender = runtime.sender();

    let app_state = AppState {
        manager: runtime.manager(),
        params,
        provisioning,
        indicator,
        wifi,
        broker,
    };

    // Spawn the node
    let mut node_handle = tokio::spawn(runtime.run());

    // Start HTTP control surface
    let http_handle = tokio::spawn(async move {
        if let Err(e) = start_http_server(http_addr, app_state).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    tracing::info!("nodelink simulator ready");
    tracing::info!("   Control: http://{}/status", http_addr);
    tracing::info!("");
    tracing::info!("Try these commands:");
    tracing::info!("   curl -X PUT -d mylab http://{}/provisioning/wifi-ssid", http_addr);
    tracing::info!("   curl -X PUT -d localhost http://{}/provisioning/mqtt-host", http_addr);
    tracing::info!("   curl -X PUT -d restart-mqtt http://{}/provisioning/command", http_addr);

    // Wait for shutdown signal
    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
            sender.shutdown();
            node_handle.await
        }
        result = &mut node_handle => result,
        _ = http_handle => {
            tracing::warn!("HTTP server stopped");
            sender.shutdown();
            node_handle.await
        }
    };

    outcome.context("node task panicked")??;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Start the HTTP control server
async fn start_http_server(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = create_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
