// src/main.rs
//
// Process bootstrap: load ./config.yaml, start every configured CAN and
// Modbus device, register one HTTP endpoint per device, serve until
// SIGINT/SIGTERM, then shut everything down in the reverse order it
// started — HTTP first so no new requests arrive mid-teardown, then each
// device. Mirrors main.go's startup/shutdown ordering.

use std::path::Path;
use std::sync::Arc;

use sensor_gateway_lib::can::pdo::slugify;
use sensor_gateway_lib::can::CanDevice;
use sensor_gateway_lib::config;
use sensor_gateway_lib::error::GatewayError;
use sensor_gateway_lib::http::EndpointRegistry;
use sensor_gateway_lib::glog;
use sensor_gateway_lib::logging::init_file_logging;
use sensor_gateway_lib::modbus::ModbusRunner;

const CONFIG_PATH: &str = "./config.yaml";

#[tokio::main]
async fn main() {
    init_file_logging(Path::new("gateway.log"));

    let config = match config::load(Path::new(CONFIG_PATH)) {
        Ok(cfg) => cfg,
        Err(e) => {
            glog!("[main] fatal: {}", e);
            std::process::exit(1);
        }
    };

    if config.zcan.is_empty() && config.modbus.is_empty() {
        glog!("[main] fatal: {}", GatewayError::Config("no devices configured".to_string()));
        std::process::exit(1);
    }

    for entry in &config.max6675 {
        glog!(
            "[main] max6675 probe '{}' configured on {} but the thermocouple driver is not implemented; skipping",
            entry.name, entry.path
        );
    }

    let registry = EndpointRegistry::new();
    let mut can_devices: Vec<Arc<CanDevice>> = Vec::new();
    let mut modbus_runners: Vec<Arc<ModbusRunner>> = Vec::new();

    for node in &config.zcan {
        glog!("[main] starting can device '{}' on {}", node.name, node.interface);
        match CanDevice::start(node).await {
            Ok(device) => {
                register_can_endpoints(&registry, &device).await;
                can_devices.push(device);
            }
            Err(e) => glog!("[main] unable to start can device '{}': {}", node.name, e),
        }
    }

    for node in &config.modbus {
        glog!("[main] starting modbus device '{}' on {}", node.name, node.device);
        match ModbusRunner::start(node).await {
            Ok(runner) => {
                register_modbus_endpoint(&registry, &runner).await;
                modbus_runners.push(runner);
            }
            Err(e) => glog!("[main] unable to start modbus device '{}': {}", node.name, e),
        }
    }

    let address = format!("{}:{}", config.http.address, config.http.port);
    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            glog!("[main] fatal: unable to bind {}: {}", address, e);
            std::process::exit(1);
        }
    };
    glog!("[main] listening on {}", address);

    let router = registry.into_router();
    let server = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());

    if let Err(e) = server.await {
        glog!("[main] http server exited with error: {}", e);
    }

    glog!("[main] shutting down");
    for device in &can_devices {
        device.stop().await;
    }
    for runner in &modbus_runners {
        runner.stop().await;
    }
}

async fn register_can_endpoints(registry: &EndpointRegistry, device: &Arc<CanDevice>) {
    let slug = slugify(&device.name);
    let snapshot_device = device.clone();
    registry.register(slug.clone(), move || {
        let device = snapshot_device.clone();
        async move { device.snapshot().await }
    }).await;

    let info_device = device.clone();
    registry.register(format!("{}/device-info", slug), move || {
        let device = info_device.clone();
        async move {
            match device.device_info().await {
                Ok(info) => serde_json::to_value(info).unwrap_or(serde_json::Value::Null),
                Err(e) => serde_json::json!({ "error": e.to_string() }),
            }
        }
    }).await;
}

async fn register_modbus_endpoint(registry: &EndpointRegistry, runner: &Arc<ModbusRunner>) {
    let slug = slugify(runner.name());
    let runner = runner.clone();
    registry.register(slug, move || {
        let runner = runner.clone();
        async move { runner.snapshot() }
    }).await;
}

/// Resolves once either SIGINT or SIGTERM (Unix) is received, matching
/// main.go's shutdown trigger.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

