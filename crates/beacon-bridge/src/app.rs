//! Process wiring: broker, scanner, service and shutdown.

use anyhow::Context;
use beacon_core::{Config, PresenceService, ScanFeed};
use tracing::{error, info, warn};

use crate::mqtt::MqttBroker;

/// Connect everything described by `config` and run until a shutdown signal.
///
/// # Errors
///
/// Returns an error if the broker or the Bluetooth adapter cannot be reached
/// at startup. Failures after startup are logged and do not end the process.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let broker = MqttBroker::connect(&config.broker)
        .await
        .context("Failed to connect to MQTT broker")?;

    let scanner = build_scanner(&config).await?;
    serve(&config, scanner, broker).await;
    Ok(())
}

async fn serve<S: ScanFeed>(config: &Config, scanner: S, broker: MqttBroker) {
    let mut service = PresenceService::from_config(config, scanner, broker);

    service.bootstrap().await;
    info!(
        prefix = %config.scanner.name_prefix,
        window_secs = config.scanner.scan_window_secs,
        "Tracking beacons"
    );

    service.run(shutdown_signal()).await;

    if let Err(e) = service.into_publisher().into_broker().disconnect().await {
        warn!(error = %e, "Broker disconnect failed");
    }
    info!("beacon-bridge stopped");
}

#[cfg(feature = "bluetooth")]
async fn build_scanner(config: &Config) -> anyhow::Result<beacon_core::BluetoothScanner> {
    beacon_core::BluetoothScanner::new(config.scanner.adapter.as_deref())
        .await
        .context("Failed to initialise Bluetooth adapter")
}

#[cfg(not(feature = "bluetooth"))]
async fn build_scanner(_config: &Config) -> anyhow::Result<beacon_core::MockScanner> {
    warn!("Built without Bluetooth support, no beacons will be detected");
    Ok(beacon_core::MockScanner::new())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("Shutdown signal received");
}
