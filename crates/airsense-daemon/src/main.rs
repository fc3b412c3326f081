//! # airsense-daemon
//!
//! Headless host daemon for the airsense air-quality sensor monitor.
//!
//! This binary provides:
//! - The connection lifecycle driver running against the system Bluetooth stack
//! - Structured logging of connection status changes and sensor readings
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package airsense-daemon
//!
//! # Production (on Raspberry Pi)
//! ./airsense-daemon
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use tracing::{error, info, warn};

use airsense_core::{AirQualityMonitor, Capabilities, MonitorConfig};

mod logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let is_production = std::env::var("AIRSENSE_ENV").is_ok_and(|v| v == "production");
    logging::init(is_production)?;

    info!("Starting airsense-daemon");

    let config = match MonitorConfig::load() {
        Ok(config) => config,
        Err(err) => {
            warn!("Failed to load configuration, using defaults: {err}");
            MonitorConfig::default()
        }
    };
    info!(
        device_name = %config.device_name,
        auto_reconnect = config.auto_reconnect,
        "Configuration loaded"
    );

    let monitor = spawn_monitor(config).await?;

    // The daemon runs on a host session with full Bluetooth access.
    monitor.start_monitoring(Capabilities::granted()).await?;
    info!("Scanning for sensor");

    let mut status = monitor.status();
    let mut readings = monitor.readings();

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    error!("Monitor stopped unexpectedly");
                    break;
                }
                let connected = *status.borrow_and_update();
                if connected {
                    info!("Sensor connected");
                } else {
                    warn!("Sensor disconnected");
                }
            }
            changed = readings.changed() => {
                if changed.is_err() {
                    error!("Monitor stopped unexpectedly");
                    break;
                }
                if let Some(reading) = *readings.borrow_and_update() {
                    info!(
                        temperature_c = reading.temperature_c,
                        humidity_pct = reading.humidity_pct,
                        pressure_pa = reading.pressure_pa,
                        gas_resistance_kohm = reading.gas_resistance_kohm,
                        voc_ppm = reading.voc_ppm,
                        pm25_ug_m3 = reading.pm25_ug_m3,
                        "Reading"
                    );
                }
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Shutting down");
                monitor.disconnect().await?;
                break;
            }
        }
    }

    Ok(())
}

#[cfg(feature = "bluetooth")]
async fn spawn_monitor(config: MonitorConfig) -> anyhow::Result<AirQualityMonitor> {
    use airsense_core::BtleTransport;

    let (events_tx, events_rx) = tokio::sync::mpsc::channel(64);
    let transport = BtleTransport::new(events_tx).await?;
    Ok(AirQualityMonitor::spawn(transport, events_rx, config))
}

#[cfg(not(feature = "bluetooth"))]
async fn spawn_monitor(_config: MonitorConfig) -> anyhow::Result<AirQualityMonitor> {
    anyhow::bail!("built without the `bluetooth` feature; no radio transport available")
}
