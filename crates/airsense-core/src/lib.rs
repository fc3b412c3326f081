//! # airsense-core
//!
//! Core logic for the airsense air-quality sensor monitor.
//!
//! This crate provides:
//! - Device discovery and matching against the airsense advertisement
//! - A connection lifecycle driver (scan, connect, discover, subscribe)
//! - Telemetry frame decoding into typed sensor readings
//! - Configuration loading, saving, and validation
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`monitor`] - The connection lifecycle driver and its public handle
//! - [`transport`] - The radio transport seam and its event vocabulary
//! - [`scan`] - Scan control and advertisement matching
//! - [`notify`] - Telemetry subscription and notification handling
//! - [`frame`] - Binary telemetry frame codec
//! - [`protocol`] - GATT identifiers and wire constants
//! - [`config`] - Monitor configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared identifier and capability types
//!
//! The `bluetooth` feature (on by default) adds [`btle`], a transport backed
//! by the platform Bluetooth stack via btleplug.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

#[cfg(feature = "bluetooth")]
pub mod btle;
pub mod config;
pub mod error;
pub mod frame;
pub mod monitor;
pub mod notify;
pub mod protocol;
pub mod scan;
pub mod transport;
pub mod types;

// Re-export primary types for convenience
#[cfg(feature = "bluetooth")]
pub use btle::BtleTransport;
pub use config::MonitorConfig;
pub use error::{AirsenseError, ProtocolError, Result};
pub use frame::{decode, encode, FrameError, SensorReading};
pub use monitor::{AirQualityMonitor, ConnectionPhase};
pub use protocol::{ServiceDescriptor, DEVICE_NAME, FRAME_LEN, SERVICE_UUID, TELEMETRY_CHAR_UUID};
pub use scan::{DeviceFilter, ScanController, ScanProfile};
#[cfg(any(test, feature = "mock-transport"))]
pub use transport::{MockCall, MockTransport};
pub use transport::{RadioTransport, TransportEvent};
pub use types::{Capabilities, DeviceId, GattInventory, PeripheralIdentity, SessionId};
