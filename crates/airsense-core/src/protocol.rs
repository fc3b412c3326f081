//! Fixed protocol identifiers shared with the AirSense peripheral firmware.
//!
//! The sensor exposes a single custom GATT service with one telemetry
//! characteristic. All identifiers here are compile-time constants; there is
//! no negotiation of the frame layout (the protocol version is implicit).

use std::time::Duration;

use uuid::Uuid;

/// Custom air-quality service advertised by the sensor.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);

/// Telemetry characteristic carrying the 24-byte sensor frame.
pub const TELEMETRY_CHAR_UUID: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);

/// Client Characteristic Configuration descriptor (Bluetooth SIG assigned).
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// Advertised device name of the sensor firmware.
pub const DEVICE_NAME: &str = "AirSense";

/// Value written to the CCCD to enable notifications (little-endian bitfield).
pub const ENABLE_NOTIFICATIONS: [u8; 2] = [0x01, 0x00];

/// MTU requested after connecting. Negotiation is best-effort; the 24-byte
/// frame fits the Bluetooth minimum, so any outcome is acceptable.
pub const TARGET_MTU: u16 = 517;

/// Exact length of one telemetry frame: six little-endian `f32` fields.
pub const FRAME_LEN: usize = 24;

/// Delay before re-scanning after an unexpected disconnection. Constant, no
/// backoff growth; retries are unbounded while auto-reconnect is enabled.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// The fixed triple of identifiers a session operates on.
///
/// Never changes during a session; the connection state machine validates
/// that the service and characteristic are both present after discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Air-quality service identifier.
    pub service: Uuid,
    /// Telemetry characteristic identifier.
    pub telemetry: Uuid,
    /// Notification-configuration descriptor identifier.
    pub cccd: Uuid,
}

impl ServiceDescriptor {
    /// The AirSense air-quality service triple.
    pub const AIR_QUALITY: Self = Self {
        service: SERVICE_UUID,
        telemetry: TELEMETRY_CHAR_UUID,
        cccd: CCCD_UUID,
    };
}

impl Default for ServiceDescriptor {
    fn default() -> Self {
        Self::AIR_QUALITY
    }
}
