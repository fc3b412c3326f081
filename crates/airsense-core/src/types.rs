//! Shared identity and capability types.
//!
//! Most protocol types live in their own modules (frame, protocol); this
//! module holds the small value types passed between the scan controller,
//! the connection state machine, and the transport seam.

use std::fmt;

use uuid::Uuid;

/// Opaque platform-level device handle.
///
/// On Linux this is a MAC address, on macOS a CoreBluetooth UUID; the core
/// never interprets it, it only hands it back to the transport to connect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap a platform device identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one connection attempt.
///
/// Every transport event that concerns a session carries its `SessionId`;
/// the state machine drops events tagged with a stale identity, so a late
/// acknowledgment from a torn-down session can never affect its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Construct from a monotonically increasing counter value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A discovered advertisement, produced per scan result and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralIdentity {
    /// Platform device handle usable for a connect attempt.
    pub device: DeviceId,
    /// Advertised local name, if the advertisement carried one.
    pub local_name: Option<String>,
    /// Advertised service identifiers.
    pub services: Vec<Uuid>,
}

/// Services and characteristics found by GATT discovery on a live session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GattInventory {
    /// Discovered service identifiers.
    pub services: Vec<Uuid>,
    /// Discovered characteristic identifiers, across all services.
    pub characteristics: Vec<Uuid>,
}

impl GattInventory {
    /// Whether the inventory contains the given service.
    #[must_use]
    pub fn has_service(&self, uuid: Uuid) -> bool {
        self.services.contains(&uuid)
    }

    /// Whether the inventory contains the given characteristic.
    #[must_use]
    pub fn has_characteristic(&self, uuid: Uuid) -> bool {
        self.characteristics.contains(&uuid)
    }
}

/// Radio authorization supplied by the host environment.
///
/// The core performs no authorization checks of its own: the host grants or
/// withholds these tokens before invoking scan/connect operations, and the
/// core fails fast with a permission error instead of touching the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// The host permits starting and stopping scans.
    pub scan_authorized: bool,
    /// The host permits initiating GATT connections.
    pub connect_authorized: bool,
}

impl Capabilities {
    /// Both radio capabilities granted.
    #[must_use]
    pub const fn granted() -> Self {
        Self {
            scan_authorized: true,
            connect_authorized: true,
        }
    }

    /// No radio capability granted.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            scan_authorized: false,
            connect_authorized: false,
        }
    }
}
