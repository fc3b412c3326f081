//! Unified error types for the airsense core library.
//!
//! This module provides a unified error type [`AirsenseError`] that covers
//! all failure modes across the monitor. The frame codec keeps its own
//! [`FrameError`](crate::frame::FrameError) because malformed frames are an
//! expected, non-fatal condition; protocol-signature faults live in
//! [`ProtocolError`].
//!
//! # Design Principles
//!
//! - **Specific variants**: each variant captures exactly one failure mode
//! - **Propagation policy**: transient faults (a malformed frame, a single
//!   scan-start failure) are absorbed locally; structural faults (missing
//!   service, permission denial) terminate the current attempt and surface
//!   as a status change, never as a panic across a callback boundary

use std::path::PathBuf;

use thiserror::Error;

use crate::frame::FrameError;

/// The connected peripheral does not speak the expected protocol.
///
/// These are signature mismatches, not transient faults: the session is torn
/// down and, depending on host policy, auto-reconnect may be suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// GATT discovery completed but the air-quality service was absent.
    #[error("required service missing on connected peripheral")]
    RequiredServiceMissing,

    /// The service was present but the telemetry characteristic was absent.
    #[error("required telemetry characteristic missing on connected peripheral")]
    RequiredCharacteristicMissing,

    /// The notification subscription handshake failed.
    #[error("notification subscription failed")]
    SubscriptionFailed,
}

/// The unified error type for all airsense operations.
#[derive(Debug, Error)]
pub enum AirsenseError {
    // =========================================================================
    // PERMISSION ERRORS
    // =========================================================================
    /// The host did not grant the scan capability. No radio call was made.
    #[error("scan not authorized by host; no radio call was attempted")]
    ScanNotAuthorized,

    /// The host did not grant the connect capability. No radio call was made.
    #[error("connect not authorized by host; no radio call was attempted")]
    ConnectNotAuthorized,

    // =========================================================================
    // SCAN ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error("no Bluetooth adapter found")]
    AdapterNotFound,

    /// The platform failed to start a scan. Non-fatal; the caller may retry.
    #[error("failed to start scan: {0}")]
    ScanStartFailed(String),

    /// The platform failed to stop a scan.
    #[error("failed to stop scan: {0}")]
    ScanStopFailed(String),

    // =========================================================================
    // SESSION ERRORS
    // =========================================================================
    /// The peripheral does not expose the expected protocol signature.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A telemetry payload could not be decoded.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The transport session was lost. Drives the reconnect policy.
    #[error("transport session disconnected")]
    TransportDisconnected,

    /// A transport command could not be submitted.
    #[error("transport error: {0}")]
    Transport(String),

    /// The monitor's event loop has shut down and no longer accepts commands.
    #[error("monitor is no longer running")]
    MonitorStopped,

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(String),

    /// The configuration was parsed but contains an invalid value.
    #[error("configuration validation failed: {field}: {message}")]
    ConfigValidation {
        /// Name of the offending field.
        field: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for airsense operations.
pub type Result<T> = std::result::Result<T, AirsenseError>;

impl AirsenseError {
    /// Returns `true` if this error was raised by the capability gate.
    #[inline]
    #[must_use]
    pub const fn is_permission_error(&self) -> bool {
        matches!(self, Self::ScanNotAuthorized | Self::ConnectNotAuthorized)
    }

    /// Returns `true` if this error is related to scanning.
    #[inline]
    #[must_use]
    pub const fn is_scan_error(&self) -> bool {
        matches!(
            self,
            Self::AdapterNotFound | Self::ScanStartFailed(_) | Self::ScanStopFailed(_)
        )
    }

    /// Returns `true` if this error is a protocol-signature mismatch.
    #[inline]
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParse(_) | Self::ConfigValidation { .. }
        )
    }

    /// Returns `true` if this error is expected to clear on retry without
    /// host intervention.
    ///
    /// Malformed frames and scan-start failures are transient; permission
    /// denials and protocol mismatches are not.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ScanStartFailed(_)
                | Self::ScanStopFailed(_)
                | Self::Frame(_)
                | Self::TransportDisconnected
        )
    }
}
