//! The radio transport seam.
//!
//! [`RadioTransport`] is the domain-level interface between the connection
//! state machine and a concrete radio stack. It intentionally avoids any
//! reference to a particular Bluetooth library: commands are fire-and-forget
//! from the caller's perspective, and completion is always signaled later as
//! a [`TransportEvent`] on the channel the transport was constructed with,
//! never by blocking the caller.
//!
//! Every event that concerns a session is tagged with the [`SessionId`] the
//! command was issued under, so the state machine can discard callbacks from
//! a torn-down session.
//!
//! [`MockTransport`] is the reference implementation of these semantics and
//! backs the state-machine tests; the btleplug implementation lives in
//! [`crate::btle`] behind the `bluetooth` feature.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::scan::ScanProfile;
use crate::types::{DeviceId, GattInventory, PeripheralIdentity, SessionId};

/// Asynchronous completion and push events from the radio.
///
/// Delivered on a single channel and processed one at a time, in arrival
/// order, by the connection state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A scan result passed the platform up. Not tied to a session.
    DeviceDiscovered(PeripheralIdentity),
    /// The transport-level connection is established.
    Connected {
        /// Session the connect command was issued under.
        session: SessionId,
    },
    /// The one-shot connect attempt failed.
    ConnectFailed {
        /// Session the connect command was issued under.
        session: SessionId,
        /// Platform failure description.
        reason: String,
    },
    /// MTU negotiation finished. `None` means the platform owns negotiation
    /// and did not report a value; the session proceeds regardless.
    MtuNegotiated {
        /// Session the request was issued under.
        session: SessionId,
        /// Negotiated payload size, if the platform reported one.
        mtu: Option<u16>,
    },
    /// GATT service discovery finished.
    ServicesDiscovered {
        /// Session discovery ran on.
        session: SessionId,
        /// Discovered attributes, or a platform failure description.
        result: std::result::Result<GattInventory, String>,
    },
    /// The transport-level notification flag was toggled.
    NotifySet {
        /// Session the command was issued under.
        session: SessionId,
        /// Success, or a platform failure description.
        result: std::result::Result<(), String>,
    },
    /// The descriptor write was acknowledged (or failed).
    DescriptorWritten {
        /// Session the write was issued under.
        session: SessionId,
        /// Success, or a platform failure description.
        result: std::result::Result<(), String>,
    },
    /// A characteristic-change notification arrived.
    Notification {
        /// Session the notification belongs to.
        session: SessionId,
        /// Characteristic that changed.
        characteristic: Uuid,
        /// Raw notified value.
        value: Vec<u8>,
    },
    /// The transport session was lost, expectedly or not.
    Disconnected {
        /// Session that ended.
        session: SessionId,
    },
}

/// Commands the connection state machine issues to the radio.
///
/// The single radio handle behind an implementation is exclusively owned by
/// the state machine; the scan controller and notification channel act
/// through it under the machine's direction.
///
/// Methods return `Ok(())` once the command is submitted; outcomes arrive
/// as [`TransportEvent`]s. An `Err` means the command could not be submitted
/// at all.
#[async_trait]
pub trait RadioTransport: Send + Sync + 'static {
    /// Start advertising discovery with the given settings profile.
    async fn start_scan(&self, profile: &ScanProfile) -> Result<()>;

    /// Stop an active discovery.
    async fn stop_scan(&self) -> Result<()>;

    /// Initiate a one-shot (non-auto) connection to a discovered device.
    async fn connect(&self, device: &DeviceId, session: SessionId) -> Result<()>;

    /// Request an enlarged MTU for the session. Best-effort.
    async fn request_mtu(&self, session: SessionId, target: u16) -> Result<()>;

    /// Run GATT service discovery on the session.
    async fn discover_services(&self, session: SessionId) -> Result<()>;

    /// Toggle the transport-level notification flag for a characteristic.
    async fn set_notify(&self, session: SessionId, characteristic: Uuid, enabled: bool)
        -> Result<()>;

    /// Write a value to a characteristic's descriptor.
    async fn write_descriptor(
        &self,
        session: SessionId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()>;

    /// Tear down the session's link immediately.
    async fn disconnect(&self, session: SessionId) -> Result<()>;
}

#[cfg(any(test, feature = "mock-transport"))]
pub use mock::{MockCall, MockTransport};

#[cfg(any(test, feature = "mock-transport"))]
mod mock {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::error::{AirsenseError, Result};
    use crate::scan::ScanProfile;
    use crate::types::{DeviceId, SessionId};

    use super::RadioTransport;

    /// One recorded command submission.
    #[derive(Debug, Clone, PartialEq)]
    pub enum MockCall {
        /// `start_scan` was submitted.
        StartScan,
        /// `stop_scan` was submitted.
        StopScan,
        /// `connect` was submitted for the device under the session.
        Connect(DeviceId, SessionId),
        /// `request_mtu` was submitted.
        RequestMtu(SessionId, u16),
        /// `discover_services` was submitted.
        DiscoverServices(SessionId),
        /// `set_notify` was submitted.
        SetNotify(SessionId, Uuid, bool),
        /// `write_descriptor` was submitted with the given value.
        WriteDescriptor(SessionId, Uuid, Uuid, Vec<u8>),
        /// `disconnect` was submitted.
        Disconnect(SessionId),
    }

    /// In-process transport that records every command submission.
    ///
    /// Produces no events of its own; tests inject [`super::TransportEvent`]s
    /// directly into the monitor's event channel and assert on the recorded
    /// calls. This keeps state-machine behavior testable without a radio
    /// stack, deterministically and without timing variability.
    #[derive(Debug, Default)]
    pub struct MockTransport {
        calls: Mutex<Vec<MockCall>>,
        fail_next_start_scan: AtomicBool,
    }

    impl MockTransport {
        /// A transport that accepts every command.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make the next `start_scan` submission fail.
        pub fn fail_next_start_scan(&self) {
            self.fail_next_start_scan.store(true, Ordering::SeqCst);
        }

        /// Snapshot of all recorded command submissions, in order.
        #[must_use]
        pub fn calls(&self) -> Vec<MockCall> {
            self.calls.lock().expect("mock call log poisoned").clone()
        }

        /// Number of `start_scan` submissions so far.
        #[must_use]
        pub fn start_scan_count(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, MockCall::StartScan))
                .count()
        }

        fn record(&self, call: MockCall) {
            self.calls.lock().expect("mock call log poisoned").push(call);
        }
    }

    #[async_trait]
    impl RadioTransport for MockTransport {
        async fn start_scan(&self, _profile: &ScanProfile) -> Result<()> {
            if self.fail_next_start_scan.swap(false, Ordering::SeqCst) {
                return Err(AirsenseError::ScanStartFailed("mock failure".into()));
            }
            self.record(MockCall::StartScan);
            Ok(())
        }

        async fn stop_scan(&self) -> Result<()> {
            self.record(MockCall::StopScan);
            Ok(())
        }

        async fn connect(&self, device: &DeviceId, session: SessionId) -> Result<()> {
            self.record(MockCall::Connect(device.clone(), session));
            Ok(())
        }

        async fn request_mtu(&self, session: SessionId, target: u16) -> Result<()> {
            self.record(MockCall::RequestMtu(session, target));
            Ok(())
        }

        async fn discover_services(&self, session: SessionId) -> Result<()> {
            self.record(MockCall::DiscoverServices(session));
            Ok(())
        }

        async fn set_notify(
            &self,
            session: SessionId,
            characteristic: Uuid,
            enabled: bool,
        ) -> Result<()> {
            self.record(MockCall::SetNotify(session, characteristic, enabled));
            Ok(())
        }

        async fn write_descriptor(
            &self,
            session: SessionId,
            characteristic: Uuid,
            descriptor: Uuid,
            value: &[u8],
        ) -> Result<()> {
            self.record(MockCall::WriteDescriptor(
                session,
                characteristic,
                descriptor,
                value.to_vec(),
            ));
            Ok(())
        }

        async fn disconnect(&self, session: SessionId) -> Result<()> {
            self.record(MockCall::Disconnect(session));
            Ok(())
        }
    }
}
