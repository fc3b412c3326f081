//! Discovery: scan controller and device matcher.
//!
//! The controller starts and stops discovery through the radio transport and
//! is idempotent: starting while already scanning registers nothing twice.
//! Matching is advisory only; it narrows scan results before a connect
//! attempt but does not guarantee protocol compatibility, which discovery
//! validates downstream.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::protocol::{DEVICE_NAME, SERVICE_UUID};
use crate::transport::RadioTransport;
use crate::types::PeripheralIdentity;

/// Discovery settings profile.
///
/// Tuned for the fastest possible discovery of a single known peripheral,
/// not for battery-efficient background scanning. Transports apply whatever
/// subset of these knobs the platform exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProfile {
    /// Prefer low-latency scan intervals over duty-cycled ones.
    pub low_latency: bool,
    /// Report on weak/partial advertisements rather than waiting for strong
    /// repeated sightings.
    pub aggressive_match: bool,
    /// Stop reporting after the first matching advertisement.
    pub single_match: bool,
    /// Batching delay for scan reports, in milliseconds.
    pub report_delay_ms: u64,
}

impl Default for ScanProfile {
    fn default() -> Self {
        Self {
            low_latency: true,
            aggressive_match: true,
            single_match: true,
            report_delay_ms: 0,
        }
    }
}

/// Filters discovered advertisements down to the expected sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    /// Expected advertised device name.
    pub expected_name: String,
    /// Expected advertised service identifier.
    pub service: Uuid,
}

impl DeviceFilter {
    /// Filter on a specific advertised name plus the fixed service.
    pub fn new(expected_name: impl Into<String>, service: Uuid) -> Self {
        Self {
            expected_name: expected_name.into(),
            service,
        }
    }

    /// True if the advertised name equals the expected name, or the
    /// advertised service set contains the expected service identifier.
    #[must_use]
    pub fn matches(&self, identity: &PeripheralIdentity) -> bool {
        if identity.local_name.as_deref() == Some(self.expected_name.as_str()) {
            return true;
        }
        identity.services.contains(&self.service)
    }
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self::new(DEVICE_NAME, SERVICE_UUID)
    }
}

/// Starts and stops discovery through the radio transport.
///
/// The transport handle is held under the connection state machine's
/// direction; the controller never owns the radio independently.
#[derive(Debug)]
pub struct ScanController<T> {
    transport: Arc<T>,
    profile: ScanProfile,
    scanning: bool,
}

impl<T: RadioTransport> ScanController<T> {
    /// Create a controller over the given transport.
    pub fn new(transport: Arc<T>, profile: ScanProfile) -> Self {
        Self {
            transport,
            profile,
            scanning: false,
        }
    }

    /// Whether a scan is currently active.
    #[must_use]
    pub const fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Start discovery. A no-op if a scan is already active.
    ///
    /// # Errors
    ///
    /// Propagates a platform scan-start failure; non-fatal, the caller may
    /// retry. The controller stays in the not-scanning state on failure.
    pub async fn start(&mut self) -> Result<()> {
        if self.scanning {
            debug!("scan already active, ignoring start");
            return Ok(());
        }
        self.transport.start_scan(&self.profile).await?;
        self.scanning = true;
        Ok(())
    }

    /// Stop discovery. A no-op if no scan is active.
    ///
    /// The controller always leaves the scanning state, even if the platform
    /// reports a stop failure; duplicate stop requests are harmless while a
    /// stuck scan would block reconnection.
    ///
    /// # Errors
    ///
    /// Propagates a platform scan-stop failure.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.scanning {
            return Ok(());
        }
        self.scanning = false;
        self.transport.stop_scan().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockCall, MockTransport};
    use crate::types::DeviceId;

    fn identity(name: Option<&str>, services: Vec<Uuid>) -> PeripheralIdentity {
        PeripheralIdentity {
            device: DeviceId::new("AA:BB:CC:DD:EE:FF"),
            local_name: name.map(str::to_owned),
            services,
        }
    }

    #[test]
    fn test_matches_on_expected_name_with_empty_service_set() {
        let filter = DeviceFilter::default();
        assert!(filter.matches(&identity(Some(DEVICE_NAME), vec![])));
    }

    #[test]
    fn test_matches_on_service_with_unrelated_name() {
        let filter = DeviceFilter::default();
        assert!(filter.matches(&identity(Some("SomethingElse"), vec![SERVICE_UUID])));
    }

    #[test]
    fn test_no_match_without_name_or_service() {
        let filter = DeviceFilter::default();
        assert!(!filter.matches(&identity(Some("SomethingElse"), vec![Uuid::from_u128(0x99)])));
        assert!(!filter.matches(&identity(None, vec![])));
    }

    #[test]
    fn test_name_match_is_exact_not_prefix() {
        let filter = DeviceFilter::default();
        assert!(!filter.matches(&identity(Some("AirSense2"), vec![])));
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let transport = Arc::new(MockTransport::new());
        let mut scan = ScanController::new(Arc::clone(&transport), ScanProfile::default());

        scan.start().await.unwrap();
        scan.start().await.unwrap();

        let starts = transport
            .calls()
            .iter()
            .filter(|c| matches!(c, MockCall::StartScan))
            .count();
        assert_eq!(starts, 1);
        assert!(scan.is_scanning());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let transport = Arc::new(MockTransport::new());
        let mut scan = ScanController::new(Arc::clone(&transport), ScanProfile::default());

        scan.stop().await.unwrap();
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_start_leaves_controller_stopped() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_next_start_scan();
        let mut scan = ScanController::new(Arc::clone(&transport), ScanProfile::default());

        assert!(scan.start().await.is_err());
        assert!(!scan.is_scanning());

        // A retry succeeds.
        scan.start().await.unwrap();
        assert!(scan.is_scanning());
    }
}
