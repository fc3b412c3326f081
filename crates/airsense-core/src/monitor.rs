//! Connection state machine and host control surface.
//!
//! One task owns all connection state. Host commands and transport events
//! are multiplexed onto that task and processed one at a time in arrival
//! order, so no two transitions for a session ever run concurrently.
//! Collaborators never touch internal fields; they observe the two published
//! signals ([`AirQualityMonitor::status`] and
//! [`AirQualityMonitor::readings`]), which replay their latest value to any
//! number of subscribers.
//!
//! The lifecycle runs Idle → Scanning → Connecting → NegotiatingMtu →
//! DiscoveringServices → SubscribingNotifications → Ready, with Disconnected
//! reachable from any non-Idle state; an asynchronous transport disconnect
//! always wins. Only Ready maps to a `true` connection status.
//!
//! At most one session is live at a time. The session reference is cleared
//! before re-entering Scanning, and every session-tagged transport event is
//! checked against the current session identity, so late callbacks from a
//! torn-down session are ignored rather than misapplied.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::config::MonitorConfig;
use crate::error::{AirsenseError, ProtocolError, Result};
use crate::frame::SensorReading;
use crate::notify::NotificationChannel;
use crate::protocol::{ServiceDescriptor, SERVICE_UUID};
use crate::scan::{DeviceFilter, ScanController, ScanProfile};
use crate::transport::{RadioTransport, TransportEvent};
use crate::types::{Capabilities, PeripheralIdentity, SessionId};

/// Lifecycle phase of the connection state machine.
///
/// Collaborators only ever see the boolean status signal; every phase other
/// than `Ready` is reported as disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// No activity. Reached at construction, after an explicit disconnect,
    /// or when a disconnection occurs with auto-reconnect disabled.
    Idle,
    /// Discovery is running.
    Scanning,
    /// A one-shot connect to a matched peripheral is in flight.
    Connecting,
    /// Connected; MTU enlargement requested (best-effort).
    NegotiatingMtu,
    /// GATT service discovery is running.
    DiscoveringServices,
    /// Notification handshake (notify flag, then descriptor write) pending.
    SubscribingNotifications,
    /// Fully subscribed; readings flow. The only phase with status `true`.
    Ready,
    /// Session lost; a delayed re-scan may be pending.
    Disconnected,
}

/// Host commands, serialized onto the driver task.
enum Command {
    Start {
        capabilities: Capabilities,
        reply: oneshot::Sender<Result<()>>,
    },
    StopScanning,
    SetAutoReconnect(bool),
    Disconnect,
    /// Fired by the reconnect timer; the token detects cancelled timers.
    ReconnectElapsed(u64),
}

/// Handle to a running monitor.
///
/// Cheap to clone the published signals from; all imperative entry points
/// forward to the single driver task that owns the radio.
#[derive(Debug)]
pub struct AirQualityMonitor {
    commands: mpsc::Sender<Command>,
    status_rx: watch::Receiver<bool>,
    readings_rx: watch::Receiver<Option<SensorReading>>,
}

impl AirQualityMonitor {
    /// Spawn the driver task over a transport and its event channel.
    ///
    /// The transport must deliver its [`TransportEvent`]s on the sender side
    /// of `events`.
    pub fn spawn<T: RadioTransport>(
        transport: Arc<T>,
        events: mpsc::Receiver<TransportEvent>,
        config: MonitorConfig,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(32);
        let (status_tx, status_rx) = watch::channel(false);
        let (readings_tx, readings_rx) = watch::channel(None);

        let driver = MonitorDriver {
            scan: ScanController::new(Arc::clone(&transport), ScanProfile::default()),
            filter: DeviceFilter::new(config.device_name.clone(), SERVICE_UUID),
            notify: NotificationChannel::new(ServiceDescriptor::AIR_QUALITY, readings_tx),
            auto_reconnect: config.auto_reconnect,
            transport,
            config,
            phase: ConnectionPhase::Idle,
            capabilities: Capabilities::none(),
            session: None,
            session_counter: 0,
            reconnect_token: 0,
            commands: commands.clone(),
            status: status_tx,
        };
        tokio::spawn(driver.run(command_rx, events));

        Self {
            commands,
            status_rx,
            readings_rx,
        }
    }

    /// Start monitoring: scan, connect, and subscribe to the sensor.
    ///
    /// Idempotent while a session is being established or is live.
    ///
    /// # Errors
    ///
    /// Fails fast with [`AirsenseError::ScanNotAuthorized`] before any radio
    /// call if the host withheld the scan capability, and with
    /// [`AirsenseError::ScanStartFailed`] if the platform refused to scan
    /// (non-fatal; the call may be retried).
    pub async fn start_monitoring(&self, capabilities: Capabilities) -> Result<()> {
        if !capabilities.scan_authorized {
            return Err(AirsenseError::ScanNotAuthorized);
        }
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Start {
                capabilities,
                reply,
            })
            .await
            .map_err(|_| AirsenseError::MonitorStopped)?;
        response.await.map_err(|_| AirsenseError::MonitorStopped)?
    }

    /// Stop an active scan without touching a live session.
    ///
    /// # Errors
    ///
    /// Fails only if the monitor task has shut down.
    pub async fn stop_scanning(&self) -> Result<()> {
        self.send(Command::StopScanning).await
    }

    /// Enable or disable the auto-reconnect policy.
    ///
    /// Disabling cancels a pending delayed re-scan. Re-enabling does not
    /// retroactively restart anything; it only affects future disconnects.
    ///
    /// # Errors
    ///
    /// Fails only if the monitor task has shut down.
    pub async fn set_auto_reconnect(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetAutoReconnect(enabled)).await
    }

    /// Tear down the active session immediately and go to Idle.
    ///
    /// Host-intended, so the auto-reconnect policy does not fire; any
    /// pending reconnect timer is cancelled.
    ///
    /// # Errors
    ///
    /// Fails only if the monitor task has shut down.
    pub async fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect).await
    }

    /// Connection status signal: `true` only while fully subscribed.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<bool> {
        self.status_rx.clone()
    }

    /// Current-reading signal: the most recently decoded reading, or `None`
    /// before the first one arrives.
    #[must_use]
    pub fn readings(&self) -> watch::Receiver<Option<SensorReading>> {
        self.readings_rx.clone()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AirsenseError::MonitorStopped)
    }
}

/// The single owner of connection state and the radio handle.
struct MonitorDriver<T> {
    transport: Arc<T>,
    scan: ScanController<T>,
    filter: DeviceFilter,
    notify: NotificationChannel,
    config: MonitorConfig,
    phase: ConnectionPhase,
    capabilities: Capabilities,
    auto_reconnect: bool,
    session: Option<SessionId>,
    session_counter: u64,
    reconnect_token: u64,
    commands: mpsc::Sender<Command>,
    status: watch::Sender<bool>,
}

impl<T: RadioTransport> MonitorDriver<T> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
            }
        }
        debug!("monitor driver stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start {
                capabilities,
                reply,
            } => {
                let result = self.start(capabilities).await;
                let _ = reply.send(result);
            }
            Command::StopScanning => {
                if self.phase == ConnectionPhase::Scanning {
                    if let Err(err) = self.scan.stop().await {
                        warn!(%err, "failed to stop scan");
                    }
                    self.phase = ConnectionPhase::Idle;
                }
            }
            Command::SetAutoReconnect(enabled) => {
                self.auto_reconnect = enabled;
                if !enabled {
                    // Cancel a pending delayed re-scan.
                    self.reconnect_token += 1;
                    if self.phase == ConnectionPhase::Disconnected {
                        self.phase = ConnectionPhase::Idle;
                    }
                }
            }
            Command::Disconnect => {
                self.reconnect_token += 1;
                if let Some(session) = self.session.take() {
                    info!(%session, "host-requested disconnect");
                    if let Err(err) = self.transport.disconnect(session).await {
                        warn!(%err, %session, "disconnect submission failed");
                    }
                }
                if self.scan.is_scanning() {
                    if let Err(err) = self.scan.stop().await {
                        warn!(%err, "failed to stop scan");
                    }
                }
                self.set_status(false);
                self.phase = ConnectionPhase::Idle;
            }
            Command::ReconnectElapsed(token) => {
                if token != self.reconnect_token || self.phase != ConnectionPhase::Disconnected {
                    debug!("stale reconnect timer ignored");
                    return;
                }
                info!("reconnect delay elapsed, re-scanning");
                self.session = None;
                match self.scan.start().await {
                    Ok(()) => self.phase = ConnectionPhase::Scanning,
                    Err(err) => {
                        warn!(%err, "re-scan failed to start, retrying after delay");
                        self.schedule_reconnect();
                    }
                }
            }
        }
    }

    async fn start(&mut self, capabilities: Capabilities) -> Result<()> {
        self.capabilities = capabilities;
        if !capabilities.scan_authorized {
            return Err(AirsenseError::ScanNotAuthorized);
        }
        match self.phase {
            ConnectionPhase::Idle | ConnectionPhase::Scanning | ConnectionPhase::Disconnected => {
                // A host-driven restart supersedes any pending reconnect.
                self.reconnect_token += 1;
                self.session = None;
                if let Err(err) = self.scan.start().await {
                    self.phase = ConnectionPhase::Idle;
                    return Err(err);
                }
                self.phase = ConnectionPhase::Scanning;
                Ok(())
            }
            _ => {
                debug!(phase = ?self.phase, "monitoring already in progress");
                Ok(())
            }
        }
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::DeviceDiscovered(identity) => {
                self.on_device_discovered(identity).await;
            }
            TransportEvent::Connected { session } => {
                if self.stale(session, "connected") {
                    return;
                }
                debug!(%session, "transport connected, requesting MTU");
                self.phase = ConnectionPhase::NegotiatingMtu;
                if let Err(err) = self
                    .transport
                    .request_mtu(session, self.config.target_mtu)
                    .await
                {
                    warn!(%err, %session, "MTU request submission failed");
                    self.fail_session(false).await;
                }
            }
            TransportEvent::ConnectFailed { session, reason } => {
                if self.stale(session, "connect-failed") {
                    return;
                }
                warn!(%session, %reason, "connect attempt failed");
                // Uniform teardown keeps the transport's link bookkeeping in
                // step even though the connect never completed.
                self.fail_session(false).await;
            }
            TransportEvent::MtuNegotiated { session, mtu } => {
                if self.stale(session, "mtu") {
                    return;
                }
                // Best-effort: 24-byte frames fit the default minimum, so
                // any outcome proceeds to discovery.
                debug!(%session, ?mtu, "MTU negotiation finished, discovering services");
                self.phase = ConnectionPhase::DiscoveringServices;
                if let Err(err) = self.transport.discover_services(session).await {
                    warn!(%err, %session, "service discovery submission failed");
                    self.fail_session(false).await;
                }
            }
            TransportEvent::ServicesDiscovered { session, result } => {
                if self.stale(session, "services") {
                    return;
                }
                self.on_services_discovered(session, result).await;
            }
            TransportEvent::NotifySet { session, result } => {
                if self.stale(session, "notify-set") {
                    return;
                }
                match result {
                    Ok(()) => {
                        debug!(%session, "notify flag enabled, writing descriptor");
                        if let Err(err) =
                            self.notify.write_cccd(self.transport.as_ref(), session).await
                        {
                            warn!(%err, %session, "descriptor write submission failed");
                            self.protocol_fault(ProtocolError::SubscriptionFailed).await;
                        }
                    }
                    Err(reason) => {
                        warn!(%session, %reason, "enabling notify flag failed");
                        self.protocol_fault(ProtocolError::SubscriptionFailed).await;
                    }
                }
            }
            TransportEvent::DescriptorWritten { session, result } => {
                if self.stale(session, "descriptor-written") {
                    return;
                }
                match result {
                    Ok(()) => {
                        info!(%session, "subscription complete, session ready");
                        self.phase = ConnectionPhase::Ready;
                        self.set_status(true);
                    }
                    Err(reason) => {
                        warn!(%session, %reason, "descriptor write failed");
                        self.protocol_fault(ProtocolError::SubscriptionFailed).await;
                    }
                }
            }
            TransportEvent::Notification {
                session,
                characteristic,
                value,
            } => {
                if self.stale(session, "notification") {
                    return;
                }
                self.notify.handle_notification(characteristic, &value);
            }
            TransportEvent::Disconnected { session } => {
                if self.stale(session, "disconnected") {
                    return;
                }
                info!(%session, "transport disconnected");
                self.session = None;
                self.enter_disconnected(false);
            }
        }
    }

    async fn on_device_discovered(&mut self, identity: PeripheralIdentity) {
        if self.phase != ConnectionPhase::Scanning {
            trace!(device = %identity.device, "scan result outside scanning phase, ignored");
            return;
        }
        if !self.filter.matches(&identity) {
            trace!(device = %identity.device, name = ?identity.local_name, "non-matching advertisement");
            return;
        }
        info!(device = %identity.device, name = ?identity.local_name, "matched advertisement");

        // Stop scanning first to avoid duplicate connect attempts.
        if let Err(err) = self.scan.stop().await {
            warn!(%err, "failed to stop scan after match");
        }
        if !self.capabilities.connect_authorized {
            warn!("connect not authorized by host, returning to idle");
            self.phase = ConnectionPhase::Idle;
            return;
        }

        debug_assert!(
            self.session.is_none(),
            "connect attempted while a session exists"
        );
        self.session_counter += 1;
        let session = SessionId::new(self.session_counter);
        self.session = Some(session);
        self.phase = ConnectionPhase::Connecting;
        debug!(%session, device = %identity.device, "connecting");
        if let Err(err) = self.transport.connect(&identity.device, session).await {
            warn!(%err, %session, "connect submission failed");
            self.session = None;
            self.enter_disconnected(false);
        }
    }

    async fn on_services_discovered(
        &mut self,
        session: SessionId,
        result: std::result::Result<crate::types::GattInventory, String>,
    ) {
        let inventory = match result {
            Ok(inventory) => inventory,
            Err(reason) => {
                warn!(%session, %reason, "service discovery failed");
                self.fail_session(false).await;
                return;
            }
        };
        if !inventory.has_service(self.filter.service) {
            self.protocol_fault(ProtocolError::RequiredServiceMissing).await;
            return;
        }
        if !inventory.has_characteristic(crate::protocol::TELEMETRY_CHAR_UUID) {
            self.protocol_fault(ProtocolError::RequiredCharacteristicMissing)
                .await;
            return;
        }
        debug!(%session, "required service and characteristic present, subscribing");
        self.phase = ConnectionPhase::SubscribingNotifications;
        if let Err(err) = self.notify.enable_notify(self.transport.as_ref(), session).await {
            warn!(%err, %session, "notify submission failed");
            self.protocol_fault(ProtocolError::SubscriptionFailed).await;
        }
    }

    /// Tear down the current session after a protocol-signature mismatch.
    ///
    /// Whether auto-reconnect still applies afterward is host policy
    /// (`reconnect_on_protocol_mismatch`); the default treats it like any
    /// other disconnect.
    async fn protocol_fault(&mut self, error: ProtocolError) {
        warn!(%error, "protocol mismatch on connected peripheral");
        self.fail_session(true).await;
    }

    async fn fail_session(&mut self, protocol_fault: bool) {
        if let Some(session) = self.session.take() {
            if let Err(err) = self.transport.disconnect(session).await {
                warn!(%err, %session, "teardown submission failed");
            }
        }
        self.enter_disconnected(protocol_fault);
    }

    fn enter_disconnected(&mut self, protocol_fault: bool) {
        self.session = None;
        self.set_status(false);
        let reconnect = self.auto_reconnect
            && self.capabilities.scan_authorized
            && (!protocol_fault || self.config.reconnect_on_protocol_mismatch);
        if reconnect {
            self.phase = ConnectionPhase::Disconnected;
            self.schedule_reconnect();
        } else {
            self.phase = ConnectionPhase::Idle;
        }
    }

    /// Arm the delayed re-scan. The token invalidates the timer if the host
    /// disconnects, restarts, or disables auto-reconnect before it fires.
    fn schedule_reconnect(&mut self) {
        self.reconnect_token += 1;
        let token = self.reconnect_token;
        let delay = self.config.reconnect_delay();
        let commands = self.commands.clone();
        debug!(?delay, "scheduling re-scan");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(Command::ReconnectElapsed(token)).await;
        });
    }

    /// True (and logged) if the event belongs to a session that is no longer
    /// current.
    fn stale(&self, session: SessionId, kind: &str) -> bool {
        if self.session == Some(session) {
            false
        } else {
            debug!(%session, kind, "event for stale session ignored");
            true
        }
    }

    fn set_status(&self, connected: bool) {
        self.status.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::*;
    use crate::frame;
    use crate::protocol::{CCCD_UUID, DEVICE_NAME, TARGET_MTU, TELEMETRY_CHAR_UUID};
    use crate::transport::{MockCall, MockTransport};
    use crate::types::{DeviceId, GattInventory};

    fn harness(
        config: MonitorConfig,
    ) -> (
        Arc<MockTransport>,
        mpsc::Sender<TransportEvent>,
        AirQualityMonitor,
    ) {
        let transport = Arc::new(MockTransport::new());
        let (event_tx, event_rx) = mpsc::channel(32);
        let monitor = AirQualityMonitor::spawn(Arc::clone(&transport), event_rx, config);
        (transport, event_tx, monitor)
    }

    fn sensor_identity() -> PeripheralIdentity {
        PeripheralIdentity {
            device: DeviceId::new("AA:BB:CC:DD:EE:FF"),
            local_name: Some(DEVICE_NAME.to_owned()),
            services: vec![SERVICE_UUID],
        }
    }

    fn full_inventory() -> GattInventory {
        GattInventory {
            services: vec![SERVICE_UUID],
            characteristics: vec![TELEMETRY_CHAR_UUID],
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn current_session(transport: &MockTransport) -> SessionId {
        wait_until(|| {
            transport
                .calls()
                .iter()
                .any(|c| matches!(c, MockCall::Connect(..)))
        })
        .await;
        transport
            .calls()
            .iter()
            .rev()
            .find_map(|c| match c {
                MockCall::Connect(_, session) => Some(*session),
                _ => None,
            })
            .expect("connect call recorded")
    }

    /// Drives a fresh harness through the whole happy path to Ready.
    async fn drive_to_ready(
        transport: &MockTransport,
        events: &mpsc::Sender<TransportEvent>,
        monitor: &AirQualityMonitor,
    ) -> SessionId {
        monitor
            .start_monitoring(Capabilities::granted())
            .await
            .unwrap();
        events
            .send(TransportEvent::DeviceDiscovered(sensor_identity()))
            .await
            .unwrap();
        let session = current_session(transport).await;
        events
            .send(TransportEvent::Connected { session })
            .await
            .unwrap();
        events
            .send(TransportEvent::MtuNegotiated {
                session,
                mtu: Some(247),
            })
            .await
            .unwrap();
        events
            .send(TransportEvent::ServicesDiscovered {
                session,
                result: Ok(full_inventory()),
            })
            .await
            .unwrap();
        events
            .send(TransportEvent::NotifySet {
                session,
                result: Ok(()),
            })
            .await
            .unwrap();
        events
            .send(TransportEvent::DescriptorWritten {
                session,
                result: Ok(()),
            })
            .await
            .unwrap();
        let mut status = monitor.status();
        timeout(Duration::from_secs(5), status.wait_for(|v| *v))
            .await
            .expect("status did not become true")
            .unwrap();
        session
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_fails_fast_without_radio_calls() {
        let (transport, _events, monitor) = harness(MonitorConfig::default());
        let err = monitor
            .start_monitoring(Capabilities::none())
            .await
            .unwrap_err();
        assert!(err.is_permission_error());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_start_failure_is_nonfatal_and_retryable() {
        let (transport, _events, monitor) = harness(MonitorConfig::default());
        transport.fail_next_start_scan();

        let err = monitor
            .start_monitoring(Capabilities::granted())
            .await
            .unwrap_err();
        assert!(err.is_scan_error());

        monitor
            .start_monitoring(Capabilities::granted())
            .await
            .unwrap();
        assert_eq!(transport.start_scan_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_scanning_is_idempotent() {
        let (transport, _events, monitor) = harness(MonitorConfig::default());
        monitor
            .start_monitoring(Capabilities::granted())
            .await
            .unwrap();
        monitor
            .start_monitoring(Capabilities::granted())
            .await
            .unwrap();
        assert_eq!(transport.start_scan_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_session_reaches_ready_and_publishes_reading() {
        let (transport, events, monitor) = harness(MonitorConfig::default());
        let readings = monitor.readings();

        assert!(!*monitor.status().borrow());
        let session = drive_to_ready(&transport, &events, &monitor).await;

        // No reading is published before the first valid frame.
        assert!(readings.borrow().is_none());

        // Transport command sequence matches the lifecycle.
        let calls = transport.calls();
        assert!(calls.contains(&MockCall::StartScan));
        assert!(calls.contains(&MockCall::StopScan));
        assert!(calls.contains(&MockCall::RequestMtu(session, TARGET_MTU)));
        assert!(calls.contains(&MockCall::DiscoverServices(session)));
        assert!(calls.contains(&MockCall::SetNotify(session, TELEMETRY_CHAR_UUID, true)));
        assert!(calls.contains(&MockCall::WriteDescriptor(
            session,
            TELEMETRY_CHAR_UUID,
            CCCD_UUID,
            vec![0x01, 0x00],
        )));

        // End to end: a known frame comes out as the published reading.
        let bytes = frame::encode(23.5, 45.0, 101_325.0, 50.0, 0.8, 12.3);
        events
            .send(TransportEvent::Notification {
                session,
                characteristic: TELEMETRY_CHAR_UUID,
                value: bytes.to_vec(),
            })
            .await
            .unwrap();
        let mut readings = readings;
        timeout(Duration::from_secs(5), readings.wait_for(Option::is_some))
            .await
            .expect("reading not published")
            .unwrap();
        let reading = readings.borrow().unwrap();
        assert_eq!(reading.temperature_c, 23.5);
        assert_eq!(reading.humidity_pct, 45.0);
        assert_eq!(reading.pressure_pa, 101_325.0);
        assert_eq!(reading.gas_resistance_kohm, 50.0);
        assert_eq!(reading.voc_ppm, 0.8);
        assert_eq!(reading.pm25_ug_m3, 12.3);
        assert!(*monitor.status().borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_reconnect_rescans_exactly_once_after_delay() {
        let (transport, events, monitor) = harness(MonitorConfig::default());
        let session = drive_to_ready(&transport, &events, &monitor).await;

        events
            .send(TransportEvent::Disconnected { session })
            .await
            .unwrap();
        let mut status = monitor.status();
        timeout(Duration::from_secs(5), status.wait_for(|v| !v))
            .await
            .expect("status did not drop")
            .unwrap();

        // One second of (paused) time elapses; exactly one new scan starts.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        wait_until(|| transport.start_scan_count() == 2).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(transport.start_scan_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_auto_reconnect_is_terminal_until_restart() {
        let config = MonitorConfig {
            auto_reconnect: false,
            ..MonitorConfig::default()
        };
        let (transport, events, monitor) = harness(config);
        let session = drive_to_ready(&transport, &events, &monitor).await;

        events
            .send(TransportEvent::Disconnected { session })
            .await
            .unwrap();
        let mut status = monitor.status();
        timeout(Duration::from_secs(5), status.wait_for(|v| !v))
            .await
            .expect("status did not drop")
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.start_scan_count(), 1);
        assert!(!*monitor.status().borrow());

        // An explicit restart scans again.
        monitor
            .start_monitoring(Capabilities::granted())
            .await
            .unwrap();
        wait_until(|| transport.start_scan_count() == 2).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_disconnect_cancels_pending_reconnect() {
        let (transport, events, monitor) = harness(MonitorConfig::default());
        let session = drive_to_ready(&transport, &events, &monitor).await;

        events
            .send(TransportEvent::Disconnected { session })
            .await
            .unwrap();
        let mut status = monitor.status();
        timeout(Duration::from_secs(5), status.wait_for(|v| !v))
            .await
            .expect("status did not drop")
            .unwrap();

        // Disconnect lands inside the delay window; the pending re-scan
        // must not fire.
        monitor.disconnect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.start_scan_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabling_policy_during_delay_window_cancels_rescan() {
        let (transport, events, monitor) = harness(MonitorConfig::default());
        let session = drive_to_ready(&transport, &events, &monitor).await;

        events
            .send(TransportEvent::Disconnected { session })
            .await
            .unwrap();
        let mut status = monitor.status();
        timeout(Duration::from_secs(5), status.wait_for(|v| !v))
            .await
            .expect("status did not drop")
            .unwrap();

        monitor.set_auto_reconnect(false).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.start_scan_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_descriptor_ack_does_not_affect_new_session() {
        let config = MonitorConfig {
            auto_reconnect: false,
            ..MonitorConfig::default()
        };
        let (transport, events, monitor) = harness(config);

        // Session 1 up to the descriptor write, never acknowledged.
        monitor
            .start_monitoring(Capabilities::granted())
            .await
            .unwrap();
        events
            .send(TransportEvent::DeviceDiscovered(sensor_identity()))
            .await
            .unwrap();
        let first = current_session(&transport).await;
        events
            .send(TransportEvent::Connected { session: first })
            .await
            .unwrap();
        events
            .send(TransportEvent::MtuNegotiated {
                session: first,
                mtu: None,
            })
            .await
            .unwrap();
        events
            .send(TransportEvent::ServicesDiscovered {
                session: first,
                result: Ok(full_inventory()),
            })
            .await
            .unwrap();
        events
            .send(TransportEvent::NotifySet {
                session: first,
                result: Ok(()),
            })
            .await
            .unwrap();

        // Session 1 dies; host restarts; session 2 reaches Connecting.
        events
            .send(TransportEvent::Disconnected { session: first })
            .await
            .unwrap();
        monitor
            .start_monitoring(Capabilities::granted())
            .await
            .unwrap();
        events
            .send(TransportEvent::DeviceDiscovered(sensor_identity()))
            .await
            .unwrap();
        let second = current_session(&transport).await;
        assert_ne!(first, second);

        // The late ack for session 1 must not drive session 2 to Ready.
        events
            .send(TransportEvent::DescriptorWritten {
                session: first,
                result: Ok(()),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!*monitor.status().borrow());

        // Session 2 still completes normally afterward.
        events
            .send(TransportEvent::Connected { session: second })
            .await
            .unwrap();
        events
            .send(TransportEvent::MtuNegotiated {
                session: second,
                mtu: None,
            })
            .await
            .unwrap();
        events
            .send(TransportEvent::ServicesDiscovered {
                session: second,
                result: Ok(full_inventory()),
            })
            .await
            .unwrap();
        events
            .send(TransportEvent::NotifySet {
                session: second,
                result: Ok(()),
            })
            .await
            .unwrap();
        events
            .send(TransportEvent::DescriptorWritten {
                session: second,
                result: Ok(()),
            })
            .await
            .unwrap();
        let mut status = monitor.status();
        timeout(Duration::from_secs(5), status.wait_for(|v| *v))
            .await
            .expect("second session did not reach ready")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_releases_link_and_retries() {
        let (transport, events, monitor) = harness(MonitorConfig::default());
        monitor
            .start_monitoring(Capabilities::granted())
            .await
            .unwrap();
        events
            .send(TransportEvent::DeviceDiscovered(sensor_identity()))
            .await
            .unwrap();
        let session = current_session(&transport).await;
        events
            .send(TransportEvent::ConnectFailed {
                session,
                reason: "peripheral went away".into(),
            })
            .await
            .unwrap();

        // The failed link is explicitly released, not left for the next
        // connect to replace.
        wait_until(|| {
            transport
                .calls()
                .iter()
                .any(|c| matches!(c, MockCall::Disconnect(s) if *s == session))
        })
        .await;
        assert!(!*monitor.status().borrow());

        tokio::time::sleep(Duration::from_secs(2)).await;
        wait_until(|| transport.start_scan_count() == 2).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_characteristic_tears_down_session() {
        let (transport, events, monitor) = harness(MonitorConfig::default());
        monitor
            .start_monitoring(Capabilities::granted())
            .await
            .unwrap();
        events
            .send(TransportEvent::DeviceDiscovered(sensor_identity()))
            .await
            .unwrap();
        let session = current_session(&transport).await;
        events
            .send(TransportEvent::Connected { session })
            .await
            .unwrap();
        events
            .send(TransportEvent::MtuNegotiated { session, mtu: None })
            .await
            .unwrap();
        events
            .send(TransportEvent::ServicesDiscovered {
                session,
                result: Ok(GattInventory {
                    services: vec![SERVICE_UUID],
                    characteristics: vec![],
                }),
            })
            .await
            .unwrap();

        wait_until(|| {
            transport
                .calls()
                .iter()
                .any(|c| matches!(c, MockCall::Disconnect(s) if *s == session))
        })
        .await;
        assert!(!*monitor.status().borrow());

        // Default policy: a signature mismatch reconnects like any other
        // disconnect.
        tokio::time::sleep(Duration::from_secs(2)).await;
        wait_until(|| transport.start_scan_count() == 2).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_protocol_mismatch_policy_can_suppress_reconnect() {
        let config = MonitorConfig {
            reconnect_on_protocol_mismatch: false,
            ..MonitorConfig::default()
        };
        let (transport, events, monitor) = harness(config);
        monitor
            .start_monitoring(Capabilities::granted())
            .await
            .unwrap();
        events
            .send(TransportEvent::DeviceDiscovered(sensor_identity()))
            .await
            .unwrap();
        let session = current_session(&transport).await;
        events
            .send(TransportEvent::Connected { session })
            .await
            .unwrap();
        events
            .send(TransportEvent::MtuNegotiated { session, mtu: None })
            .await
            .unwrap();
        events
            .send(TransportEvent::ServicesDiscovered {
                session,
                result: Ok(GattInventory::default()),
            })
            .await
            .unwrap();

        wait_until(|| {
            transport
                .calls()
                .iter()
                .any(|c| matches!(c, MockCall::Disconnect(s) if *s == session))
        })
        .await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.start_scan_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_does_not_tear_down_session() {
        let (transport, events, monitor) = harness(MonitorConfig::default());
        let session = drive_to_ready(&transport, &events, &monitor).await;

        events
            .send(TransportEvent::Notification {
                session,
                characteristic: TELEMETRY_CHAR_UUID,
                value: vec![0u8; 7],
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(*monitor.status().borrow());
        assert!(monitor.readings().borrow().is_none());
        assert!(!transport
            .calls()
            .iter()
            .any(|c| matches!(c, MockCall::Disconnect(_))));
    }
}
