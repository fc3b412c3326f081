//! btleplug-backed radio transport.
//!
//! Implements [`RadioTransport`] on the platform Bluetooth stack. Commands
//! return once submitted; the actual radio work runs in spawned tasks that
//! report outcomes as [`TransportEvent`]s on the channel supplied at
//! construction, tagged with the session they were issued under.
//!
//! Platform notes:
//! - ATT MTU negotiation is owned by the OS stack; [`RadioTransport::request_mtu`]
//!   reports a best-effort outcome so the connection lifecycle can proceed.
//! - On platforms that hide the CCCD, `subscribe` arms it internally; the
//!   descriptor write then acknowledges the already-live subscription.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AirsenseError, Result};
use crate::scan::ScanProfile;
use crate::transport::{RadioTransport, TransportEvent};
use crate::types::{DeviceId, GattInventory, PeripheralIdentity, SessionId};

fn transport_err(err: btleplug::Error) -> AirsenseError {
    AirsenseError::Transport(err.to_string())
}

/// Device handles learned from advertisements.
///
/// Cleared whenever a new scan starts, so entries never outlive the scan
/// round that produced them. Kept across scan stop because the state machine
/// stops scanning before it connects to the matched device.
struct DiscoveryCache<V> {
    entries: HashMap<DeviceId, V>,
}

impl<V: Clone> DiscoveryCache<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn remember(&mut self, device: DeviceId, handle: V) {
        self.entries.insert(device, handle);
    }

    fn resolve(&self, device: &DeviceId) -> Option<V> {
        self.entries.get(device).cloned()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// The single live platform link, exclusively held for one session.
struct ActiveLink {
    session: SessionId,
    peripheral: Peripheral,
    notification_task: Option<JoinHandle<()>>,
}

/// Radio transport over the first available system Bluetooth adapter.
pub struct BtleTransport {
    adapter: Adapter,
    events: mpsc::Sender<TransportEvent>,
    known: Mutex<DiscoveryCache<PeripheralId>>,
    active: Mutex<Option<ActiveLink>>,
}

impl BtleTransport {
    /// Acquire the first system adapter and start pumping central events
    /// onto the given channel.
    ///
    /// # Errors
    ///
    /// Returns [`AirsenseError::AdapterNotFound`] if no Bluetooth adapter is
    /// present, or a transport error if the platform stack is unavailable.
    pub async fn new(events: mpsc::Sender<TransportEvent>) -> Result<Arc<Self>> {
        let manager = Manager::new().await.map_err(transport_err)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(transport_err)?
            .into_iter()
            .next()
            .ok_or(AirsenseError::AdapterNotFound)?;

        let transport = Arc::new(Self {
            adapter,
            events,
            known: Mutex::new(DiscoveryCache::new()),
            active: Mutex::new(None),
        });
        Arc::clone(&transport).spawn_central_pump().await?;
        Ok(transport)
    }

    async fn spawn_central_pump(self: Arc<Self>) -> Result<()> {
        let mut central_events = self.adapter.events().await.map_err(transport_err)?;
        tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                self.handle_central_event(event).await;
            }
            debug!("central event stream ended");
        });
        Ok(())
    }

    async fn handle_central_event(&self, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                if let Some(identity) = self.identity_for(&id).await {
                    let _ = self
                        .events
                        .send(TransportEvent::DeviceDiscovered(identity))
                        .await;
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                let session = {
                    let mut active = self.active.lock().await;
                    match active.take() {
                        Some(link) if link.peripheral.id() == id => {
                            if let Some(task) = link.notification_task {
                                task.abort();
                            }
                            Some(link.session)
                        }
                        other => {
                            *active = other;
                            None
                        }
                    }
                };
                if let Some(session) = session {
                    let _ = self
                        .events
                        .send(TransportEvent::Disconnected { session })
                        .await;
                }
            }
            _ => {}
        }
    }

    /// Resolve a platform id into an advertisement identity, remembering
    /// the id for a later connect.
    async fn identity_for(&self, id: &PeripheralId) -> Option<PeripheralIdentity> {
        let peripheral = self.adapter.peripheral(id).await.ok()?;
        let properties = peripheral.properties().await.ok().flatten()?;
        let device = DeviceId::new(id.to_string());
        self.known
            .lock()
            .await
            .remember(device.clone(), id.clone());
        Some(PeripheralIdentity {
            device,
            local_name: properties.local_name,
            services: properties.services,
        })
    }

    /// The peripheral of the active link, if it belongs to `session`.
    async fn peripheral_for(&self, session: SessionId) -> Result<Peripheral> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(link) if link.session == session => Ok(link.peripheral.clone()),
            _ => Err(AirsenseError::Transport(format!(
                "no active link for session {session}"
            ))),
        }
    }
}

fn find_characteristic(
    peripheral: &Peripheral,
    uuid: Uuid,
) -> std::result::Result<Characteristic, String> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or_else(|| format!("characteristic {uuid} not present"))
}

#[async_trait]
impl RadioTransport for BtleTransport {
    async fn start_scan(&self, profile: &ScanProfile) -> Result<()> {
        // The scan runs unfiltered: a platform service-UUID filter would
        // hide name-only advertisements the matcher is allowed to accept.
        debug!(?profile, "starting scan");
        self.known.lock().await.clear();
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| AirsenseError::ScanStartFailed(e.to_string()))
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter
            .stop_scan()
            .await
            .map_err(|e| AirsenseError::ScanStopFailed(e.to_string()))
    }

    async fn connect(&self, device: &DeviceId, session: SessionId) -> Result<()> {
        let id = self
            .known
            .lock()
            .await
            .resolve(device)
            .ok_or_else(|| AirsenseError::Transport(format!("unknown device {device}")))?;
        let peripheral = self.adapter.peripheral(&id).await.map_err(transport_err)?;

        {
            let mut active = self.active.lock().await;
            if let Some(old) = active.take() {
                // The state machine always tears down before reconnecting;
                // a leftover link here is stale.
                warn!(session = %old.session, "replacing stale link");
                if let Some(task) = old.notification_task {
                    task.abort();
                }
            }
            *active = Some(ActiveLink {
                session,
                peripheral: peripheral.clone(),
                notification_task: None,
            });
        }

        let events = self.events.clone();
        tokio::spawn(async move {
            // One-shot connect: no platform auto-connect semantics.
            let event = match peripheral.connect().await {
                Ok(()) => TransportEvent::Connected { session },
                Err(err) => TransportEvent::ConnectFailed {
                    session,
                    reason: err.to_string(),
                },
            };
            let _ = events.send(event).await;
        });
        Ok(())
    }

    async fn request_mtu(&self, session: SessionId, target: u16) -> Result<()> {
        // btleplug leaves ATT MTU negotiation to the OS stack. Report the
        // outcome as unknown; 24-byte frames fit any negotiated size.
        debug!(%session, target, "MTU negotiation is platform-managed");
        let events = self.events.clone();
        tokio::spawn(async move {
            let _ = events
                .send(TransportEvent::MtuNegotiated { session, mtu: None })
                .await;
        });
        Ok(())
    }

    async fn discover_services(&self, session: SessionId) -> Result<()> {
        let peripheral = self.peripheral_for(session).await?;
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = match peripheral.discover_services().await {
                Ok(()) => {
                    let services = peripheral.services();
                    Ok(GattInventory {
                        services: services.iter().map(|s| s.uuid).collect(),
                        characteristics: services
                            .iter()
                            .flat_map(|s| s.characteristics.iter().map(|c| c.uuid))
                            .collect(),
                    })
                }
                Err(err) => Err(err.to_string()),
            };
            let _ = events
                .send(TransportEvent::ServicesDiscovered { session, result })
                .await;
        });
        Ok(())
    }

    async fn set_notify(
        &self,
        session: SessionId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<()> {
        let peripheral = self.peripheral_for(session).await?;

        if enabled {
            // Start the notification pump before subscribing so the first
            // notified value cannot be missed.
            let mut stream = peripheral.notifications().await.map_err(transport_err)?;
            let events = self.events.clone();
            let task = tokio::spawn(async move {
                while let Some(notification) = stream.next().await {
                    let _ = events
                        .send(TransportEvent::Notification {
                            session,
                            characteristic: notification.uuid,
                            value: notification.value,
                        })
                        .await;
                }
            });
            let mut active = self.active.lock().await;
            match active.as_mut() {
                Some(link) if link.session == session => {
                    if let Some(old) = link.notification_task.replace(task) {
                        old.abort();
                    }
                }
                _ => task.abort(),
            }
        }

        let events = self.events.clone();
        tokio::spawn(async move {
            let result = match find_characteristic(&peripheral, characteristic) {
                Ok(target) => {
                    let op = if enabled {
                        peripheral.subscribe(&target).await
                    } else {
                        peripheral.unsubscribe(&target).await
                    };
                    op.map_err(|e| e.to_string())
                }
                Err(reason) => Err(reason),
            };
            let _ = events
                .send(TransportEvent::NotifySet { session, result })
                .await;
        });
        Ok(())
    }

    async fn write_descriptor(
        &self,
        session: SessionId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()> {
        let peripheral = self.peripheral_for(session).await?;
        let value = value.to_vec();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = match find_characteristic(&peripheral, characteristic) {
                Ok(target) => match target.descriptors.iter().find(|d| d.uuid == descriptor) {
                    Some(target_descriptor) => peripheral
                        .write_descriptor(target_descriptor, &value)
                        .await
                        .map_err(|e| e.to_string()),
                    // The platform hid the CCCD and armed it inside
                    // subscribe; the subscription is already live.
                    None => Ok(()),
                },
                Err(reason) => Err(reason),
            };
            let _ = events
                .send(TransportEvent::DescriptorWritten { session, result })
                .await;
        });
        Ok(())
    }

    async fn disconnect(&self, session: SessionId) -> Result<()> {
        let mut active = self.active.lock().await;
        match active.take() {
            Some(link) if link.session == session => {
                drop(active);
                if let Some(task) = link.notification_task {
                    task.abort();
                }
                link.peripheral.disconnect().await.map_err(transport_err)
            }
            other => {
                // Nothing to tear down for this session.
                *active = other;
                Ok(())
            }
        }
    }
}
