//! Notification channel: subscription handshake and reading publication.
//!
//! Subscribing is a two-step handshake, and both steps must succeed before
//! the session counts as ready: first the transport-level notification flag
//! is enabled for the telemetry characteristic, then the enable value is
//! written to the notification-configuration descriptor.
//!
//! Incoming characteristic-change events are checked against the expected
//! characteristic identifier; events for any other identifier are logged and
//! dropped. Decode failures are likewise logged and dropped; malformed
//! frames happen occasionally from partial writes or radio noise and never
//! tear the session down.

use tokio::sync::watch;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::frame::{self, SensorReading};
use crate::protocol::{ServiceDescriptor, ENABLE_NOTIFICATIONS};
use crate::transport::RadioTransport;
use crate::types::SessionId;

/// Owns the subscription handshake and routes notified values to the codec.
#[derive(Debug)]
pub struct NotificationChannel {
    descriptor: ServiceDescriptor,
    readings: watch::Sender<Option<SensorReading>>,
}

impl NotificationChannel {
    /// Create a channel publishing decoded readings to the given signal.
    pub fn new(
        descriptor: ServiceDescriptor,
        readings: watch::Sender<Option<SensorReading>>,
    ) -> Self {
        Self {
            descriptor,
            readings,
        }
    }

    /// Step one: enable the transport-level notification flag.
    ///
    /// # Errors
    ///
    /// Propagates a transport submission failure.
    pub async fn enable_notify<T: RadioTransport>(
        &self,
        transport: &T,
        session: SessionId,
    ) -> Result<()> {
        transport
            .set_notify(session, self.descriptor.telemetry, true)
            .await
    }

    /// Step two: write the enable value to the configuration descriptor.
    ///
    /// # Errors
    ///
    /// Propagates a transport submission failure.
    pub async fn write_cccd<T: RadioTransport>(
        &self,
        transport: &T,
        session: SessionId,
    ) -> Result<()> {
        transport
            .write_descriptor(
                session,
                self.descriptor.telemetry,
                self.descriptor.cccd,
                &ENABLE_NOTIFICATIONS,
            )
            .await
    }

    /// Route one characteristic-change event.
    ///
    /// Returns `true` if a reading was decoded and published.
    pub fn handle_notification(&self, characteristic: Uuid, value: &[u8]) -> bool {
        if characteristic != self.descriptor.telemetry {
            debug!(%characteristic, "notification for unexpected characteristic, dropped");
            return false;
        }
        match frame::decode(value) {
            Ok(reading) => {
                trace!(
                    temperature_c = reading.temperature_c,
                    pm25 = reading.pm25_ug_m3,
                    "reading published"
                );
                self.readings.send_replace(Some(reading));
                true
            }
            Err(err) => {
                warn!(%err, len = value.len(), "malformed telemetry frame dropped");
                false
            }
        }
    }
}
