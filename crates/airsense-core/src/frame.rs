//! Telemetry frame codec.
//!
//! One notification from the sensor carries exactly 24 bytes: six IEEE-754
//! single-precision floats, little-endian, no header, no length prefix, no
//! checksum. Field order is fixed by the firmware:
//!
//! | Offset | Field                         | Unit  |
//! |--------|-------------------------------|-------|
//! | 0      | temperature                   | °C    |
//! | 4      | relative humidity             | %     |
//! | 8      | pressure                      | Pa    |
//! | 12     | gas resistance                | kΩ    |
//! | 16     | VOC concentration             | ppm   |
//! | 20     | particulate mass (PM2.5)      | µg/m³ |
//!
//! Decoding is a raw reinterpretation with no range validation: a negative
//! pressure passes through unchanged. Range checks and derived metrics are a
//! downstream concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::FRAME_LEN;

/// Failure to decode a telemetry frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The payload was not exactly [`FRAME_LEN`] bytes.
    #[error("unexpected frame length: expected {FRAME_LEN} bytes, got {0}")]
    UnexpectedLength(usize),
}

/// One decoded sensor reading.
///
/// Immutable value type; the published current-reading signal always holds
/// the most recently decoded value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Temperature in degrees Celsius.
    pub temperature_c: f32,
    /// Relative humidity in percent.
    pub humidity_pct: f32,
    /// Barometric pressure in pascals.
    pub pressure_pa: f32,
    /// Gas sensor resistance in kiloohms.
    pub gas_resistance_kohm: f32,
    /// Volatile organic compound concentration in parts per million.
    pub voc_ppm: f32,
    /// PM2.5 particulate mass concentration in micrograms per cubic meter.
    pub pm25_ug_m3: f32,
    /// Capture timestamp, assigned at decode time.
    pub captured_at: DateTime<Utc>,
}

/// Decode a raw notification payload into a [`SensorReading`].
///
/// Pure function: no shared state, safe to call concurrently.
///
/// # Errors
///
/// Returns [`FrameError::UnexpectedLength`] for any payload that is not
/// exactly 24 bytes.
pub fn decode(bytes: &[u8]) -> Result<SensorReading, FrameError> {
    if bytes.len() != FRAME_LEN {
        return Err(FrameError::UnexpectedLength(bytes.len()));
    }

    let field = |index: usize| {
        let offset = index * 4;
        f32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ])
    };

    Ok(SensorReading {
        temperature_c: field(0),
        humidity_pct: field(1),
        pressure_pa: field(2),
        gas_resistance_kohm: field(3),
        voc_ppm: field(4),
        pm25_ug_m3: field(5),
        captured_at: Utc::now(),
    })
}

/// Encode six field values into the wire layout.
///
/// The inverse of [`decode`], used by hosts that simulate the peripheral.
#[must_use]
pub fn encode(
    temperature_c: f32,
    humidity_pct: f32,
    pressure_pa: f32,
    gas_resistance_kohm: f32,
    voc_ppm: f32,
    pm25_ug_m3: f32,
) -> [u8; FRAME_LEN] {
    let mut out = [0u8; FRAME_LEN];
    let fields = [
        temperature_c,
        humidity_pct,
        pressure_pa,
        gas_resistance_kohm,
        voc_ppm,
        pm25_ug_m3,
    ];
    for (i, value) in fields.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
    }
    out
}
