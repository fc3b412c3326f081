//! Monitor configuration management.
//!
//! Handles loading, saving, and validating the monitor's policy knobs:
//! - Advertised device name to match
//! - Auto-reconnect policy and delay
//! - Reconnect behavior on a protocol-signature mismatch
//! - Target MTU requested after connecting
//!
//! The wire protocol itself (service/characteristic identifiers, frame
//! layout) is fixed in [`crate::protocol`] and is not configurable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AirsenseError, Result};
use crate::protocol::{DEVICE_NAME, RECONNECT_DELAY, TARGET_MTU};

/// Monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Advertised device name the matcher accepts.
    pub device_name: String,

    /// Whether an unexpected disconnection triggers a delayed re-scan.
    pub auto_reconnect: bool,

    /// Whether a protocol-signature mismatch (missing service or
    /// characteristic, failed subscription) is still followed by
    /// auto-reconnect. With `false`, an incompatible peripheral is terminal
    /// until the host restarts monitoring.
    pub reconnect_on_protocol_mismatch: bool,

    /// Delay before re-scanning after an unexpected disconnection, in
    /// milliseconds. Constant per retry; there is no backoff growth.
    pub reconnect_delay_ms: u64,

    /// MTU requested after connecting. Negotiation is best-effort.
    pub target_mtu: u16,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            device_name: DEVICE_NAME.to_owned(),
            auto_reconnect: true,
            reconnect_on_protocol_mismatch: true,
            reconnect_delay_ms: RECONNECT_DELAY.as_millis() as u64,
            target_mtu: TARGET_MTU,
        }
    }
}

impl MonitorConfig {
    /// The reconnect delay as a [`Duration`].
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Load configuration from disk, falling back to defaults if no file
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read, parsed, or
    /// validated.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific path, falling back to defaults if
    /// no file exists there.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self =
                toml::from_str(&content).map_err(|e| AirsenseError::ConfigParse(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be serialized or written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a specific path, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the config fails validation or cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AirsenseError::ConfigParse(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check that all values are usable before they reach the state machine.
    ///
    /// # Errors
    ///
    /// Returns [`AirsenseError::ConfigValidation`] naming the first invalid
    /// field.
    pub fn validate(&self) -> Result<()> {
        if self.device_name.trim().is_empty() {
            return Err(AirsenseError::ConfigValidation {
                field: "device_name",
                message: "must not be empty".into(),
            });
        }
        if self.reconnect_delay_ms == 0 {
            return Err(AirsenseError::ConfigValidation {
                field: "reconnect_delay_ms",
                message: "must be greater than zero".into(),
            });
        }
        // 23 is the ATT minimum; 517 the largest request the firmware side
        // understands.
        if !(23..=517).contains(&self.target_mtu) {
            return Err(AirsenseError::ConfigValidation {
                field: "target_mtu",
                message: format!("{} is outside 23..=517", self.target_mtu),
            });
        }
        Ok(())
    }

    /// Get the configuration file path.
    fn config_path() -> Result<PathBuf> {
        // On appliance installs: /etc/airsense/config.toml
        // For development: ~/.config/airsense/config.toml
        #[cfg(target_os = "linux")]
        {
            Ok(PathBuf::from("/etc/airsense/config.toml"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let dirs = directories::ProjectDirs::from("", "", "airsense").ok_or_else(|| {
                AirsenseError::ConfigValidation {
                    field: "config_path",
                    message: "cannot determine config directory".into(),
                }
            })?;
            Ok(dirs.config_dir().join("config.toml"))
        }
    }
}
