//! Link settings

use crate::core::transfer::TransferConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::ConfigError;

/// Directory on the machine's SD card holding G-code jobs
pub const REMOTE_GCODE_DIR: &str = "/sd/gcodes";

/// Convert a configured number of seconds, falling back on nonsense values
pub(crate) fn secs(value: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(fallback)
}

/// Complete configuration for the connectivity layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Remote directory used when no path is given
    pub remote_gcode_dir: String,
    /// Serial link settings
    pub serial: SerialSettings,
    /// TCP link settings
    pub network: NetworkSettings,
    /// UDP announcement listener
    pub discovery: DiscoverySettings,
    /// Block transfer settings
    pub transfer: TransferConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            remote_gcode_dir: REMOTE_GCODE_DIR.to_string(),
            serial: SerialSettings::default(),
            network: NetworkSettings::default(),
            discovery: DiscoverySettings::default(),
            transfer: TransferConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Load config from the user config directory, or defaults if absent
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::config_file().ok_or(ConfigError::NoConfigDir)?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Save config to the user config directory
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = super::config_file().ok_or(ConfigError::NoConfigDir)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        self.save_to(&path)
    }

    /// Save config to a specific file
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Serial link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Baud rate
    pub baud_rate: u32,
    /// Read/write timeout in seconds
    pub timeout_secs: f64,
    /// USB vendor id of the controller's serial bridge
    pub vendor_id: u16,
    /// USB product id of the controller's serial bridge
    pub product_id: u16,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            timeout_secs: 1.0,
            vendor_id: 0x0403,
            product_id: 0x6001,
        }
    }
}

impl SerialSettings {
    /// Read/write timeout
    pub fn timeout(&self) -> Duration {
        secs(self.timeout_secs, Duration::from_secs(1))
    }
}

/// TCP link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Port used when an address carries none
    pub port: u16,
    /// Connect/read timeout in seconds
    pub timeout_secs: f64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            port: 2222,
            timeout_secs: 1.0,
        }
    }
}

impl NetworkSettings {
    /// Connect/read timeout
    pub fn timeout(&self) -> Duration {
        secs(self.timeout_secs, Duration::from_secs(1))
    }
}

/// UDP announcement listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Local address to bind
    pub bind_address: String,
    /// Broadcast port the machine announces on
    pub port: u16,
    /// How long to wait for one announcement, in seconds
    pub timeout_secs: f64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3333,
            timeout_secs: 5.0,
        }
    }
}

impl DiscoverySettings {
    /// Listen window
    pub fn timeout(&self) -> Duration {
        secs(self.timeout_secs, Duration::from_secs(5))
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// JSON lines
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_machine() {
        let config = LinkConfig::default();
        assert_eq!(config.remote_gcode_dir, "/sd/gcodes");
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.serial.timeout(), Duration::from_secs(1));
        assert_eq!(config.network.port, 2222);
        assert_eq!(config.discovery.port, 3333);
        assert_eq!(config.discovery.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = LinkConfig::from_toml(
            r#"
            [network]
            timeout_secs = 0.25

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.network.timeout(), Duration::from_millis(250));
        assert_eq!(config.network.port, 2222);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.serial, SerialSettings::default());
    }

    #[test]
    fn test_negative_timeout_falls_back() {
        let settings = SerialSettings {
            timeout_secs: -3.0,
            ..SerialSettings::default()
        };
        assert_eq!(settings.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = LinkConfig::default();
        config.remote_gcode_dir = "/sd/jobs".to_string();
        config.transfer.max_retries = 3;
        config.save_to(&path).unwrap();

        let loaded = LinkConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        assert!(matches!(
            LinkConfig::from_toml("serial = 5"),
            Err(ConfigError::Parse(_))
        ));
    }
}
