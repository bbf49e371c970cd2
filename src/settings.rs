// src/settings.rs
//
// Bus configuration, loadable from TOML.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::io::mcpcan::command::DEFAULT_RESPONSE_TIMEOUT;
use crate::io::mcpcan::filter::{FilterRule, FilterTable};
use crate::io::serial::Parity;
use crate::io::IoError;

/// MCP-CAN bus configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    #[serde(default)]
    pub port: String,
    /// Serial baud rate; the adapter expects 250000
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-read timeout of the serial port
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// How long a command waits for the adapter's reply
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// CAN (arbitration) bitrate in bits/second
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
    /// Enable CAN FD frames
    #[serde(default)]
    pub fd: bool,
    /// CAN FD data-phase bitrate; only used with `fd`
    #[serde(default)]
    pub data_bitrate: Option<u32>,
    /// Force the MCP2518FD capability instead of detecting it from the USB serial number
    #[serde(default)]
    pub fd_capable: Option<bool>,
    /// Acceptance filters; `None` leaves the adapter's filters untouched
    #[serde(default)]
    pub can_filters: Option<Vec<FilterRule>>,
    /// Data bits (5, 6, 7, 8) - defaults to 8
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Stop bits (1, 2) - defaults to 1
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
}

fn default_baud_rate() -> u32 {
    250_000
}
fn default_read_timeout_ms() -> u64 {
    100
}
fn default_response_timeout_ms() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT.as_millis() as u64
}
fn default_bitrate() -> u32 {
    500_000
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            bitrate: default_bitrate(),
            fd: false,
            data_bitrate: None,
            fd_capable: None,
            can_filters: None,
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::None,
        }
    }
}

impl BusConfig {
    pub fn for_port(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, IoError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            IoError::configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, IoError> {
        toml::from_str(text).map_err(|e| IoError::configuration(format!("Invalid config: {}", e)))
    }

    pub fn to_toml(&self) -> Result<String, IoError> {
        toml::to_string_pretty(self)
            .map_err(|e| IoError::configuration(format!("Failed to serialize config: {}", e)))
    }

    pub fn validate(&self) -> Result<(), IoError> {
        if self.port.is_empty() {
            return Err(IoError::configuration("Must specify a serial port."));
        }
        if self.response_timeout_ms == 0 {
            return Err(IoError::configuration("response_timeout_ms must be non-zero"));
        }
        Ok(())
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn filter_table(&self) -> Option<FilterTable> {
        self.can_filters.clone().map(FilterTable::from)
    }
}

/// `<config dir>/mcpcan/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mcpcan").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BusConfig::default();
        assert_eq!(config.baud_rate, 250_000);
        assert_eq!(config.bitrate, 500_000);
        assert_eq!(config.response_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_err());
        assert!(BusConfig::for_port("COM3").validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = BusConfig::from_toml(
            r#"
            port = "/dev/ttyUSB0"
            bitrate = 250000
            fd = true
            data_bitrate = 2000000
            parity = "even"

            [[can_filters]]
            can_id = 0x123
            can_mask = 0x7FF

            [[can_filters]]
            can_id = 0x18DAF110
            can_mask = 0x1FFFFFFF
            extended = true
            "#,
        )
        .unwrap();

        assert_eq!(config.port, "/dev/ttyUSB0");
        assert_eq!(config.bitrate, 250_000);
        assert!(config.fd);
        assert_eq!(config.data_bitrate, Some(2_000_000));
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.baud_rate, 250_000);
        let filters = config.filter_table().unwrap();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters.0[0].extended, None);
        assert_eq!(filters.0[1].extended, Some(true));
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = BusConfig::for_port("COM7");
        config.can_filters = Some(vec![FilterRule::new(0x10, 0x7F0)]);
        let text = config.to_toml().unwrap();
        assert_eq!(BusConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            BusConfig::from_toml("bitrate = \"fast\""),
            Err(IoError::Configuration(_))
        ));
    }
}
